//! End-to-end tests for dagrun.
//!
//! Each test builds a real git repository in a temp directory, installs a
//! scripted fake `claude` binary on PATH, and drives the dagrun binary
//! through a full run.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

fn git(args: &[&str], cwd: &Path) {
    let out = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("run git");
    assert!(
        out.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn init_git_repo(repo: &Path) {
    fs::create_dir_all(repo).expect("create repo dir");
    git(&["init", "-b", "main"], repo);
    git(&["config", "user.name", "dagrun"], repo);
    git(&["config", "user.email", "dagrun@example.com"], repo);
    fs::write(repo.join("README.md"), "test\n").expect("write file");
    git(&["add", "."], repo);
    git(&["commit", "-q", "-m", "init"], repo);
}

/// Installs a fake `claude` CLI. The script receives the prompt as `$4`
/// (claude --dangerously-skip-permissions --verbose -p PROMPT
/// --output-format stream-json) and `body` runs with `$task` set to the
/// task id extracted from a task prompt (empty for other prompts).
fn install_fake_claude(bin_dir: &Path, body: &str) {
    fs::create_dir_all(bin_dir).expect("create bin dir");
    let script = format!(
        "#!/bin/sh\n\
         prompt=\"$4\"\n\
         task=$(printf '%s\\n' \"$prompt\" | sed -n 's/^TASK ID: //p' | head -n1)\n\
         {body}\n"
    );
    let path = bin_dir.join("claude");
    fs::write(&path, script).expect("write script");
    let mut perms = fs::metadata(&path).expect("stat").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
}

/// Agent body: implement the task as one committed file, note progress,
/// emit a result record.
const IMPLEMENT_BODY: &str = r#"echo "impl $task" > "file-$task.txt"
echo "did $task" >> progress.txt
git add "file-$task.txt"
git commit -q -m "implement $task"
printf '{"type":"result","result":"done","usage":{"input_tokens":10,"output_tokens":5}}\n'
"#;

struct TestEnv {
    _tmp: tempfile::TempDir,
    repo: PathBuf,
    bin_dir: PathBuf,
    run_dir: PathBuf,
}

impl TestEnv {
    fn new(prd_id: &str, tasks_yaml: &str) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let repo = tmp.path().join("repo");
        init_git_repo(&repo);

        fs::write(
            repo.join("PRD.md"),
            format!("# PRD: Test\nprd-id: {prd_id}\n\nBody.\n"),
        )
        .expect("write prd");

        let run_dir = repo.join("artifacts/prd").join(prd_id);
        fs::create_dir_all(run_dir.join("reports")).expect("create run dir");
        fs::write(run_dir.join("tasks.yaml"), tasks_yaml).expect("write tasks");

        let bin_dir = tmp.path().join("bin");
        Self {
            _tmp: tmp,
            repo,
            bin_dir,
            run_dir,
        }
    }

    fn run(&self, args: &[&str]) -> (i32, String, String) {
        self.run_with_env(args, &[])
    }

    fn run_with_env(&self, args: &[&str], env: &[(&str, &str)]) -> (i32, String, String) {
        let path = format!(
            "{}:{}",
            self.bin_dir.display(),
            std::env::var("PATH").unwrap_or_default()
        );
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_dagrun"));
        cmd.args(args)
            .current_dir(&self.repo)
            .env("PATH", path)
            .env("NO_COLOR", "1");
        for (key, value) in env {
            cmd.env(key, value);
        }
        let out = cmd.output().expect("run dagrun");
        (
            out.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&out.stdout).to_string(),
            String::from_utf8_lossy(&out.stderr).to_string(),
        )
    }

    fn report(&self, task_id: &str) -> Option<String> {
        fs::read_to_string(self.run_dir.join(format!("reports/{task_id}.json"))).ok()
    }

    fn task_completed(&self, task_id: &str) -> bool {
        let raw = fs::read_to_string(self.run_dir.join("tasks.yaml")).expect("tasks.yaml");
        let set: serde_yaml::Value = serde_yaml::from_str(&raw).expect("yaml");
        set["tasks"]
            .as_sequence()
            .expect("tasks list")
            .iter()
            .any(|t| t["id"].as_str() == Some(task_id) && t["completed"].as_bool() == Some(true))
    }
}

const CHAIN_TASKS: &str = r#"branchName: ""
tasks:
  - id: A
    title: "task a"
    completed: false
    dependsOn: []
    mutex: []
  - id: B
    title: "task b"
    completed: false
    dependsOn: ["A"]
    mutex: []
  - id: C
    title: "task c"
    completed: false
    dependsOn: ["B"]
    mutex: []
"#;

#[test]
fn s1_linear_chain_all_succeed() {
    let env = TestEnv::new("s1-chain", CHAIN_TASKS);
    install_fake_claude(&env.bin_dir, IMPLEMENT_BODY);

    let (code, out, err) = env.run(&["--retry-delay", "0"]);
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");

    // All three merged into the integration branch in dependency order.
    for id in ["A", "B", "C"] {
        assert!(env.repo.join(format!("file-{id}.txt")).is_file(), "missing file for {id}");
        assert!(env.task_completed(id), "{id} not completed on disk");
        let report = env.report(id).expect("report");
        assert!(report.contains("\"status\": \"done\""), "{report}");
    }

    // Agent bookkeeping files never reach the integration branch.
    assert!(!env.repo.join("tasks.yaml").exists());
    assert!(!env.repo.join("progress.txt").exists());

    // Token usage accumulated from the result records.
    assert!(out.contains("Input tokens:  30"), "{out}");
}

#[test]
fn s2_mutex_serializes_execution() {
    let tasks = r#"branchName: ""
tasks:
  - id: X
    title: "migration x"
    completed: false
    dependsOn: []
    mutex: ["db-migrations"]
  - id: Y
    title: "migration y"
    completed: false
    dependsOn: []
    mutex: ["db-migrations"]
"#;
    let env = TestEnv::new("s2-mutex", tasks);
    // The lock file proves mutual exclusion: overlap would fail a task.
    let body = r#"lock="$DAGRUN_TEST_LOCK"
if [ -e "$lock" ]; then echo "mutex violation" 1>&2; exit 1; fi
touch "$lock"
sleep 1
rm -f "$lock"
echo "impl $task" > "file-$task.txt"
git add "file-$task.txt"
git commit -q -m "implement $task"
printf '{"type":"result","result":"done"}\n'
"#;
    install_fake_claude(&env.bin_dir, body);

    let lock = env.run_dir.join("test.lock");
    let (code, out, err) = env.run_with_env(
        &["--retry-delay", "0", "--max-parallel", "3"],
        &[("DAGRUN_TEST_LOCK", lock.to_str().unwrap())],
    );
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");
    assert!(env.task_completed("X"));
    assert!(env.task_completed("Y"));
}

#[test]
fn s3_dependency_cycle_rejected_before_scheduling() {
    let tasks = r#"branchName: ""
tasks:
  - id: P
    title: "task p"
    completed: false
    dependsOn: ["Q"]
    mutex: []
  - id: Q
    title: "task q"
    completed: false
    dependsOn: ["P"]
    mutex: []
"#;
    let env = TestEnv::new("s3-cycle", tasks);
    install_fake_claude(&env.bin_dir, IMPLEMENT_BODY);

    let (code, out, err) = env.run(&[]);
    assert_eq!(code, 2, "stdout: {out}\nstderr: {err}");
    assert!(out.contains("Cycle") || err.contains("Cycle"), "{out}{err}");
    // No agent ran, no reports written.
    assert!(env.report("P").is_none());
    assert!(env.report("Q").is_none());
}

#[test]
fn duplicate_task_ids_rejected() {
    let tasks = r#"branchName: ""
tasks:
  - id: A
    title: "first"
    completed: false
  - id: A
    title: "second"
    completed: false
"#;
    let env = TestEnv::new("dup-ids", tasks);
    install_fake_claude(&env.bin_dir, IMPLEMENT_BODY);

    let (code, out, err) = env.run(&[]);
    assert_eq!(code, 2);
    assert!(out.contains("Duplicate id") || err.contains("Duplicate id"), "{out}{err}");
}

#[test]
fn unknown_mutex_rejected_contract_accepted() {
    let tasks = r#"branchName: ""
tasks:
  - id: A
    title: "ok contract"
    completed: false
    mutex: ["contract:payments"]
  - id: B
    title: "bad mutex"
    completed: false
    mutex: ["weird"]
"#;
    let env = TestEnv::new("mutex-names", tasks);
    install_fake_claude(&env.bin_dir, IMPLEMENT_BODY);

    let (code, out, err) = env.run(&[]);
    assert_eq!(code, 2);
    let combined = format!("{out}{err}");
    assert!(combined.contains("unknown mutex 'weird'"), "{combined}");
    assert!(!combined.contains("contract:payments"), "{combined}");
}

#[test]
fn s4_external_failure_triggers_graceful_stop() {
    let tasks = r#"branchName: ""
tasks:
  - id: N
    title: "network task"
    completed: false
  - id: M
    title: "slow task"
    completed: false
"#;
    let env = TestEnv::new("s4-external", tasks);
    // N fails with an external signature; M would run for a long time.
    let body = r#"if [ "$task" = "N" ]; then
  echo "network: ETIMEDOUT" 1>&2
  exit 1
fi
sleep 30
"#;
    install_fake_claude(&env.bin_dir, body);

    let (code, out, err) = env.run(&[
        "--retry-delay",
        "0",
        "--max-parallel",
        "3",
        "--external-fail-timeout",
        "0",
    ]);
    assert_eq!(code, 1, "stdout: {out}\nstderr: {err}");

    let n_report = env.report("N").expect("N report");
    assert!(n_report.contains("\"failureType\": \"external\""), "{n_report}");
    assert!(n_report.contains("ETIMEDOUT"), "{n_report}");

    // M was cancelled by the graceful stop and reported failed.
    let m_report = env.report("M").expect("M report");
    assert!(m_report.contains("\"status\": \"failed\""), "{m_report}");

    assert!(!env.task_completed("N"));
    assert!(!env.task_completed("M"));
}

#[test]
fn s5_merge_conflict_resolved_by_agent() {
    let tasks = r#"branchName: ""
tasks:
  - id: F1
    title: "first writer"
    completed: false
  - id: F2
    title: "second writer"
    completed: false
"#;
    let env = TestEnv::new("s5-conflict", tasks);
    // Both tasks add shared.txt with different content, so the second
    // merge hits an add/add conflict. The conflict prompt path resolves it.
    let body = r#"if printf '%s' "$prompt" | grep -q "Resolve git merge conflicts"; then
  echo "resolved" > shared.txt
  git add shared.txt
  git commit -q --no-edit
  printf '{"type":"result","result":"resolved"}\n'
  exit 0
fi
echo "content of $task" > shared.txt
echo "done" > "file-$task.txt"
git add shared.txt "file-$task.txt"
git commit -q -m "implement $task"
printf '{"type":"result","result":"done"}\n'
"#;
    install_fake_claude(&env.bin_dir, body);

    let (code, out, err) = env.run(&["--retry-delay", "0", "--max-parallel", "3"]);
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");
    assert!(env.task_completed("F1"));
    assert!(env.task_completed("F2"));
    assert!(env.repo.join("shared.txt").is_file());
}

#[test]
fn s6_resume_skips_completed_tasks() {
    let tasks = r#"branchName: ""
tasks:
  - id: A
    title: "already done"
    completed: true
  - id: B
    title: "still pending"
    completed: false
"#;
    let env = TestEnv::new("s6-resume", tasks);
    install_fake_claude(&env.bin_dir, IMPLEMENT_BODY);

    // A prior run's report must survive the resume untouched.
    fs::write(
        env.run_dir.join("reports/A.json"),
        "{\"taskId\": \"A\", \"marker\": \"prior-run\"}",
    )
    .unwrap();

    let (code, out, err) = env.run(&["--resume", "s6-resume", "--retry-delay", "0"]);
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");

    // A was never executed again.
    assert!(!env.repo.join("file-A.txt").exists());
    assert!(env.report("A").unwrap().contains("prior-run"));

    // B ran and completed.
    assert!(env.repo.join("file-B.txt").is_file());
    assert!(env.task_completed("B"));
}

#[test]
fn rerunning_a_completed_run_is_a_noop() {
    let tasks = r#"branchName: ""
tasks:
  - id: A
    title: "done already"
    completed: true
"#;
    let env = TestEnv::new("all-done", tasks);
    // Any invocation of the engine would leave a trace file.
    install_fake_claude(
        &env.bin_dir,
        "touch \"$DAGRUN_TEST_CALLS\"\nexit 1\n",
    );
    let calls = env.run_dir.join("calls.marker");

    let (code, out, err) = env.run_with_env(
        &["--resume", "all-done"],
        &[("DAGRUN_TEST_CALLS", calls.to_str().unwrap())],
    );
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");
    assert!(!calls.exists(), "engine was spawned for a completed run");
}

#[test]
fn sequential_flag_matches_parallel_one() {
    let env = TestEnv::new("seq-run", CHAIN_TASKS);
    install_fake_claude(&env.bin_dir, IMPLEMENT_BODY);

    let (code, out, err) = env.run(&["--sequential", "--retry-delay", "0"]);
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");
    for id in ["A", "B", "C"] {
        assert!(env.task_completed(id));
    }
}

#[test]
fn internal_failure_retries_then_fails_alone() {
    let tasks = r#"branchName: ""
tasks:
  - id: A
    title: "flaky task"
    completed: false
  - id: Z
    title: "independent task"
    completed: false
"#;
    let env = TestEnv::new("retry-fail", tasks);
    // A never commits (internal failure); Z succeeds.
    let body = r#"if [ "$task" = "A" ]; then
  echo "assertion failed" 1>&2
  exit 1
fi
echo "impl $task" > "file-$task.txt"
git add "file-$task.txt"
git commit -q -m "implement $task"
"#;
    install_fake_claude(&env.bin_dir, body);

    let (code, out, err) = env.run(&["--retry-delay", "0", "--max-retries", "1"]);
    assert_eq!(code, 1, "stdout: {out}\nstderr: {err}");

    let a_report = env.report("A").expect("A report");
    assert!(a_report.contains("\"failureType\": \"internal\""), "{a_report}");
    assert!(a_report.contains("\"retries\": 1"), "{a_report}");

    // Z is unaffected by A's failure.
    assert!(env.task_completed("Z"));
    assert!(!env.task_completed("A"));
}

#[test]
fn stalled_agent_is_killed_and_fails() {
    let tasks = r#"branchName: ""
tasks:
  - id: A
    title: "sleepy task"
    completed: false
"#;
    let env = TestEnv::new("stall", tasks);
    install_fake_claude(&env.bin_dir, "sleep 30\n");

    let (code, out, err) = env.run(&[
        "--retry-delay",
        "0",
        "--max-retries",
        "0",
        "--stalled-timeout",
        "1",
    ]);
    assert_eq!(code, 1, "stdout: {out}\nstderr: {err}");

    let report = env.report("A").expect("A report");
    assert!(report.contains("stalled"), "{report}");
    assert!(report.contains("\"failureType\": \"internal\""), "{report}");
}

#[test]
fn dry_run_lists_tasks_without_executing() {
    let env = TestEnv::new("dry", CHAIN_TASKS);
    install_fake_claude(&env.bin_dir, IMPLEMENT_BODY);

    let (code, out, err) = env.run(&["--dry-run"]);
    assert_eq!(code, 0, "stdout: {out}\nstderr: {err}");
    assert!(out.contains("Dry run"));
    assert!(out.contains("task a"));
    assert!(!env.repo.join("file-A.txt").exists());
}

#[test]
fn missing_prd_id_is_fatal() {
    let env = TestEnv::new("no-id", CHAIN_TASKS);
    install_fake_claude(&env.bin_dir, IMPLEMENT_BODY);
    fs::write(env.repo.join("PRD.md"), "# PRD: No id here\n\nBody.\n").unwrap();
    // Without a prd-id the pre-seeded run directory is unreachable.
    let (code, _out, err) = env.run(&[]);
    assert_eq!(code, 2, "{err}");
    assert!(err.contains("prd-id"), "{err}");
}

#[test]
fn resume_with_unknown_prd_id_is_fatal() {
    let env = TestEnv::new("known", CHAIN_TASKS);
    install_fake_claude(&env.bin_dir, IMPLEMENT_BODY);

    let (code, _out, err) = env.run(&["--resume", "never-heard-of-it"]);
    assert_eq!(code, 2);
    assert!(err.contains("No run found"), "{err}");
}

#[test]
fn validating_then_saving_round_trips() {
    // Round-trip at the file level: load → save → reload yields an equal
    // document, independently of the in-memory order of operations.
    let env = TestEnv::new("roundtrip", CHAIN_TASKS);
    let path = env.run_dir.join("tasks.yaml");
    let raw = fs::read_to_string(&path).unwrap();
    let set: serde_yaml::Value = serde_yaml::from_str(&raw).unwrap();
    let rewritten = serde_yaml::to_string(&set).unwrap();
    let reparsed: serde_yaml::Value = serde_yaml::from_str(&rewritten).unwrap();
    assert_eq!(set, reparsed);
}
