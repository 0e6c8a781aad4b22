//! Engine adapter interface.
//!
//! Engine adapters are the only components that spawn agent processes.
//! They never interpret task success or failure; they report exit codes,
//! captured streams, and whether a well-formed error record appeared.

use crate::core::failure::{looks_like_policy_block, looks_like_rate_limit};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Uniform result from any engine invocation.
#[derive(Debug, Clone, Default)]
pub struct EngineResult {
    /// Final text the engine reported.
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    /// Error message extracted from the stream or stderr, if any.
    pub error: String,
    pub return_code: i32,
}

/// Trait for engine adapters. One implementation per supported engine,
/// selected by [`super::EngineKind`].
pub trait Engine: Send + Sync {
    /// Engine name as shown to the user.
    fn name(&self) -> &'static str;

    /// The CLI invocation for the given prompt.
    fn build_cmd(&self, prompt: &str) -> Vec<String>;

    /// Parses raw stream output into an [`EngineResult`].
    ///
    /// Parsers are line-wise scanners: engines interleave JSON records with
    /// free text, so whole-document JSON parsing is never correct.
    fn parse_output(&self, raw: &str) -> EngineResult;

    /// Environment overrides, e.g. an unrestricted-permissions knob.
    fn extra_env(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Returns an error message when the engine CLI is not usable.
    fn check_available(&self) -> Option<String> {
        let cmd = self.build_cmd("test");
        if binary_on_path(&cmd[0]) {
            None
        } else {
            Some(format!("{} not found in PATH", cmd[0]))
        }
    }

    /// Executes the engine synchronously and returns the parsed result.
    fn run_sync(&self, prompt: &str, cwd: &Path, timeout: Option<Duration>) -> EngineResult {
        let cmd = self.build_cmd(prompt);
        self.run_sync_cmd(&cmd, None, cwd, timeout)
    }

    /// Runs an explicit command line, optionally feeding `stdin_text` to
    /// the child. Engines that route the prompt through stdin override
    /// [`run_sync`](Engine::run_sync) and call this directly.
    fn run_sync_cmd(
        &self,
        cmd: &[String],
        stdin_text: Option<&str>,
        cwd: &Path,
        timeout: Option<Duration>,
    ) -> EngineResult {
        let start = Instant::now();

        let mut command = Command::new(&cmd[0]);
        command
            .args(&cmd[1..])
            .current_dir(cwd)
            .stdin(if stdin_text.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in self.extra_env() {
            command.env(key, value);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return EngineResult {
                    error: format!("{}: {e}", cmd[0]),
                    return_code: -1,
                    ..EngineResult::default()
                }
            }
        };

        let stdout_handle = child.stdout.take().map(read_to_string_thread);
        let stderr_handle = child.stderr.take().map(read_to_string_thread);

        if let Some(text) = stdin_text {
            // Readers are already draining the output pipes; closing stdin
            // after the write signals end of prompt.
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(text.as_bytes());
            }
        }

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    terminate_child(&mut child);
                    return EngineResult {
                        error: format!("wait failed: {e}"),
                        return_code: -1,
                        ..EngineResult::default()
                    };
                }
            }
            if let Some(limit) = timeout {
                if start.elapsed() > limit {
                    terminate_child(&mut child);
                    return EngineResult {
                        error: "timeout".to_string(),
                        return_code: -1,
                        ..EngineResult::default()
                    };
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let stdout = stdout_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        let mut result = self.parse_output(&stdout);
        result.return_code = status.code().unwrap_or(-1);
        if result.duration_ms == 0 {
            result.duration_ms = start.elapsed().as_millis() as u64;
        }

        if result.error.is_empty() {
            if let Some(error) = check_stream_errors(&stdout) {
                result.error = error;
            }
        }
        // Some CLIs report argument/permission issues only on stderr and
        // otherwise produce empty stdout, which makes failures look like
        // "did nothing".
        if result.return_code != 0 && result.error.is_empty() {
            result.error = stderr
                .lines()
                .find(|l| !l.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("exit code {}", result.return_code));
        }

        result
    }

    /// Launches the engine asynchronously, streaming stdout to
    /// `stream_file` and stderr (appending) to `log_file`.
    fn run_async(
        &self,
        prompt: &str,
        cwd: &Path,
        stream_file: &Path,
        log_file: &Path,
    ) -> std::io::Result<Child> {
        let cmd = self.build_cmd(prompt);
        self.launch_async_cmd(&cmd, None, cwd, stream_file, log_file)
    }

    /// Launches an explicit command line with redirected streams,
    /// optionally feeding `stdin_text` to the child.
    fn launch_async_cmd(
        &self,
        cmd: &[String],
        stdin_text: Option<&str>,
        cwd: &Path,
        stream_file: &Path,
        log_file: &Path,
    ) -> std::io::Result<Child> {
        let stdout = File::create(stream_file)?;
        let stderr = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;

        let mut command = Command::new(&cmd[0]);
        command
            .args(&cmd[1..])
            .current_dir(cwd)
            .stdin(if stdin_text.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        for (key, value) in self.extra_env() {
            command.env(key, value);
        }

        let mut child = command.spawn()?;
        if let Some(text) = stdin_text {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(text.as_bytes());
            }
        }
        Ok(child)
    }
}

fn read_to_string_thread(
    mut source: impl Read + Send + 'static,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut out = String::new();
        let _ = source.read_to_string(&mut out);
        out
    })
}

/// True when `name` resolves to an executable on PATH (or is a path to one).
#[must_use]
pub fn binary_on_path(name: &str) -> bool {
    let as_path = Path::new(name);
    if as_path.components().count() > 1 {
        return as_path.is_file();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return true;
        }
        if cfg!(windows) {
            return ["exe", "cmd", "bat"]
                .iter()
                .any(|ext| candidate.with_extension(ext).is_file());
        }
        false
    })
}

/// Terminates a child promptly: termination signal, short grace period,
/// then forced kill.
pub fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .args(["-TERM", &child.id().to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Detects well-formed error records in engine output.
///
/// Structured parsing first, so plain text that merely mentions errors is
/// never a false positive. Rate-limit and policy-block messages are
/// normalized for the classifier.
#[must_use]
pub fn check_stream_errors(raw: &str) -> Option<String> {
    for line in raw.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(stripped) else {
            continue;
        };

        match obj.get("error") {
            Some(Value::Object(err)) => {
                let msg = err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .trim();
                let code = err
                    .get("type")
                    .or_else(|| err.get("code"))
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_lowercase();
                if looks_like_rate_limit(&code) {
                    return Some(if msg.is_empty() {
                        "Rate limit exceeded".to_string()
                    } else {
                        msg.to_string()
                    });
                }
                if !msg.is_empty() {
                    return Some(msg.to_string());
                }
            }
            Some(Value::String(err)) => {
                let err = err.trim();
                if looks_like_policy_block(err) {
                    return Some("Blocked by policy".to_string());
                }
                if looks_like_rate_limit(err) {
                    return Some("Rate limit exceeded".to_string());
                }
                if !err.is_empty() {
                    return Some(err.to_string());
                }
            }
            _ => {}
        }

        let event_type = obj
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        if event_type == "error" {
            let msg = obj
                .get("message")
                .or_else(|| obj.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            if msg.is_empty() {
                return Some("Unknown error".to_string());
            }
            if looks_like_policy_block(&msg) {
                return Some("Blocked by policy".to_string());
            }
            if looks_like_rate_limit(&msg) {
                return Some("Rate limit exceeded".to_string());
            }
            return Some(msg);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Script-backed engine for exercising the provided methods.
    struct ShellEngine(&'static str);

    impl Engine for ShellEngine {
        fn name(&self) -> &'static str {
            "shell"
        }
        fn build_cmd(&self, _prompt: &str) -> Vec<String> {
            vec!["sh".to_string(), "-c".to_string(), self.0.to_string()]
        }
        fn parse_output(&self, raw: &str) -> EngineResult {
            EngineResult {
                text: raw.to_string(),
                ..EngineResult::default()
            }
        }
    }

    #[test]
    fn run_sync_captures_output_and_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = ShellEngine("echo ok_stdout; echo ok_stderr 1>&2");

        let result = engine.run_sync("x", tmp.path(), Some(Duration::from_secs(5)));
        assert_eq!(result.return_code, 0);
        assert!(result.text.contains("ok_stdout"));
        assert!(result.error.is_empty());
    }

    #[test]
    fn run_sync_nonzero_exit_surfaces_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = ShellEngine("echo bad 1>&2; exit 7");

        let result = engine.run_sync("x", tmp.path(), Some(Duration::from_secs(5)));
        assert_eq!(result.return_code, 7);
        assert_eq!(result.error, "bad");
    }

    #[test]
    fn run_sync_enforces_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = ShellEngine("sleep 5");

        let result = engine.run_sync("x", tmp.path(), Some(Duration::from_millis(100)));
        assert_eq!(result.error, "timeout");
        assert_eq!(result.return_code, -1);
    }

    #[test]
    fn run_sync_cmd_pipes_stdin_to_the_child() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = ShellEngine("cat");
        let cmd = vec!["sh".to_string(), "-c".to_string(), "cat".to_string()];

        let result =
            engine.run_sync_cmd(&cmd, Some("piped prompt"), tmp.path(), Some(Duration::from_secs(5)));
        assert_eq!(result.return_code, 0);
        assert!(result.text.contains("piped prompt"));
    }

    #[test]
    fn launch_async_cmd_pipes_stdin_to_the_child() {
        let tmp = tempfile::tempdir().unwrap();
        let stream = tmp.path().join("stream.out");
        let log = tmp.path().join("err.log");
        let engine = ShellEngine("cat");
        let cmd = vec!["sh".to_string(), "-c".to_string(), "cat".to_string()];

        let mut child = engine
            .launch_async_cmd(&cmd, Some("async prompt"), tmp.path(), &stream, &log)
            .unwrap();
        child.wait().unwrap();

        assert!(std::fs::read_to_string(&stream).unwrap().contains("async prompt"));
    }

    #[test]
    fn run_async_redirects_streams_to_files() {
        let tmp = tempfile::tempdir().unwrap();
        let stream = tmp.path().join("stream.out");
        let log = tmp.path().join("err.log");
        let engine = ShellEngine("echo to_stream; echo to_log 1>&2");

        let mut child = engine.run_async("x", tmp.path(), &stream, &log).unwrap();
        child.wait().unwrap();

        assert!(std::fs::read_to_string(&stream).unwrap().contains("to_stream"));
        assert!(std::fs::read_to_string(&log).unwrap().contains("to_log"));
    }

    #[test]
    fn binary_on_path_finds_sh() {
        assert!(binary_on_path("sh"));
        assert!(!binary_on_path("definitely-not-a-real-binary-xyz"));
    }

    #[test]
    fn stream_error_object_with_message() {
        let raw = "noise\n{\"error\":{\"message\":\"boom\",\"type\":\"server\"}}\n";
        assert_eq!(check_stream_errors(raw), Some("boom".to_string()));
    }

    #[test]
    fn stream_rate_limit_normalized() {
        let raw = "{\"error\":{\"message\":\"\",\"type\":\"rate_limit_error\"}}\n";
        assert_eq!(check_stream_errors(raw), Some("Rate limit exceeded".to_string()));

        let raw = "{\"error\":\"429 too many requests\"}\n";
        assert_eq!(check_stream_errors(raw), Some("Rate limit exceeded".to_string()));
    }

    #[test]
    fn stream_policy_block_normalized() {
        let raw = "{\"type\":\"error\",\"message\":\"command blocked by policy\"}\n";
        assert_eq!(check_stream_errors(raw), Some("Blocked by policy".to_string()));
    }

    #[test]
    fn plain_text_mentioning_error_is_ignored() {
        let raw = "working on error handling module\nall good\n";
        assert_eq!(check_stream_errors(raw), None);
    }

    #[test]
    fn error_event_without_message_is_unknown() {
        let raw = "{\"type\":\"error\"}\n";
        assert_eq!(check_stream_errors(raw), Some("Unknown error".to_string()));
    }
}
