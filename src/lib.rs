//! dagrun - DAG-aware parallel task runner for coding agents.
//!
//! This crate provides the core library functionality for dagrun.

pub mod adapters;
pub mod cli;
pub mod core;
pub mod git;
