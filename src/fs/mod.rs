//! Filesystem utilities for dx-runner.
//!
//! The filesystem is the only persistence and IPC layer between the Runner
//! CLI, the Monitor, and later readers, so writes go through the atomic
//! helpers here.

pub mod atomic;

pub use atomic::{atomic_write, atomic_write_file, write_once};
