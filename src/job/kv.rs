//! `key=value` artifact codec.
//!
//! Every job artifact except the log is a list of `key=value` lines so that
//! shell tooling can read it with `grep`/`cut`. Values are single-line; any
//! embedded newline is flattened to a space on write.

use crate::error::{RunnerError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Parsed `key=value` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvDoc {
    entries: BTreeMap<String, String>,
    order: Vec<String>,
}

impl KvDoc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` lines. Blank lines and `#` comments are skipped;
    /// lines without `=` are ignored. Later duplicates win.
    pub fn parse(content: &str) -> Self {
        let mut doc = Self::new();
        for line in content.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                doc.set(key.trim(), value);
            }
        }
        doc
    }

    /// Read and parse a file; `Ok(None)` when it does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(&content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RunnerError::UserError(format!(
                "failed to read '{}': {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
        let value = value.to_string().replace(['\n', '\r'], " ");
        if self.entries.insert(key.to_string(), value).is_none() {
            self.order.push(key.to_string());
        }
        self
    }

    /// Set `key` only when `value` is present.
    pub fn set_opt<T: ToString>(&mut self, key: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.set(key, value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Non-empty value for `key`.
    pub fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_nonempty(key).map(str::to_string)
    }

    /// Parse `key` as `T`; absent or unparseable values yield `None`.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get_nonempty(key).and_then(|v| v.trim().parse().ok())
    }

    /// Value for `key`, or an error naming the artifact.
    pub fn require(&self, key: &str, artifact: &str) -> Result<&str> {
        self.get_nonempty(key).ok_or_else(|| {
            RunnerError::UserError(format!("{} is missing required field '{}'", artifact, key))
        })
    }

    /// Parse a required field as `T`.
    pub fn require_parsed<T: FromStr>(&self, key: &str, artifact: &str) -> Result<T> {
        let raw = self.require(key, artifact)?;
        raw.trim().parse().map_err(|_| {
            RunnerError::UserError(format!(
                "{} has invalid value for '{}': '{}'",
                artifact, key, raw
            ))
        })
    }

    /// Render as `key=value` lines in insertion order, with a trailing newline.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for key in &self.order {
            if let Some(value) = self.entries.get(key) {
                out.push_str(key);
                out.push('=');
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}
