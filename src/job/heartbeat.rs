//! Liveness heartbeat (`<beads>.heartbeat`).
//!
//! Written periodically by the Monitor. A heartbeat is evidence of progress
//! only; success or failure is never decided from it.

use super::kv::KvDoc;
use super::meta::format_ts;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// What the Monitor observed on its last tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatKind {
    /// CPU time advanced.
    CpuProgress,
    /// The log grew.
    LogGrowth,
    /// Process alive with no measurable progress.
    Alive,
}

impl HeartbeatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatKind::CpuProgress => "cpu_progress",
            HeartbeatKind::LogGrowth => "log_growth",
            HeartbeatKind::Alive => "alive",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cpu_progress" => Some(HeartbeatKind::CpuProgress),
            "log_growth" => Some(HeartbeatKind::LogGrowth),
            "alive" => Some(HeartbeatKind::Alive),
            _ => None,
        }
    }

    pub fn is_progress(&self) -> bool {
        !matches!(self, HeartbeatKind::Alive)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    pub run_instance: String,
    pub count: u64,
    pub last_type: HeartbeatKind,
    pub last_seen: DateTime<Utc>,
    /// Most recent tick that showed progress.
    pub last_progress: Option<DateTime<Utc>>,
    pub cpu_time_sec: f64,
    pub log_bytes: u64,
}

impl Heartbeat {
    /// First heartbeat of a run.
    pub fn initial(run_instance: &str, now: DateTime<Utc>) -> Self {
        Self {
            run_instance: run_instance.to_string(),
            count: 0,
            last_type: HeartbeatKind::Alive,
            last_seen: now,
            last_progress: None,
            cpu_time_sec: 0.0,
            log_bytes: 0,
        }
    }

    /// Fold one observation into the heartbeat.
    pub fn observe(&mut self, now: DateTime<Utc>, cpu_time_sec: Option<f64>, log_bytes: u64) {
        let cpu = cpu_time_sec.unwrap_or(self.cpu_time_sec);
        let kind = if cpu > self.cpu_time_sec {
            HeartbeatKind::CpuProgress
        } else if log_bytes > self.log_bytes {
            HeartbeatKind::LogGrowth
        } else {
            HeartbeatKind::Alive
        };

        self.count += 1;
        self.last_type = kind;
        self.last_seen = now;
        if kind.is_progress() {
            self.last_progress = Some(now);
        }
        self.cpu_time_sec = cpu.max(self.cpu_time_sec);
        self.log_bytes = log_bytes;
    }

    pub fn to_kv(&self) -> KvDoc {
        let mut doc = KvDoc::new();
        doc.set("run_instance", &self.run_instance)
            .set("count", self.count)
            .set("last_type", self.last_type.as_str())
            .set("last_seen", format_ts(&self.last_seen))
            .set_opt("last_progress", self.last_progress.as_ref().map(format_ts))
            .set("cpu_time_sec", format!("{:.2}", self.cpu_time_sec))
            .set("log_bytes", self.log_bytes);
        doc
    }

    /// Parse a heartbeat; malformed files yield `None` rather than an error.
    pub fn from_kv(doc: &KvDoc) -> Option<Self> {
        Some(Self {
            run_instance: doc.get_string("run_instance").unwrap_or_default(),
            count: doc.get_parsed("count")?,
            last_type: doc
                .get("last_type")
                .and_then(HeartbeatKind::from_str)
                .unwrap_or(HeartbeatKind::Alive),
            last_seen: doc.get_parsed("last_seen")?,
            last_progress: doc.get_parsed("last_progress"),
            cpu_time_sec: doc.get_parsed("cpu_time_sec").unwrap_or(0.0),
            log_bytes: doc.get_parsed("log_bytes").unwrap_or(0),
        })
    }

    pub fn read(path: &Path) -> Result<Option<Self>> {
        Ok(KvDoc::read(path)?.and_then(|doc| Self::from_kv(&doc)))
    }
}
