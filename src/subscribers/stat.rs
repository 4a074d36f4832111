//! # Stat: per-uid worker statistics.
//!
//! [`Stat`] folds lifecycle events into one record per uid. Records survive
//! the worker instance (a crashed `web:01` keeps its counters and comes back
//! with `restarted += 1`), and are dropped only by [`Stat::remove`].
//!
//! The supervisor runtime feeds its own `Stat` synchronously, before the event
//! reaches the bus, so a caller that just got `Ok(id)` from `add_worker` reads
//! an up-to-date record. A standalone `Stat` can also be registered as a
//! regular [`Subscribe`]r.
//!
//! ## Rules
//! - `worker.start` for a known uid: `restarted += 1`, new id/pid, online
//! - other worker events whose id is not the current instance are ignored
//! - `errors`/`warnings` saturate at 1000 and render as `"1000+"`
//! - uptime renders as `D:HH:MM:SS`, memory as `b`/`K`/`M`/`G`

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use tokio::time::Instant;

use crate::core::{Uid, WorkerId};
use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Saturation point of the error and warning counters.
pub const MAX_REPORTS: u32 = 1000;

const MEMORY_UNITS: [&str; 4] = ["b", "K", "M", "G"];

#[derive(Debug, Clone)]
struct Entry {
    id: Option<WorkerId>,
    app_type: String,
    pid: Option<u32>,
    started: Option<Instant>,
    restarted: u32,
    errors: u32,
    warnings: u32,
    memory: u64,
}

impl Entry {
    fn is_current(&self, id: WorkerId) -> bool {
        self.id == Some(id)
    }
}

/// Shared statistics store. Cheap to clone.
#[derive(Clone, Default)]
pub struct Stat {
    entries: Arc<Mutex<BTreeMap<Uid, Entry>>>,
}

impl Stat {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Uid, Entry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Applies one event.
    pub fn observe(&self, ev: &Event) {
        let Some(w) = &ev.worker else { return };
        let mut entries = self.lock();

        if ev.kind == EventKind::WorkerStart {
            entries
                .entry(w.uid.clone())
                .and_modify(|e| {
                    e.id = Some(w.id);
                    e.pid = w.pid;
                    e.started = Some(Instant::now());
                    e.restarted = e.restarted.saturating_add(1);
                })
                .or_insert_with(|| Entry {
                    id: Some(w.id),
                    app_type: w.app_type.clone(),
                    pid: w.pid,
                    started: Some(Instant::now()),
                    restarted: 0,
                    errors: 0,
                    warnings: 0,
                    memory: 0,
                });
            return;
        }

        let Some(entry) = entries.get_mut(&w.uid).filter(|e| e.is_current(w.id)) else {
            return;
        };
        match ev.kind {
            EventKind::WorkerStop => {
                entry.id = None;
                entry.pid = None;
                entry.started = None;
            }
            EventKind::WorkerError => entry.errors = (entry.errors + 1).min(MAX_REPORTS),
            EventKind::WorkerWarning => entry.warnings = (entry.warnings + 1).min(MAX_REPORTS),
            EventKind::WorkerMemoryUsage => {
                if let Some(bytes) = ev.bytes {
                    entry.memory = bytes;
                }
            }
            _ => {}
        }
    }

    /// Snapshot of one uid.
    pub fn get(&self, uid: &str) -> Option<WorkerStat> {
        self.lock().get(uid).map(|e| WorkerStat::from_entry(uid, e))
    }

    /// Snapshot of every uid, ordered by uid.
    pub fn all(&self) -> Vec<WorkerStat> {
        self.lock()
            .iter()
            .map(|(uid, e)| WorkerStat::from_entry(uid, e))
            .collect()
    }

    /// Zeroes `restarted`, `errors` and `warnings` of a uid.
    pub fn reset(&self, uid: &str) {
        if let Some(e) = self.lock().get_mut(uid) {
            e.restarted = 0;
            e.errors = 0;
            e.warnings = 0;
        }
    }

    /// Drops the record of a uid.
    pub fn remove(&self, uid: &str) -> bool {
        self.lock().remove(uid).is_some()
    }
}

#[async_trait]
impl Subscribe for Stat {
    async fn on_event(&self, event: &Event) {
        self.observe(event);
    }

    fn name(&self) -> &'static str {
        "stat"
    }
}

/// Serializable view of one uid's statistics.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStat {
    pub uid: Uid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<WorkerId>,
    #[serde(rename = "type")]
    pub app_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub restarted: u32,
    pub errors: Saturating,
    pub warnings: Saturating,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl WorkerStat {
    fn from_entry(uid: &str, e: &Entry) -> Self {
        Self {
            uid: uid.to_string(),
            id: e.id,
            app_type: e.app_type.clone(),
            pid: e.pid,
            restarted: e.restarted,
            errors: Saturating(e.errors),
            warnings: Saturating(e.warnings),
            status: if e.id.is_some() { "online" } else { "offline" },
            uptime: e.started.map(|s| format_uptime(s.elapsed())),
            memory: e.started.map(|_| format_memory(e.memory)),
        }
    }

    /// True while an instance of this uid is running.
    pub fn is_online(&self) -> bool {
        self.id.is_some()
    }
}

/// Counter that renders as `"1000+"` once saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Saturating(pub u32);

impl fmt::Display for Saturating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= MAX_REPORTS {
            write!(f, "{MAX_REPORTS}+")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Serialize for Saturating {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if self.0 >= MAX_REPORTS {
            s.collect_str(self)
        } else {
            s.serialize_u32(self.0)
        }
    }
}

/// Formats an uptime as `D:HH:MM:SS`.
pub fn format_uptime(d: Duration) -> String {
    let secs = d.as_secs();
    let (days, rem) = (secs / 86_400, secs % 86_400);
    format!(
        "{days}:{:02}:{:02}:{:02}",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Formats a byte count with `b`/`K`/`M`/`G` units (powers of 1000).
pub fn format_memory(bytes: u64) -> String {
    let mut used = bytes as f64;
    let mut unit = 0;
    while used > 900.0 && unit + 1 < MEMORY_UNITS.len() {
        used /= 1000.0;
        unit += 1;
    }
    let rounded = (used * 100.0).round() / 100.0;
    format!("{rounded}{}", MEMORY_UNITS[unit])
}
