//! Process role selection.
//!
//! The master re-executes the current program for every worker and injects
//! the worker identity through environment variables. A process that finds
//! [`ENV_WORKER_TYPE`] set is a worker; otherwise it is the master.

use crate::core::{Uid, WorkerId};

/// Application type of the worker.
pub const ENV_WORKER_TYPE: &str = "WORKERVISOR_WORKER_TYPE";
/// Uid of the worker slot.
pub const ENV_WORKER_UID: &str = "WORKERVISOR_WORKER_UID";
/// Master-assigned worker id.
pub const ENV_WORKER_ID: &str = "WORKERVISOR_WORKER_ID";
/// File descriptor of the shared listening socket (cluster mode only).
pub const ENV_LISTEN_FD: &str = "WORKERVISOR_LISTEN_FD";

/// Identity handed to a worker by its master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub app_type: String,
    pub uid: Option<Uid>,
    pub id: Option<WorkerId>,
    pub listen_fd: Option<i32>,
}

impl WorkerIdentity {
    /// Identity with only a type, for running a worker by hand.
    pub fn new(app_type: impl Into<String>) -> Self {
        Self {
            app_type: app_type.into(),
            uid: None,
            id: None,
            listen_fd: None,
        }
    }
}

/// Which side of the cluster this process is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker(WorkerIdentity),
}

impl Role {
    /// Reads the role from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        match get(ENV_WORKER_TYPE).filter(|t| !t.is_empty()) {
            None => Role::Master,
            Some(app_type) => Role::Worker(WorkerIdentity {
                app_type,
                uid: get(ENV_WORKER_UID),
                id: get(ENV_WORKER_ID).and_then(|v| v.parse().ok()),
                listen_fd: get(ENV_LISTEN_FD).and_then(|v| v.parse().ok()),
            }),
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn no_type_means_master() {
        assert!(Role::from_lookup(lookup(&[])).is_master());
        assert!(Role::from_lookup(lookup(&[(ENV_WORKER_TYPE, "")])).is_master());
    }

    #[test]
    fn worker_identity_from_env() {
        let role = Role::from_lookup(lookup(&[
            (ENV_WORKER_TYPE, "web"),
            (ENV_WORKER_UID, "web:02"),
            (ENV_WORKER_ID, "7"),
            (ENV_LISTEN_FD, "not-a-number"),
        ]));
        assert_eq!(
            role,
            Role::Worker(WorkerIdentity {
                app_type: "web".into(),
                uid: Some("web:02".into()),
                id: Some(7),
                listen_fd: None,
            })
        );
    }
}
