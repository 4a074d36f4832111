//! # Uid registry - stable worker identities.
//!
//! A uid names a worker *slot* (`"web:01"`), not a process. It survives crash
//! restarts and explicit restarts of the same slot, so statistics and external
//! references stay attached to it.
//!
//! ## Architecture
//! ```text
//! type ─► uid ─► refcount
//!
//! generate(type)   → first "type:NN" with no entry, reserved (count = 1)
//! reserve(uid)     → count += 1 (creates the entry if needed)
//! release(uid)     → count -= 1; at 0 the entry stays *parked*
//! free(uid)        → drops a parked entry
//! ```
//!
//! ## Rules
//! - A count never goes below zero; releasing an unreserved uid panics
//! - Parked uids are never handed out by `generate`, only reused explicitly
//! - Counters are formatted with at least two digits (`01`, `10`, `100`)

use std::collections::{BTreeMap, HashMap};

use crate::core::Uid;
use crate::error::SupervisorError;

/// Reference-counted uid bookkeeping, owned by the supervisor runtime.
#[derive(Debug, Default)]
pub(crate) struct UidRegistry {
    types: HashMap<String, BTreeMap<Uid, usize>>,
}

impl UidRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Builds the uid for a type and counter.
    pub(crate) fn format(app_type: &str, n: u32) -> Uid {
        format!("{app_type}:{n:02}")
    }

    /// Splits a uid into its application type.
    pub(crate) fn type_of(uid: &str) -> Option<&str> {
        uid.rsplit_once(':').map(|(t, _)| t)
    }

    /// Returns the first free uid for `app_type` and reserves it.
    pub(crate) fn generate(&mut self, app_type: &str) -> Uid {
        let slots = self.types.entry(app_type.to_string()).or_default();
        let uid = (1u32..)
            .map(|n| Self::format(app_type, n))
            .find(|uid| !slots.contains_key(uid))
            .unwrap_or_else(|| unreachable!("u32 counter space exhausted"));
        slots.insert(uid.clone(), 1);
        uid
    }

    /// Increments the reference count of `uid`, creating the entry if needed.
    pub(crate) fn reserve(&mut self, app_type: &str, uid: &str) {
        *self
            .types
            .entry(app_type.to_string())
            .or_default()
            .entry(uid.to_string())
            .or_insert(0) += 1;
    }

    /// Decrements the reference count of `uid`; the entry is parked at zero.
    ///
    /// # Panics
    /// If `uid` is not currently reserved.
    pub(crate) fn release(&mut self, app_type: &str, uid: &str) {
        let count = self
            .types
            .get_mut(app_type)
            .and_then(|slots| slots.get_mut(uid))
            .filter(|count| **count > 0);

        match count {
            Some(count) => *count -= 1,
            None => panic!(
                "{}",
                SupervisorError::RegistryInvariant {
                    uid: uid.to_string()
                }
            ),
        }
    }

    /// Drops a parked uid so it can be generated again.
    pub(crate) fn free(&mut self, uid: &str) -> Result<(), SupervisorError> {
        let app_type = Self::type_of(uid).ok_or_else(|| SupervisorError::not_found(uid))?;
        let slots = self
            .types
            .get_mut(app_type)
            .ok_or_else(|| SupervisorError::not_found(uid))?;

        match slots.get(uid) {
            None => Err(SupervisorError::not_found(uid)),
            Some(0) => {
                slots.remove(uid);
                if slots.is_empty() {
                    self.types.remove(app_type);
                }
                Ok(())
            }
            Some(_) => Err(SupervisorError::UidInUse {
                uid: uid.to_string(),
            }),
        }
    }

    /// Current reference count, `None` if the uid is unknown.
    #[cfg(test)]
    pub(crate) fn count(&self, uid: &str) -> Option<usize> {
        let app_type = Self::type_of(uid)?;
        self.types.get(app_type)?.get(uid).copied()
    }

    /// Uids with a zero count.
    #[cfg(test)]
    pub(crate) fn parked(&self) -> Vec<Uid> {
        self.types
            .values()
            .flat_map(|slots| slots.iter())
            .filter(|(_, count)| **count == 0)
            .map(|(uid, _)| uid.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_two_digit_uids_in_order() {
        let mut reg = UidRegistry::new();
        assert_eq!(reg.generate("web"), "web:01");
        assert_eq!(reg.generate("web"), "web:02");
        assert_eq!(reg.generate("jobs"), "jobs:01");
        assert_eq!(UidRegistry::format("web", 100), "web:100");
    }

    #[test]
    fn generate_fills_gaps_but_skips_parked() {
        let mut reg = UidRegistry::new();
        let a = reg.generate("web");
        let b = reg.generate("web");
        let c = reg.generate("web");
        assert_eq!((a.as_str(), c.as_str()), ("web:01", "web:03"));

        reg.release("web", &b);
        assert_eq!(reg.count(&b), Some(0));
        assert_eq!(reg.generate("web"), "web:04");

        reg.free(&b).unwrap();
        assert_eq!(reg.count(&b), None);
        assert_eq!(reg.generate("web"), "web:02");
    }

    #[test]
    fn reserve_counts_overlapping_instances() {
        let mut reg = UidRegistry::new();
        let uid = reg.generate("web");
        reg.reserve("web", &uid);
        assert_eq!(reg.count(&uid), Some(2));

        reg.release("web", &uid);
        assert!(matches!(
            reg.free(&uid),
            Err(SupervisorError::UidInUse { .. })
        ));
        reg.release("web", &uid);
        assert_eq!(reg.parked(), vec![uid.clone()]);
        assert!(reg.free(&uid).is_ok());
    }

    #[test]
    fn free_unknown_is_not_found() {
        let mut reg = UidRegistry::new();
        assert!(matches!(
            reg.free("web:01"),
            Err(SupervisorError::NotFound { .. })
        ));
        assert!(matches!(
            reg.free("garbage"),
            Err(SupervisorError::NotFound { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "released more times than it was reserved")]
    fn release_below_zero_panics() {
        let mut reg = UidRegistry::new();
        let uid = reg.generate("web");
        reg.release("web", &uid);
        reg.release("web", &uid);
    }

    #[test]
    fn type_is_everything_before_the_last_colon() {
        assert_eq!(UidRegistry::type_of("web:01"), Some("web"));
        assert_eq!(UidRegistry::type_of("nocolon"), None);
    }
}
