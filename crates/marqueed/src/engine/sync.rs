use std::collections::HashMap;

use tracing::debug;
use tracing::warn;

use super::store::PresentationStore;
use super::store::SwitchState;

/// The authoritative remote switch map as delivered by the backend:
/// switch id to wire state (`"on"`/`"off"`). May be empty, meaning every
/// switch is Off.
pub type RemoteSnapshot = HashMap<String, String>;

/// Result of applying one remote snapshot to the presentation store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Monotonic sequence number of this reconciliation. Later numbers always
    /// supersede earlier ones, which makes "last callback wins" assertable.
    pub seq: u64,
    /// Switches whose presented state actually changed, in stable id order.
    pub changes: Vec<(String, SwitchState)>,
}

/// Reconciles authoritative remote snapshots into the presentation store.
///
/// The sole writer of confirmed state: whatever it applies overrides any
/// optimistic guess the dispatcher has made. Applying the same snapshot twice
/// yields no changes the second time.
#[derive(Debug, Default)]
pub struct Synchronizer {
    seq: u64,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the last reconciliation, 0 if none yet.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Overwrite presented state to match `snapshot`.
    ///
    /// Every known switch is considered: present-and-"on" means On, anything
    /// else (absent, "off", unrecognized) means Off. Only differing entries
    /// are touched so an unchanged snapshot causes no visual churn. Snapshot
    /// ids outside the known set are logged and skipped; backend data may be
    /// ahead of client configuration.
    pub fn reconcile(
        &mut self,
        store: &mut PresentationStore,
        snapshot: &RemoteSnapshot,
    ) -> Reconciliation {
        self.seq += 1;

        for id in snapshot.keys() {
            if !store.contains(id) {
                warn!("remote snapshot contains unknown switch id, skipping: {id}");
            }
        }

        let mut changes = Vec::new();
        let known: Vec<String> = store.switches().keys().cloned().collect();
        for id in known {
            let should_be = snapshot
                .get(&id)
                .map(|value| SwitchState::from_wire(value))
                .unwrap_or(SwitchState::Off);
            if store.set(&id, should_be) == Some(true) {
                changes.push((id, should_be));
            }
        }

        store.mark_reconciled();
        debug!(
            seq = self.seq,
            changed = changes.len(),
            "applied remote snapshot"
        );

        Reconciliation {
            seq: self.seq,
            changes,
        }
    }
}
