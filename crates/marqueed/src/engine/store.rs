use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use super::liveness::ConnectivityStatus;

/// On/off state of a single switch.
///
/// Serializes to the wire strings `"on"`/`"off"` used by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    #[default]
    Off,
}

impl SwitchState {
    pub fn is_on(self) -> bool {
        matches!(self, SwitchState::On)
    }

    /// The opposite state. Used to revert a failed optimistic write.
    pub fn complement(self) -> Self {
        match self {
            SwitchState::On => SwitchState::Off,
            SwitchState::Off => SwitchState::On,
        }
    }

    /// Parse a backend value. Anything other than `"on"` is treated as Off.
    pub fn from_wire(value: &str) -> Self {
        if value == "on" {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
        }
    }
}

/// Locally presented state of every known switch.
///
/// The switch set is fixed at construction; entries are never added or removed
/// afterwards. Writes come from two places only: the synchronizer (reconciling
/// an authoritative remote snapshot) and the dispatcher (optimistic command
/// application and rollback). The remote snapshot always has final authority.
#[derive(Debug)]
pub struct PresentationStore {
    switches: BTreeMap<String, SwitchState>,
    /// False until the first authoritative reconciliation. Until then the
    /// contents are only a rendering hint carried over from the last run.
    reconciled: bool,
}

impl PresentationStore {
    /// Create a store with every known switch Off.
    pub fn new<I, S>(known_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            switches: known_ids
                .into_iter()
                .map(|id| (id.into(), SwitchState::Off))
                .collect(),
            reconciled: false,
        }
    }

    /// Seed from a persisted hint: the set of ids last shown on.
    ///
    /// Ids outside the known set are ignored. Only valid before the first
    /// reconciliation; afterwards the remote snapshot owns the contents.
    pub fn seed_hint<'a>(&mut self, on_ids: impl IntoIterator<Item = &'a String>) {
        if self.reconciled {
            return;
        }
        for id in on_ids {
            if let Some(state) = self.switches.get_mut(id) {
                *state = SwitchState::On;
            }
        }
    }

    pub fn contains(&self, switch_id: &str) -> bool {
        self.switches.contains_key(switch_id)
    }

    pub fn get(&self, switch_id: &str) -> Option<SwitchState> {
        self.switches.get(switch_id).copied()
    }

    /// Set a switch's presented state.
    ///
    /// Returns `Some(true)` if the state actually changed, `Some(false)` if it
    /// already held that value, and `None` for an unknown id.
    pub fn set(&mut self, switch_id: &str, state: SwitchState) -> Option<bool> {
        let slot = self.switches.get_mut(switch_id)?;
        let changed = *slot != state;
        *slot = state;
        Some(changed)
    }

    pub fn mark_reconciled(&mut self) {
        self.reconciled = true;
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    /// Ids of every switch currently shown on, for the persisted hint.
    pub fn on_ids(&self) -> BTreeSet<String> {
        self.switches
            .iter()
            .filter(|(_, state)| state.is_on())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn switches(&self) -> &BTreeMap<String, SwitchState> {
        &self.switches
    }
}

/// Full snapshot published to readers (HTTP API, tests) on every change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub switches: BTreeMap<String, SwitchState>,
    pub connectivity: ConnectivityStatus,
    /// Sequence number of the last applied reconciliation; 0 means the
    /// presented state is still only the restart hint.
    pub seq: u64,
    pub reconciled: bool,
}
