use std::collections::HashMap;
use std::time::Instant;

use super::store::SwitchState;

/// An in-flight optimistic write. At most one is logically active per switch:
/// a rapid re-toggle simply replaces the previous record, and the superseded
/// write's settlement is then ignored.
#[derive(Debug, Clone, Copy)]
pub struct PendingCommand {
    pub desired: SwitchState,
    pub issued_at: Instant,
}

/// Outcome classification for a settled remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The write succeeded and still matches the active intent. No state
    /// mutation needed; the optimistic value already matches.
    Acknowledged,
    /// The write failed while still the active intent: revert the switch to
    /// the carried state (the complement of what was requested).
    RolledBack(SwitchState),
    /// A newer command for the same switch was issued before this write
    /// settled. The newer intent owns the switch now; do not touch state.
    Superseded,
}

/// Tracks optimistic writes from issue to settlement.
///
/// The dispatcher never serializes or queues: the last write submitted
/// determines the desired outcome, and the synchronizer remains the ultimate
/// tie-breaker over anything recorded here.
#[derive(Debug, Default)]
pub struct Dispatcher {
    pending: HashMap<String, PendingCommand>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly issued command, replacing any in-flight one for the
    /// same switch.
    pub fn record(&mut self, switch_id: &str, desired: SwitchState, now: Instant) {
        self.pending.insert(
            switch_id.to_string(),
            PendingCommand {
                desired,
                issued_at: now,
            },
        );
    }

    /// Classify a settled write for `switch_id` that requested `desired`.
    pub fn settle(&mut self, switch_id: &str, desired: SwitchState, succeeded: bool) -> Settlement {
        match self.pending.get(switch_id) {
            Some(pending) if pending.desired == desired => {
                self.pending.remove(switch_id);
                if succeeded {
                    Settlement::Acknowledged
                } else {
                    Settlement::RolledBack(desired.complement())
                }
            }
            _ => Settlement::Superseded,
        }
    }

    pub fn is_pending(&self, switch_id: &str) -> bool {
        self.pending.contains_key(switch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_settlement_acknowledges() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.record("a", SwitchState::On, Instant::now());

        assert_eq!(
            dispatcher.settle("a", SwitchState::On, true),
            Settlement::Acknowledged
        );
        assert!(!dispatcher.is_pending("a"));
    }

    #[test]
    fn test_failed_settlement_rolls_back_to_complement() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.record("a", SwitchState::On, Instant::now());

        assert_eq!(
            dispatcher.settle("a", SwitchState::On, false),
            Settlement::RolledBack(SwitchState::Off)
        );
    }

    #[test]
    fn test_reissue_supersedes_previous_write() {
        let mut dispatcher = Dispatcher::new();
        let now = Instant::now();
        dispatcher.record("a", SwitchState::On, now);
        dispatcher.record("a", SwitchState::Off, now);

        // The first write settles (failed) after being superseded: the newer
        // intent must not be rolled over.
        assert_eq!(
            dispatcher.settle("a", SwitchState::On, false),
            Settlement::Superseded
        );
        assert!(dispatcher.is_pending("a"));

        assert_eq!(
            dispatcher.settle("a", SwitchState::Off, true),
            Settlement::Acknowledged
        );
    }

    #[test]
    fn test_settlement_without_record_is_superseded() {
        let mut dispatcher = Dispatcher::new();
        assert_eq!(
            dispatcher.settle("a", SwitchState::On, true),
            Settlement::Superseded
        );
    }
}
