//! Message types for the engine, split by direction:
//! - `EngineMessage`: inputs from the event sources (backend subscription,
//!   liveness timer, command issuers, write settlements)
//! - `Event`: outputs consumed by the presentation layer

use crate::backend::BackendError;

use super::liveness::ConnectivityStatus;
use super::store::SwitchState;
use super::sync::RemoteSnapshot;

/// Messages INTO the engine. All core work is a reaction to one of these.
#[derive(Debug)]
pub enum EngineMessage {
    /// A full authoritative snapshot of the remote switch map arrived,
    /// including the initial one delivered on subscription attach.
    RemoteSnapshot(RemoteSnapshot),

    /// The device heartbeat value changed. Any rewrite counts, even to the
    /// same logical value.
    HeartbeatObserved,

    /// Periodic liveness check, driven on a fixed cadence.
    LivenessTick,

    /// User intent to set a switch.
    Command {
        switch_id: String,
        desired: SwitchState,
    },

    /// An optimistic remote write settled.
    WriteSettled {
        switch_id: String,
        desired: SwitchState,
        result: Result<(), BackendError>,
    },
}

/// Events OUT of the engine, for whatever renders them.
#[derive(Debug, Clone)]
pub enum Event {
    /// A switch's presented state changed (reconciliation, optimistic write,
    /// or rollback).
    SwitchChanged {
        switch_id: String,
        state: SwitchState,
    },

    /// Device connectivity transitioned. Fired on transitions only, never on
    /// every liveness tick.
    ConnectivityChanged(ConnectivityStatus),

    /// A remote write settled: a transient positive acknowledgement on
    /// success, a user-visible failure notice otherwise.
    CommandAcknowledged { switch_id: String, success: bool },
}
