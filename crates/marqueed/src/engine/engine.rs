use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::dispatcher::Dispatcher;
use super::dispatcher::Settlement;
use super::liveness::LivenessMonitor;
use super::message::EngineMessage;
use super::message::Event;
use super::store::EngineSnapshot;
use super::store::PresentationStore;
use super::store::SwitchState;
use super::sync::Synchronizer;
use crate::backend::Backend;
use crate::backend::BackendEvent;
use crate::persist::HintFile;

/// Capacity for the event-source → engine message channel.
const ENGINE_CHANNEL_SIZE: usize = 1024;

/// Capacity for the engine → presentation event channel.
const EVENT_CHANNEL_SIZE: usize = 64;

/// How long the backend poll task may hold the backend lock before yielding
/// so that in-flight writes are not starved.
const BACKEND_POLL_WINDOW: Duration = Duration::from_millis(100);

/// Handle for issuing switch commands into the engine.
#[derive(Clone)]
pub struct CommandSender(mpsc::Sender<EngineMessage>);

impl CommandSender {
    pub async fn issue(&self, switch_id: String, desired: SwitchState) {
        let _ = self
            .0
            .send(EngineMessage::Command { switch_id, desired })
            .await;
    }
}

/// marqueed engine
///
/// Single consumer of every asynchronous event source: remote snapshots and
/// heartbeats from the backend subscription, the liveness tick timer, user
/// commands, and write settlements. Because all of them funnel through one
/// message channel, the presentation store has exactly one writer and the
/// races the system must survive (dispatcher vs. synchronizer) resolve as
/// last-reconciliation-wins.
pub struct Engine<B: Backend> {
    backend: Arc<Mutex<B>>,
    store: PresentationStore,
    sync: Synchronizer,
    liveness: LivenessMonitor,
    dispatcher: Dispatcher,
    hint: HintFile,

    message_tx: mpsc::Sender<EngineMessage>,
    message_rx: mpsc::Receiver<EngineMessage>,

    /// Presentation-facing transition events.
    events: broadcast::Sender<Event>,

    /// Full state snapshots for readers (HTTP API).
    snapshot_tx: watch::Sender<EngineSnapshot>,
}

impl<B: Backend + 'static> Engine<B> {
    /// Create an engine over `backend` for a fixed set of switch ids.
    ///
    /// The persisted hint seeds the initial presentation; it is only a
    /// rendering hint and the first reconciliation overwrites it.
    pub fn new(
        backend: B,
        known_ids: &[String],
        liveness_timeout: Duration,
        hint: HintFile,
    ) -> Self {
        let (message_tx, message_rx) = mpsc::channel(ENGINE_CHANNEL_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let mut store = PresentationStore::new(known_ids.iter().cloned());
        match hint.load() {
            Ok(on_ids) => store.seed_hint(&on_ids),
            Err(e) => warn!("failed to load presentation hint: {e}"),
        }

        let liveness = LivenessMonitor::new(liveness_timeout);
        let (snapshot_tx, _) = watch::channel(EngineSnapshot {
            switches: store.switches().clone(),
            connectivity: liveness.status(),
            seq: 0,
            reconciled: false,
        });

        Self {
            backend: Arc::new(Mutex::new(backend)),
            store,
            sync: Synchronizer::new(),
            liveness,
            dispatcher: Dispatcher::new(),
            hint,
            message_tx,
            message_rx,
            events,
            snapshot_tx,
        }
    }

    /// Handle for issuing commands (cheap to clone).
    pub fn command_sender(&self) -> CommandSender {
        CommandSender(self.message_tx.clone())
    }

    /// Subscribe to presentation-facing transition events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Watch full state snapshots. The receiver always holds the latest.
    pub fn watch_state(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Spawn the backend subscription task: connects, then forwards remote
    /// snapshots and heartbeat observations into the engine channel.
    pub fn start_backend(&self) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            {
                let mut backend = backend.lock().await;
                if let Err(e) = backend.connect().await {
                    error!("backend connect failed: {e}");
                    return;
                }
            }

            loop {
                // Poll with a bounded lock hold so write tasks can interleave.
                let event = {
                    let mut backend = backend.lock().await;
                    tokio::time::timeout(BACKEND_POLL_WINDOW, backend.poll_event())
                        .await
                        .unwrap_or_default()
                };

                let forwarded = match event {
                    Some(BackendEvent::Snapshot(map)) => {
                        tx.send(EngineMessage::RemoteSnapshot(map)).await
                    }
                    Some(BackendEvent::Heartbeat) => {
                        tx.send(EngineMessage::HeartbeatObserved).await
                    }
                    None => {
                        tokio::task::yield_now().await;
                        continue;
                    }
                };
                if forwarded.is_err() {
                    break;
                }
            }
            info!("backend event task exiting");
        })
    }

    /// Spawn the liveness tick timer. The cadence must be strictly finer than
    /// the liveness timeout (enforced at config load).
    pub fn start_liveness_ticker(&self, cadence: Duration) -> JoinHandle<()> {
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(EngineMessage::LivenessTick).await.is_err() {
                    break;
                }
            }
        })
    }

    /// Run the engine's event loop.
    pub async fn run(mut self) {
        info!("engine starting");
        while let Some(msg) = self.message_rx.recv().await {
            self.handle_message(msg).await;
        }
        info!("engine shutting down");
    }

    async fn handle_message(&mut self, msg: EngineMessage) {
        match msg {
            EngineMessage::RemoteSnapshot(snapshot) => {
                let rec = self.sync.reconcile(&mut self.store, &snapshot);
                for (switch_id, state) in &rec.changes {
                    self.emit(Event::SwitchChanged {
                        switch_id: switch_id.clone(),
                        state: *state,
                    });
                }
                self.persist_hint();
                self.publish_snapshot();
            }

            EngineMessage::HeartbeatObserved => {
                if let Some(status) = self.liveness.observe_heartbeat(Instant::now()) {
                    info!("device connectivity: {status:?}");
                    self.emit(Event::ConnectivityChanged(status));
                    self.publish_snapshot();
                }
            }

            EngineMessage::LivenessTick => {
                if let Some(status) = self.liveness.tick(Instant::now()) {
                    info!("device connectivity: {status:?}");
                    self.emit(Event::ConnectivityChanged(status));
                    self.publish_snapshot();
                }
            }

            EngineMessage::Command { switch_id, desired } => {
                if !self.store.contains(&switch_id) {
                    warn!("ignoring command for unknown switch: {switch_id}");
                    return;
                }
                info!("command: set {} {}", switch_id, desired.as_wire());

                // Optimistic: the user sees the change immediately. The next
                // reconciliation re-confirms or corrects it.
                if self.store.set(&switch_id, desired) == Some(true) {
                    self.emit(Event::SwitchChanged {
                        switch_id: switch_id.clone(),
                        state: desired,
                    });
                }
                self.persist_hint();
                self.publish_snapshot();
                self.dispatcher.record(&switch_id, desired, Instant::now());

                let backend = Arc::clone(&self.backend);
                let tx = self.message_tx.clone();
                tokio::spawn(async move {
                    let result = {
                        let mut backend = backend.lock().await;
                        backend.write_switch(&switch_id, desired).await
                    };
                    let _ = tx
                        .send(EngineMessage::WriteSettled {
                            switch_id,
                            desired,
                            result,
                        })
                        .await;
                });
            }

            EngineMessage::WriteSettled {
                switch_id,
                desired,
                result,
            } => {
                // The switch set is fixed, but a settlement must still find
                // its switch before touching state.
                if !self.store.contains(&switch_id) {
                    warn!("dropping settlement for unknown switch: {switch_id}");
                    return;
                }

                let succeeded = result.is_ok();
                if let Err(e) = &result {
                    warn!("write for switch {switch_id} failed: {e}");
                }

                match self.dispatcher.settle(&switch_id, desired, succeeded) {
                    Settlement::Acknowledged => {
                        self.emit(Event::CommandAcknowledged {
                            switch_id,
                            success: true,
                        });
                    }
                    Settlement::RolledBack(state) => {
                        // A failed write must not leave the UI claiming a
                        // state that was never confirmed.
                        if self.store.set(&switch_id, state) == Some(true) {
                            self.emit(Event::SwitchChanged {
                                switch_id: switch_id.clone(),
                                state,
                            });
                        }
                        self.persist_hint();
                        self.publish_snapshot();
                        self.emit(Event::CommandAcknowledged {
                            switch_id,
                            success: false,
                        });
                    }
                    Settlement::Superseded => {
                        debug!("settlement for {switch_id} superseded by a newer command");
                    }
                }
            }
        }
    }

    fn emit(&self, event: Event) {
        // A send error only means no subscriber is currently listening.
        let _ = self.events.send(event);
    }

    fn persist_hint(&self) {
        if let Err(e) = self.hint.save(&self.store.on_ids()) {
            warn!("failed to persist presentation hint: {e}");
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(EngineSnapshot {
            switches: self.store.switches().clone(),
            connectivity: self.liveness.status(),
            seq: self.sync.seq(),
            reconciled: self.store.is_reconciled(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;
    use crate::backend::BackendError;
    use crate::backend::MockBackend;
    use crate::engine::liveness::ConnectivityStatus;

    const TIMEOUT: Duration = Duration::from_millis(12_000);

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn snapshot(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(id, state)| (id.to_string(), state.to_string()))
            .collect()
    }

    fn test_engine(names: &[&str]) -> (Engine<MockBackend>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let hint = HintFile::new(dir.path().join("hint.json"));
        let engine = Engine::new(MockBackend::new(), &ids(names), TIMEOUT, hint);
        (engine, dir)
    }

    fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Issue a command and hand back the settlement message the spawned
    /// write task reports, so tests control exactly when it is applied.
    async fn issue_and_capture_settlement(
        engine: &mut Engine<MockBackend>,
        switch_id: &str,
        desired: SwitchState,
    ) -> EngineMessage {
        engine
            .handle_message(EngineMessage::Command {
                switch_id: switch_id.to_string(),
                desired,
            })
            .await;
        engine.message_rx.recv().await.unwrap()
    }

    #[tokio::test]
    async fn test_scenario_optimistic_toggle_then_remote_update() {
        let (mut engine, _dir) = test_engine(&["a", "b"]);
        let mut events = engine.subscribe_events();

        // Initial remote snapshot: only "a" is on.
        engine
            .handle_message(EngineMessage::RemoteSnapshot(snapshot(&[("a", "on")])))
            .await;
        assert_eq!(engine.store.get("a"), Some(SwitchState::On));
        assert_eq!(engine.store.get("b"), Some(SwitchState::Off));

        // User toggles "b" on: immediate optimistic presentation.
        let settled = issue_and_capture_settlement(&mut engine, "b", SwitchState::On).await;
        assert_eq!(engine.store.get("b"), Some(SwitchState::On));

        // The write succeeds: acknowledged, no further state change.
        assert!(matches!(
            &settled,
            EngineMessage::WriteSettled { switch_id, result: Ok(()), .. } if switch_id == "b"
        ));
        engine.handle_message(settled).await;
        assert_eq!(engine.store.get("b"), Some(SwitchState::On));

        let written = engine.backend.lock().await.written.clone();
        assert_eq!(written, vec![("b".to_string(), SwitchState::On)]);

        // Remote then emits {a: off, b: on}.
        engine
            .handle_message(EngineMessage::RemoteSnapshot(snapshot(&[
                ("a", "off"),
                ("b", "on"),
            ])))
            .await;
        assert_eq!(engine.store.get("a"), Some(SwitchState::Off));
        assert_eq!(engine.store.get("b"), Some(SwitchState::On));

        let seen = drain_events(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            Event::CommandAcknowledged { switch_id, success: true } if switch_id == "b"
        )));
    }

    #[tokio::test]
    async fn test_rollback_on_failed_write() {
        let (mut engine, _dir) = test_engine(&["a"]);
        engine.backend.lock().await.fail_writes = true;
        let mut events = engine.subscribe_events();

        let settled = issue_and_capture_settlement(&mut engine, "a", SwitchState::On).await;
        assert_eq!(engine.store.get("a"), Some(SwitchState::On));

        assert!(matches!(
            &settled,
            EngineMessage::WriteSettled { result: Err(_), .. }
        ));
        engine.handle_message(settled).await;

        // Reverted to the complement of the failed desired state.
        assert_eq!(engine.store.get("a"), Some(SwitchState::Off));
        let seen = drain_events(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            Event::CommandAcknowledged { switch_id, success: false } if switch_id == "a"
        )));
    }

    #[tokio::test]
    async fn test_race_synchronizer_wins_over_optimistic_guess() {
        let (mut engine, _dir) = test_engine(&["a"]);

        // Optimistic On is pending when an authoritative "off" arrives.
        let settled = issue_and_capture_settlement(&mut engine, "a", SwitchState::On).await;
        engine
            .handle_message(EngineMessage::RemoteSnapshot(snapshot(&[("a", "off")])))
            .await;
        assert_eq!(engine.store.get("a"), Some(SwitchState::Off));

        // The successful settlement does not resurrect the optimistic guess.
        engine.handle_message(settled).await;
        assert_eq!(engine.store.get("a"), Some(SwitchState::Off));
    }

    #[tokio::test]
    async fn test_superseded_write_failure_does_not_roll_back_newer_intent() {
        let (mut engine, _dir) = test_engine(&["a"]);
        engine.backend.lock().await.fail_writes = true;

        let first = issue_and_capture_settlement(&mut engine, "a", SwitchState::On).await;
        let second = issue_and_capture_settlement(&mut engine, "a", SwitchState::Off).await;

        // The first (failed) write settles after being superseded: no
        // rollback over the newer Off intent.
        engine.handle_message(first).await;
        assert_eq!(engine.store.get("a"), Some(SwitchState::Off));

        // The second settles normally and rolls back to On.
        engine.handle_message(second).await;
        assert_eq!(engine.store.get("a"), Some(SwitchState::On));
    }

    #[tokio::test]
    async fn test_unknown_switch_command_is_ignored() {
        let (mut engine, _dir) = test_engine(&["a"]);

        engine
            .handle_message(EngineMessage::Command {
                switch_id: "zz".to_string(),
                desired: SwitchState::On,
            })
            .await;

        assert!(!engine.dispatcher.is_pending("zz"));
        assert!(engine.backend.lock().await.written.is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_error_taxonomy_is_coarse() {
        // Rejected and transport errors take the identical rollback path.
        let (mut engine, _dir) = test_engine(&["a"]);

        for error in [
            BackendError::Transport("connection reset".to_string()),
            BackendError::Rejected {
                path: "lights/a".to_string(),
                status: 401,
            },
        ] {
            engine
                .handle_message(EngineMessage::Command {
                    switch_id: "a".to_string(),
                    desired: SwitchState::On,
                })
                .await;
            let _ = engine.message_rx.recv().await.unwrap();

            engine
                .handle_message(EngineMessage::WriteSettled {
                    switch_id: "a".to_string(),
                    desired: SwitchState::On,
                    result: Err(error),
                })
                .await;
            assert_eq!(engine.store.get("a"), Some(SwitchState::Off));
        }
    }

    #[tokio::test]
    async fn test_hint_seeds_until_first_reconciliation() {
        let dir = tempfile::tempdir().unwrap();
        let hint = HintFile::new(dir.path().join("hint.json"));
        let on: BTreeSet<String> = ["a".to_string()].into_iter().collect();
        hint.save(&on).unwrap();

        let mut engine = Engine::new(MockBackend::new(), &ids(&["a", "b"]), TIMEOUT, hint);
        let snapshot_rx = engine.watch_state();

        // Seeded from the hint, not yet authoritative.
        assert_eq!(engine.store.get("a"), Some(SwitchState::On));
        assert!(!snapshot_rx.borrow().reconciled);

        // The first authoritative snapshot overwrites the hint wholesale.
        engine
            .handle_message(EngineMessage::RemoteSnapshot(HashMap::new()))
            .await;
        assert_eq!(engine.store.get("a"), Some(SwitchState::Off));
        let snap = snapshot_rx.borrow();
        assert!(snap.reconciled);
        assert_eq!(snap.seq, 1);
    }

    #[tokio::test]
    async fn test_connectivity_transitions_via_messages() {
        let (mut engine, _dir) = test_engine(&["a"]);
        let mut events = engine.subscribe_events();

        // Ticks before first contact never report Offline.
        engine.handle_message(EngineMessage::LivenessTick).await;
        assert!(drain_events(&mut events).is_empty());

        engine.handle_message(EngineMessage::HeartbeatObserved).await;
        let seen = drain_events(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e,
            Event::ConnectivityChanged(ConnectivityStatus::Online)
        )));

        // A repeated heartbeat is not a transition.
        engine.handle_message(EngineMessage::HeartbeatObserved).await;
        assert!(drain_events(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_hint_file_tracks_presentation() {
        let dir = tempfile::tempdir().unwrap();
        let hint = HintFile::new(dir.path().join("hint.json"));
        let mut engine = Engine::new(
            MockBackend::new(),
            &ids(&["a", "b"]),
            TIMEOUT,
            hint.clone(),
        );

        engine
            .handle_message(EngineMessage::RemoteSnapshot(snapshot(&[
                ("a", "on"),
                ("b", "on"),
            ])))
            .await;

        let on: Vec<String> = hint.load().unwrap().into_iter().collect();
        assert_eq!(on, vec!["a".to_string(), "b".to_string()]);
    }
}
