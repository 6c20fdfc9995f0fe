mod dispatcher;
// Private module - module inception is intentional, matching the file layout.
#[allow(clippy::module_inception)]
mod engine;
mod liveness;
mod message;
mod store;
mod sync;

pub use engine::CommandSender;
pub use engine::Engine;
pub use liveness::ConnectivityStatus;
pub use liveness::LivenessMonitor;
pub use message::EngineMessage;
pub use message::Event;
pub use store::EngineSnapshot;
pub use store::PresentationStore;
pub use store::SwitchState;
pub use sync::RemoteSnapshot;
pub use sync::Synchronizer;
