pub mod api;
pub mod backend;
pub mod config;
mod engine;
pub mod persist;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use engine::CommandSender;
pub use engine::ConnectivityStatus;
pub use engine::Engine;
pub use engine::EngineSnapshot;
pub use engine::Event;
pub use engine::SwitchState;
