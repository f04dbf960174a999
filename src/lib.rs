pub mod app;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod model;
pub mod scanner;
pub mod signal;
pub mod stats;
pub mod store;
pub mod watcher;

pub use app::Automation;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use model::FileProfile;
pub use signal::StopSignal;
pub use store::DirectoryProfile;
