//! Shared configuration and logging for the Digital Stage media core.

pub mod config;
pub mod logging;

pub use config::{Config, LoggingConfig, SfuConfig, TurnConfig, WebRtcConfig};
pub use logging::init_logging;
