//! Wire protocol and configuration types shared by every daemon and worker
//! in the orchestration framework.
//!
//! The wire format is a small, stable, text-based [`Message`] envelope of
//! exactly `source`/`type`/`payload`, serialized as YAML. Configuration is
//! loaded once at daemon startup (and reloaded on SIGHUP) from a YAML file
//! that may reference environment variables via `$(NOWCAST.ENV.<NAME>)`.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    Config, LoggingConfig, RemoteHost, RunSection, ScheduledWorker, SlackNotifications, ZmqConfig,
    ZmqPorts,
};
pub use error::{ChecklistError, ConfigError, ProtocolError, RegistryError};
pub use types::{
    BarrierInstall, DispatchOutcome, Message, MessageRegistry, NextWorker, Value,
    WorkerRegistryEntry,
};
