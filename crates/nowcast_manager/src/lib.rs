//! The manager: the message-driven dispatch engine at the heart of the
//! orchestration framework. See `manager.rs` for the event loop and
//! handler dispatch table, `checklist.rs` for persisted system state,
//! `barrier.rs` for the race-condition barrier, `dispatch.rs` for the
//! hot-reloadable dispatch plugin, and `slack.rs` for best-effort
//! notifications.

pub mod barrier;
pub mod checklist;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod slack;

pub use barrier::Barrier;
pub use checklist::Checklist;
pub use dispatch::{DispatchPlugin, DispatchSource};
pub use error::DispatchError;
pub use manager::NowcastManager;
