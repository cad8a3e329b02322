//! # hostctl
//!
//! Host action execution for the hostctl agent: tool probing, session
//! environment reconstruction, per-platform strategy tables, the fallback
//! strategy executor, and delayed-action scheduling.

#![warn(missing_docs)]

/// Error types for host operations
pub mod error;

/// Tool availability checks
pub mod probe;

/// Session environment reconstruction
pub mod env;

/// Process liveness and signalling helpers
pub mod process;

/// Strategy and recipe definitions
pub mod strategy;

/// Built-in per-platform strategy tables
pub mod table;

/// Ordered fallback execution of strategies
pub mod executor;

/// Delayed, cancelable actions
pub mod schedule;

/// Camera device discovery
pub mod camera;

/// Host status and identity reports
pub mod host;

pub use error::HostError;
pub use probe::ToolProbe;
pub use env::{EnvDecision, EnvSource, SessionEnvironment};
pub use strategy::{Arg, Bindings, Recipe, Step, Strategy};
pub use table::{CameraSpec, Capability, DeviceListing, ScheduleMode, ScheduleSpec, StrategyTable};
pub use executor::{Attempt, AttemptStatus, Executor, FailureReport, Invocation, Outcome};
pub use schedule::{CancelOutcome, ScheduleReceipt, Scheduler};
pub use camera::discover_devices;
pub use host::{HostStatus, Identity};

/// Result type alias for host operations
pub type Result<T> = std::result::Result<T, HostError>;
