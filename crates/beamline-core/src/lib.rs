pub mod config;
pub mod error;
pub mod event;
pub mod signal;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{BeamlineError, ResolutionError, Result, StepFailure, ValidationIssue};
pub use event::EventBus;
pub use signal::Signal;
pub use types::*;
