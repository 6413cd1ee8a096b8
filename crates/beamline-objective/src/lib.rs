//! Objective tracking.
//!
//! An [`Objective`] moves through `pending → in_progress → completed | failed`.
//! The [`ObjectiveRegistry`] actor owns every objective and emits one
//! [`Signal`](beamline_core::Signal) per status or progress change through a
//! [`SignalRouter`](beamline_core::traits::SignalRouter).

pub mod driver;
pub mod machine;
pub mod objective;
pub mod registry;
pub mod router;

pub use driver::{run_objective, run_objective_as, ObjectiveRun};
pub use machine::Transition;
pub use objective::{NewObjective, Objective, ObjectiveStatusReport};
pub use registry::ObjectiveRegistry;
pub use router::{ChannelRouter, LogRouter};
