//! Agent core: the plan/execute loop, the oracle protocol, and the
//! interactive session built on the same primitives.

pub mod controller;
pub mod interactive;
pub mod protocol;

pub use controller::{Controller, RunOutcome};
pub use interactive::{Session, SessionControl};
pub use protocol::{PlanParseError, Planner, extract_json};
