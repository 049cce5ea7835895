pub mod error;
pub mod graph;
pub mod interval;
pub mod runtime;

pub use error::MachineError;
pub use graph::{FollowupStep, StateConfig, StateMachineDef};
pub use interval::parse_interval;
pub use runtime::Machine;
