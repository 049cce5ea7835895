//! The conversation engine: one inbound event in, zero or more outbound
//! responses and all persistent side effects out.

pub mod context;
pub mod error;
pub mod followup_gen;
pub mod prompt;
pub mod reply;
pub mod turn;

pub use context::EngineContext;
pub use error::{EngineError, Result};
pub use followup_gen::{generate_followup, generate_followup_variable, FollowupDraft};
pub use reply::{EscalationPlan, LlmReply, TransitionPlan};
pub use turn::{process_message, AcceptedTransition, OutboundResponse, TurnOutcome};
