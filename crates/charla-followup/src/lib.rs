//! Timed re-engagement: render scheduled follow-up messages and deliver them
//! through the channel egress, honouring the 24-hour session window.

pub mod error;
pub mod render;
pub mod worker;

pub use error::FollowupError;
pub use render::{render_config, render_text};
pub use worker::{run_pass, PassStats};
