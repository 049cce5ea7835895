pub mod config;
pub mod error;
pub mod ids;
pub mod message;
pub mod provider;
pub mod tenant;

pub use error::{CharlaError, Result};
pub use ids::{ContactId, EscalationId, FollowupId, MessageId, SessionId, TenantId};
pub use message::{ChannelKey, ChannelKind, MessageKind, NormalizedMessage, PlannedMessage};
pub use tenant::TenantConfig;
