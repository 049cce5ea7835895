use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// UUIDv7 includes a timestamp — sortable and traceable in logs.
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_type!(
    /// Unique identifier for a tenant ("client").
    TenantId
);

id_type!(
    /// Unique identifier for a contact (a person on a channel).
    ContactId
);

id_type!(
    /// Unique identifier for a conversation session.
    SessionId
);

id_type!(
    /// Unique identifier for a stored message.
    MessageId
);

id_type!(
    /// Unique identifier for an escalation record.
    EscalationId
);

id_type!(
    /// Unique identifier for a follow-up queue item.
    FollowupId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn ids_roundtrip_through_strings() {
        let id = TenantId::new();
        let back = TenantId::from(id.as_str());
        assert_eq!(id, back);
    }

    #[test]
    fn v7_ids_sort_by_creation() {
        let a = MessageId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = MessageId::new();
        assert!(a.as_str() < b.as_str());
    }
}
