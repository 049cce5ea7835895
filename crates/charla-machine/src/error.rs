use thiserror::Error;

#[derive(Debug, Error)]
pub enum MachineError {
    /// A transition target names a state that does not exist in the graph.
    #[error("state '{from}' allows transition to unknown state '{to}'")]
    DanglingTransition { from: String, to: String },

    /// The declared initial state is not a key of the states map.
    #[error("initial state '{0}' is not defined")]
    UnknownInitialState(String),

    #[error("state '{0}' is not defined")]
    UnknownState(String),

    /// A follow-up interval failed the `^\d+[smhdw]$` grammar.
    #[error("invalid follow-up interval '{0}' (expected e.g. 30s, 2h, 1d)")]
    InvalidInterval(String),

    #[error("state machine definition error: {0}")]
    Definition(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MachineError>;
