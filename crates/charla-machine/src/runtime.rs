//! Read-only runtime over a [`StateMachineDef`]: transition checks and the
//! prompt block describing the current state and its exits.

use crate::error::{MachineError, Result};
use crate::graph::{StateConfig, StateMachineDef};

/// Validated wrapper around a state machine definition.
#[derive(Debug)]
pub struct Machine {
    def: StateMachineDef,
}

impl Machine {
    /// Wrap a definition, validating the graph:
    /// the initial state exists and every transition target is a known state.
    pub fn new(def: StateMachineDef) -> Result<Self> {
        if !def.states.contains_key(&def.initial_state) {
            return Err(MachineError::UnknownInitialState(def.initial_state.clone()));
        }
        for (id, state) in &def.states {
            for target in &state.allowed_transitions {
                if !def.states.contains_key(target) {
                    return Err(MachineError::DanglingTransition {
                        from: id.clone(),
                        to: target.clone(),
                    });
                }
            }
        }
        Ok(Self { def })
    }

    /// Parse a JSON definition and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let def: StateMachineDef = serde_json::from_str(json)?;
        Self::new(def)
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn initial_state(&self) -> &str {
        &self.def.initial_state
    }

    pub fn state(&self, id: &str) -> Result<&StateConfig> {
        self.def
            .states
            .get(id)
            .ok_or_else(|| MachineError::UnknownState(id.to_string()))
    }

    /// Whether the graph permits moving from `from` to `to`.
    ///
    /// Self-loops are permitted when listed; staying put (`from == to`)
    /// without an explicit self-loop is not a transition and is always fine,
    /// but this method only answers the graph question.
    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        self.def
            .states
            .get(from)
            .map(|s| s.allowed_transitions.iter().any(|t| t == to))
            .unwrap_or(false)
    }

    /// Render the prompt block describing the current state: objective,
    /// completion signals, and each allowed exit with its guidance.
    pub fn transition_context(&self, current: &str) -> Result<String> {
        let state = self.state(current)?;

        let mut out = String::new();
        out.push_str(&format!("## Current state: {}\n", current));
        out.push_str(&format!("Objective: {}\n", state.objective));
        if !state.description.is_empty() {
            out.push_str(&format!("{}\n", state.description));
        }
        if !state.completion_signals.is_empty() {
            out.push_str("Completion signals:\n");
            for signal in &state.completion_signals {
                out.push_str(&format!("- {}\n", signal));
            }
        }

        if state.allowed_transitions.is_empty() {
            out.push_str("\nNo transitions are available from this state.\n");
        } else {
            out.push_str("\n## Allowed transitions\n");
            for target in &state.allowed_transitions {
                match state.transition_guidance.get(target) {
                    Some(guidance) => out.push_str(&format!("- `{}`: {}\n", target, guidance)),
                    None => out.push_str(&format!("- `{}`\n", target)),
                }
            }
        }

        if let Some(max) = state.max_messages {
            out.push_str(&format!(
                "\nAim to resolve this state within {} assistant messages.\n",
                max
            ));
        }

        Ok(out)
    }

    pub fn def(&self) -> &StateMachineDef {
        &self.def
    }
}
