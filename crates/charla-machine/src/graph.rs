//! Tenant-authored state graph definition. Authored as JSON in the store;
//! interpreted (never mutated) by [`crate::runtime::Machine`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One step of a per-state follow-up sequence.
///
/// `interval` follows the `^\d+[smhdw]$` grammar and is measured from the
/// moment the step is scheduled. `config` names a registered follow-up
/// template; `None` means the engine generates the message dynamically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupStep {
    pub interval: String,
    #[serde(default)]
    pub config: Option<String>,
}

/// Configuration of a single conversation state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StateConfig {
    /// What the assistant is trying to achieve while in this state.
    pub objective: String,
    #[serde(default)]
    pub description: String,
    /// Signals that the state's objective has been met.
    #[serde(default)]
    pub completion_signals: Vec<String>,
    /// Knowledge-base categories relevant to this state; empty means all.
    #[serde(default)]
    pub rag_categories: Vec<String>,
    /// States reachable from here. A state may list itself (self-loop).
    #[serde(default)]
    pub allowed_transitions: Vec<String>,
    /// Per-target guidance on when to take the transition.
    #[serde(default)]
    pub transition_guidance: BTreeMap<String, String>,
    /// Soft cap on assistant messages while in this state.
    #[serde(default)]
    pub max_messages: Option<u32>,
    /// Timed re-engagement sequence started when a turn lands in this state.
    #[serde(default)]
    pub followup_sequence: Vec<FollowupStep>,
}

/// A complete tenant state machine.
///
/// `states` is a `BTreeMap` so prompt rendering and validation errors are
/// deterministic across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineDef {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub initial_state: String,
    pub states: BTreeMap<String, StateConfig>,
}

fn default_version() -> u32 {
    1
}
