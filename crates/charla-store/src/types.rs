//! Persisted entity types shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use charla_core::ids::{ContactId, EscalationId, FollowupId, MessageId, SessionId, TenantId};
use charla_core::message::{ChannelKey, MessageKind, NormalizedMessage};

/// A person on a channel, scoped to one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: TenantId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub language: Option<String>,
    pub registered: bool,
    pub deposit_confirmed: bool,
    pub lifetime_value: f64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "paused" => Ok(SessionStatus::Paused),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// One contact's conversation on one channel endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub channel: ChannelKey,
    pub current_state: String,
    pub previous_state: Option<String>,
    /// Free-form, tenant-schema-dependent context map.
    pub context: serde_json::Map<String, serde_json::Value>,
    pub status: SessionStatus,
    pub escalated: bool,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// A persisted conversation message, inbound or outbound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub direction: Direction,
    pub kind: MessageKind,
    pub content: String,
    pub media_url: Option<String>,
    pub transcription: Option<String>,
    pub image_analysis: Option<String>,
    pub template_name: Option<String>,
    pub platform_message_id: Option<String>,
    pub delivery_status: DeliveryStatus,
    /// Another message id in the same session, or `None`.
    pub reply_to: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

/// One buffered inbound message waiting for its burst to settle.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub id: i64,
    pub tenant_id: TenantId,
    pub session_key_hash: String,
    pub channel: ChannelKey,
    pub payload: NormalizedMessage,
    pub received_at: DateTime<Utc>,
    pub scheduled_process_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    ExplicitRequest,
    AiUncertainty,
    RepeatedFailure,
    PolicyViolation,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::ExplicitRequest => "explicit_request",
            EscalationReason::AiUncertainty => "ai_uncertainty",
            EscalationReason::RepeatedFailure => "repeated_failure",
            EscalationReason::PolicyViolation => "policy_violation",
        }
    }
}

impl std::str::FromStr for EscalationReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "explicit_request" => Ok(EscalationReason::ExplicitRequest),
            "ai_uncertainty" => Ok(EscalationReason::AiUncertainty),
            "repeated_failure" => Ok(EscalationReason::RepeatedFailure),
            "policy_violation" => Ok(EscalationReason::PolicyViolation),
            other => Err(format!("unknown escalation reason: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl EscalationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationPriority::Low => "low",
            EscalationPriority::Medium => "medium",
            EscalationPriority::High => "high",
            EscalationPriority::Urgent => "urgent",
        }
    }
}

impl std::str::FromStr for EscalationPriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(EscalationPriority::Low),
            "medium" => Ok(EscalationPriority::Medium),
            "high" => Ok(EscalationPriority::High),
            "urgent" => Ok(EscalationPriority::Urgent),
            other => Err(format!("unknown escalation priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Open,
    Assigned,
    InProgress,
    Resolved,
    Cancelled,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationStatus::Open => "open",
            EscalationStatus::Assigned => "assigned",
            EscalationStatus::InProgress => "in_progress",
            EscalationStatus::Resolved => "resolved",
            EscalationStatus::Cancelled => "cancelled",
        }
    }

    /// Open/assigned/in-progress count as active; resolved/cancelled are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscalationStatus::Resolved | EscalationStatus::Cancelled)
    }
}

impl std::str::FromStr for EscalationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(EscalationStatus::Open),
            "assigned" => Ok(EscalationStatus::Assigned),
            "in_progress" => Ok(EscalationStatus::InProgress),
            "resolved" => Ok(EscalationStatus::Resolved),
            "cancelled" => Ok(EscalationStatus::Cancelled),
            other => Err(format!("unknown escalation status: {other}")),
        }
    }
}

/// Durable record that a human agent should take over a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: EscalationId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub reason: EscalationReason,
    pub priority: EscalationPriority,
    pub status: EscalationStatus,
    pub assigned_to: Option<String>,
    pub ai_summary: String,
    pub ai_confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowupStatus {
    Pending,
    Sent,
    Cancelled,
    Failed,
}

impl FollowupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowupStatus::Pending => "pending",
            FollowupStatus::Sent => "sent",
            FollowupStatus::Cancelled => "cancelled",
            FollowupStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for FollowupStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FollowupStatus::Pending),
            "sent" => Ok(FollowupStatus::Sent),
            "cancelled" => Ok(FollowupStatus::Cancelled),
            "failed" => Ok(FollowupStatus::Failed),
            other => Err(format!("unknown follow-up status: {other}")),
        }
    }
}

/// One scheduled re-engagement message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupItem {
    pub id: FollowupId,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub scheduled_at: DateTime<Utc>,
    /// Registered config to render, or `None` for an engine-generated message.
    pub config_name: Option<String>,
    /// Which state's sequence this item belongs to.
    pub state: String,
    /// Position in the state's follow-up sequence.
    pub sequence_index: u32,
    pub status: FollowupStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// Named follow-up template with variable slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FollowupConfigKind,
    /// Text body with `{{key}}` slots (text kind).
    #[serde(default)]
    pub body: Option<String>,
    /// Approved template name (template kind).
    #[serde(default)]
    pub template_name: Option<String>,
    /// Variables fill `{{key}}` slots, or positional params in declared order.
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowupConfigKind {
    Text,
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableConfig {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: VariableKind,
    /// Literal value (literal kind).
    #[serde(default)]
    pub value: Option<String>,
    /// LLM prompt that produces the value (llm kind).
    #[serde(default)]
    pub prompt: Option<String>,
    /// Session context field to read (context kind).
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Literal,
    Llm,
    Context,
}

/// Knowledge-base entry. Cross-tenant by default; tenants opt into a subset
/// through the KB-set association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub title: String,
    pub answer: String,
    pub category: String,
    pub tags: Vec<String>,
    pub summary: String,
    pub related: Vec<String>,
    pub embedding: Vec<f32>,
    pub priority: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleCategory {
    HappyPath,
    Deviation,
    EdgeCase,
    Complex,
}

impl ExampleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExampleCategory::HappyPath => "happy_path",
            ExampleCategory::Deviation => "deviation",
            ExampleCategory::EdgeCase => "edge_case",
            ExampleCategory::Complex => "complex",
        }
    }
}

impl std::str::FromStr for ExampleCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "happy_path" => Ok(ExampleCategory::HappyPath),
            "deviation" => Ok(ExampleCategory::Deviation),
            "edge_case" => Ok(ExampleCategory::EdgeCase),
            "complex" => Ok(ExampleCategory::Complex),
            other => Err(format!("unknown example category: {other}")),
        }
    }
}

/// One turn of a few-shot conversation example.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleTurn {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// A curated conversation used for few-shot prompting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationExample {
    pub id: String,
    pub scenario: String,
    pub category: ExampleCategory,
    pub outcome: String,
    pub primary_state: String,
    pub state_flow: Vec<String>,
    pub messages: Vec<ExampleTurn>,
    pub embedding: Vec<f32>,
}

/// Audit record of a confirmed deposit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositEvent {
    pub id: String,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub contact_id: ContactId,
    pub amount: f64,
    pub currency: String,
    pub reasoning: String,
    pub recorded_at: DateTime<Utc>,
}
