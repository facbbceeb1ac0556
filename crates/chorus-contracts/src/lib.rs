use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const API_VERSION: &str = "1.0.0";

#[derive(Debug, Clone)]
pub struct ContractSchemaManifest {
    pub path: &'static str,
    pub sha256: &'static str,
    pub body: &'static str,
}

#[derive(Debug, Clone)]
pub struct ContractsManifest {
    pub openapi_sha256: &'static str,
    pub contracts_set_sha256: &'static str,
    pub generated_at: &'static str,
    pub schemas: Vec<ContractSchemaManifest>,
}

include!(concat!(env!("OUT_DIR"), "/generated_contracts.rs"));

pub fn contracts_manifest_v1() -> ContractsManifest {
    ContractsManifest {
        openapi_sha256: GENERATED_OPENAPI_SHA256,
        contracts_set_sha256: GENERATED_CONTRACTS_SET_SHA256,
        generated_at: GENERATED_AT_RFC3339,
        schemas: GENERATED_CONTRACT_SCHEMAS
            .iter()
            .map(|(path, sha256, body)| ContractSchemaManifest { path, sha256, body })
            .collect(),
    }
}

/// Closed set of outcome kinds an utterance can resolve to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    SimpleResponse,
    BackendResponse,
    History,
    SyncConversation,
    AsyncConversation,
    MoreInformationNeeded,
    NoIntentFound,
    Federated,
    Completed,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 9] = [
        OutcomeKind::SimpleResponse,
        OutcomeKind::BackendResponse,
        OutcomeKind::History,
        OutcomeKind::SyncConversation,
        OutcomeKind::AsyncConversation,
        OutcomeKind::MoreInformationNeeded,
        OutcomeKind::NoIntentFound,
        OutcomeKind::Federated,
        OutcomeKind::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::SimpleResponse => "simple_response",
            OutcomeKind::BackendResponse => "backend_response",
            OutcomeKind::History => "history",
            OutcomeKind::SyncConversation => "sync_conversation",
            OutcomeKind::AsyncConversation => "async_conversation",
            OutcomeKind::MoreInformationNeeded => "more_information_needed",
            OutcomeKind::NoIntentFound => "no_intent_found",
            OutcomeKind::Federated => "federated",
            OutcomeKind::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub sub: String,
}

/// Canonical request record produced by the sanitizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub text: String,
    pub lang: String,
    pub voice_on_server: bool,
    #[serde(default)]
    pub user_info: UserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_pronunciation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Content shared by every outcome that produces caller-visible output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    #[serde(default)]
    pub text: String,
    /// Text to speak when it differs from the displayed text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_pronunciation: Option<String>,
    /// Audio already rendered by the backend, base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl ResponsePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn speech_text(&self) -> &str {
        self.speech.as_deref().unwrap_or(&self.text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    SimpleResponse(ResponsePayload),
    BackendResponse(ResponsePayload),
    History(ResponsePayload),
    SyncConversation(ResponsePayload),
    AsyncConversation(ResponsePayload),
    MoreInformationNeeded(ResponsePayload),
    NoIntentFound(ResponsePayload),
    Federated(ResponsePayload),
    Completed { summary: String },
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::SimpleResponse(_) => OutcomeKind::SimpleResponse,
            Outcome::BackendResponse(_) => OutcomeKind::BackendResponse,
            Outcome::History(_) => OutcomeKind::History,
            Outcome::SyncConversation(_) => OutcomeKind::SyncConversation,
            Outcome::AsyncConversation(_) => OutcomeKind::AsyncConversation,
            Outcome::MoreInformationNeeded(_) => OutcomeKind::MoreInformationNeeded,
            Outcome::NoIntentFound(_) => OutcomeKind::NoIntentFound,
            Outcome::Federated(_) => OutcomeKind::Federated,
            Outcome::Completed { .. } => OutcomeKind::Completed,
        }
    }

    pub fn payload(&self) -> Option<&ResponsePayload> {
        match self {
            Outcome::SimpleResponse(p)
            | Outcome::BackendResponse(p)
            | Outcome::History(p)
            | Outcome::SyncConversation(p)
            | Outcome::AsyncConversation(p)
            | Outcome::MoreInformationNeeded(p)
            | Outcome::NoIntentFound(p)
            | Outcome::Federated(p) => Some(p),
            Outcome::Completed { .. } => None,
        }
    }

    pub fn from_kind(kind: OutcomeKind, payload: ResponsePayload, summary: String) -> Self {
        match kind {
            OutcomeKind::SimpleResponse => Outcome::SimpleResponse(payload),
            OutcomeKind::BackendResponse => Outcome::BackendResponse(payload),
            OutcomeKind::History => Outcome::History(payload),
            OutcomeKind::SyncConversation => Outcome::SyncConversation(payload),
            OutcomeKind::AsyncConversation => Outcome::AsyncConversation(payload),
            OutcomeKind::MoreInformationNeeded => Outcome::MoreInformationNeeded(payload),
            OutcomeKind::NoIntentFound => Outcome::NoIntentFound(payload),
            OutcomeKind::Federated => Outcome::Federated(payload),
            OutcomeKind::Completed => Outcome::Completed { summary },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NluQuery {
    pub bot_id: String,
    pub bot_alias_id: String,
    pub locale_id: String,
    pub session_id: String,
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluMessage {
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NluReply {
    #[serde(default)]
    pub kind: Option<OutcomeKind>,
    #[serde(default)]
    pub messages: Vec<NluMessage>,
    #[serde(default)]
    pub speech: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub custom_pronunciation: Option<String>,
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextType {
    Text,
    Ssml,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub text_type: TextType,
    pub output_format: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lexicon_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinalResponse {
    pub kind: OutcomeKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

/// Standalone speech request: voice one text without resolving it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_pronunciation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechResponse {
    pub text: String,
    pub binary: String,
    pub hash_base: String,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractsMetadata {
    pub api_version: String,
    pub openapi_sha256: String,
    pub contracts_set_sha256: String,
    pub generated_at: String,
    pub schemas: BTreeMap<String, String>,
    pub outcome_kinds: Vec<OutcomeKind>,
    pub languages: Vec<String>,
}
