use chorus_contracts::{Request, UserInfo};
use serde_json::Value;

/// Punctuation kept in utterance text besides letters, digits and whitespace.
const ALLOWED_PUNCTUATION: &[char] = &['.', ',', '!', '?', '\'', '"', '-', '(', ')'];

/// Reshapes an inbound payload into the canonical request record.
///
/// Accepts either the client shape `{ "body": {...}, "userInfo": {...} }` or
/// an already canonical record, so sanitizing twice is a no-op. Missing or
/// mistyped fields fall back to empty values and unknown fields are dropped.
/// A present email is always kept so that validation sees it, even when it is
/// empty or not a string.
pub fn sanitize(raw: &Value) -> Request {
    let body = raw.get("body").filter(|v| v.is_object()).unwrap_or(raw);
    let user = raw
        .get("userInfo")
        .or_else(|| body.get("userInfo"))
        .filter(|v| v.is_object());

    Request {
        text: sanitize_text(str_field(body, "text").unwrap_or_default()),
        lang: str_field(body, "lang").unwrap_or_default().to_string(),
        voice_on_server: voice_flag(body),
        user_info: UserInfo {
            email: user.and_then(|u| present_text(u, "email")),
            sub: user
                .and_then(|u| str_field(u, "sub"))
                .unwrap_or_default()
                .to_string(),
        },
        custom_pronunciation: non_empty(str_field(body, "customPronunciation")),
        voice: non_empty(str_field(body, "voice")),
    }
}

pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(c))
        .collect()
}

fn voice_flag(body: &Value) -> bool {
    match body.get("voiceOnServer").or_else(|| body.get("pollyOnServer")) {
        Some(Value::Bool(v)) => *v,
        Some(Value::String(v)) => v == "true" || v == "True",
        _ => false,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

/// Text of a present, non-null field. Non-string values become their JSON
/// text.
fn present_text(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::Null => None,
        Value::String(v) => Some(v.clone()),
        other => Some(other.to_string()),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(|v| v.to_string())
}
