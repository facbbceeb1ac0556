use std::fmt;

use chorus_contracts::{
    Outcome, Request, ResponsePayload, SpeechRequest, SynthesisRequest, TextType,
};

use crate::sha256_hex;

/// Content address of a synthesized audio clip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical `voice|text|pronunciation` encoding hashed into a `CacheKey`.
///
/// Fields keep their case; `\` and `|` inside a field are backslash-escaped so
/// no two distinct triples share an encoding. An absent hint is the empty
/// field.
pub fn hash_base(voice: &str, text: &str, pronunciation: Option<&str>) -> String {
    [voice, text, pronunciation.unwrap_or("")]
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join("|")
}

pub fn cache_key(voice: &str, text: &str, pronunciation: Option<&str>) -> CacheKey {
    CacheKey(sha256_hex(hash_base(voice, text, pronunciation).as_bytes()))
}

/// Audio decision gate. Evaluated once per request.
pub fn needs_voice(outcome: &Outcome, voice_on_server: bool) -> bool {
    if !voice_on_server {
        return false;
    }
    match outcome.payload() {
        Some(payload) => payload.binary.is_none() && !payload.speech_text().trim().is_empty(),
        None => false,
    }
}

pub fn text_type(text: &str) -> TextType {
    if text.contains("<speak") {
        TextType::Ssml
    } else {
        TextType::Text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechJob {
    pub key: CacheKey,
    pub request: SynthesisRequest,
}

/// Picks voice and pronunciation hint (outcome first, then request, then the
/// configured default voice) and derives the cache key for them.
pub fn speech_job(
    payload: &ResponsePayload,
    request: &Request,
    default_voice: &str,
    output_format: &str,
) -> SpeechJob {
    let voice = payload
        .voice
        .as_deref()
        .or(request.voice.as_deref())
        .unwrap_or(default_voice);
    let pronunciation = payload
        .custom_pronunciation
        .as_deref()
        .or(request.custom_pronunciation.as_deref());
    let text = payload.speech_text();

    SpeechJob {
        key: cache_key(voice, text, pronunciation),
        request: SynthesisRequest {
            text: text.to_string(),
            voice_id: voice.to_string(),
            text_type: text_type(text),
            output_format: output_format.to_string(),
            lexicon_names: pronunciation.map(|p| vec![p.to_string()]).unwrap_or_default(),
        },
    }
}

/// Job for a standalone speech request. Voice and hint come from the request
/// itself; a blank voice falls back to the default.
pub fn standalone_speech_job(
    request: &SpeechRequest,
    default_voice: &str,
    output_format: &str,
) -> SpeechJob {
    let payload = ResponsePayload {
        voice: request.voice.clone().filter(|v| !v.is_empty()),
        custom_pronunciation: request.custom_pronunciation.clone().filter(|p| !p.is_empty()),
        ..ResponsePayload::text(request.text.clone())
    };
    speech_job(&payload, &Request::default(), default_voice, output_format)
}

fn escape_field(field: &str) -> String {
    field.replace('\\', "\\\\").replace('|', "\\|")
}
