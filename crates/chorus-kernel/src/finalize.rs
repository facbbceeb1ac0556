use chorus_contracts::{FinalResponse, Outcome};

use crate::speech::CacheKey;

/// Audio attached to a response by the speech step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicedAudio {
    pub binary: String,
    pub cache_hit: bool,
    pub key: CacheKey,
}

pub fn finalize(outcome: &Outcome, audio: Option<VoicedAudio>) -> FinalResponse {
    let kind = outcome.kind();
    let Some(payload) = outcome.payload() else {
        return FinalResponse {
            kind,
            text: String::new(),
            binary: None,
            cache_hit: false,
            hash_base: None,
            content: None,
        };
    };

    let (binary, cache_hit, hash_base) = match audio {
        Some(voiced) => (
            Some(voiced.binary),
            voiced.cache_hit,
            Some(voiced.key.into_string()),
        ),
        None => (payload.binary.clone(), false, None),
    };

    FinalResponse {
        kind,
        text: payload.text.clone(),
        binary,
        cache_hit,
        hash_base,
        content: payload.content.clone(),
    }
}
