//! Pure decision logic for the conversation pipeline. Nothing in this crate
//! performs I/O; the server crate wires these functions to the NLU engine,
//! the speech engine and the audio store.

use serde_json::Value;
use sha2::{Digest, Sha256};

pub mod dispatch;
pub mod finalize;
pub mod resolve;
pub mod sanitize;
pub mod speech;
pub mod validate;

pub use dispatch::{DispatchState, Dispatcher, TransitionError};
pub use finalize::{finalize, VoicedAudio};
pub use resolve::{build_nlu_query, outcome_from_reply};
pub use sanitize::{sanitize, sanitize_text};
pub use speech::{
    cache_key, hash_base, needs_voice, speech_job, standalone_speech_job, text_type, CacheKey,
    SpeechJob,
};
pub use validate::{
    locale_to_locale_id, try_again_response, validate_email, validate_locale, validate_request,
    validate_speech_request, validate_subject, Language, ValidationError, LANGUAGES,
};

pub fn jcs_sha256_hex(value: &Value) -> Result<String, String> {
    let canonical = serde_jcs::to_string(value)
        .map_err(|err| format!("failed to canonicalize JSON via JCS: {err}"))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
