use std::collections::BTreeMap;

use chorus_contracts::{NluQuery, NluReply, Outcome, OutcomeKind, Request, ResponsePayload};

use crate::validate::try_again_response;

const FALLBACK_LANGUAGE: &str = "English";

pub fn build_nlu_query(
    request: &Request,
    bot_id: &str,
    bot_alias_id: &str,
    locale_id: &str,
) -> NluQuery {
    let mut attributes = BTreeMap::new();
    if let Some(email) = &request.user_info.email {
        attributes.insert("email".to_string(), email.clone());
    }
    NluQuery {
        bot_id: bot_id.to_string(),
        bot_alias_id: bot_alias_id.to_string(),
        locale_id: locale_id.to_string(),
        session_id: request.user_info.sub.clone(),
        text: request.text.clone(),
        attributes,
    }
}

/// Maps an engine reply onto exactly one outcome.
///
/// A `kind` tag picks the variant. Untagged replies become a simple response
/// carrying the first message, or `NoIntentFound` with the localised
/// try-again text when the engine said nothing.
pub fn outcome_from_reply(reply: NluReply, language: &str) -> Outcome {
    let first_message = reply.messages.into_iter().next().map(|m| m.content);
    let (kind, text) = match (reply.kind, first_message) {
        (Some(kind), text) => (kind, text.unwrap_or_default()),
        (None, Some(text)) => (OutcomeKind::SimpleResponse, text),
        (None, None) => (OutcomeKind::NoIntentFound, try_again_text(language).to_string()),
    };

    let summary = reply.summary.unwrap_or_else(|| text.clone());
    let payload = ResponsePayload {
        text,
        speech: reply.speech,
        voice: reply.voice,
        custom_pronunciation: reply.custom_pronunciation,
        binary: reply.binary,
        content: reply.content,
    };
    Outcome::from_kind(kind, payload, summary)
}

fn try_again_text(language: &str) -> &'static str {
    try_again_response(language)
        .or_else(|| try_again_response(FALLBACK_LANGUAGE))
        .unwrap_or_default()
}
