use std::sync::LazyLock;

use chorus_contracts::{Request, SpeechRequest};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid locale {0:?}, supported locales are of format az-AZ for English, French, Italian, Spanish or German")]
    InvalidLocale(String),
    #[error("invalid email format")]
    InvalidEmail,
    #[error("invalid sub format")]
    InvalidSubject,
    #[error("unsupported language {0:?}, supported languages are: English, French, Italian, Spanish, and German")]
    UnsupportedLanguage(String),
    #[error("text to speak is empty")]
    EmptyText,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidLocale(_) => "validation.invalid_locale",
            ValidationError::InvalidEmail => "validation.invalid_email",
            ValidationError::InvalidSubject => "validation.invalid_subject",
            ValidationError::UnsupportedLanguage(_) => "validation.unsupported_language",
            ValidationError::EmptyText => "validation.empty_text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub name: &'static str,
    pub subtag: &'static str,
    pub locale_id: &'static str,
    pub try_again: &'static str,
}

pub const LANGUAGES: [Language; 5] = [
    Language {
        name: "English",
        subtag: "en",
        locale_id: "en_US",
        try_again: "I could not understand.",
    },
    Language {
        name: "French",
        subtag: "fr",
        locale_id: "fr_FR",
        try_again: "Je ne pouvais pas comprendre.",
    },
    Language {
        name: "Italian",
        subtag: "it",
        locale_id: "it_IT",
        try_again: "Non riuscivo a capire.",
    },
    Language {
        name: "Spanish",
        subtag: "es",
        locale_id: "es_US",
        try_again: "No lo pude entender.",
    },
    Language {
        name: "German",
        subtag: "de",
        locale_id: "de_DE",
        try_again: "Ich konnte es nicht verstehen.",
    },
];

static LOCALE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z]{2})-[A-Z]{2}$").expect("locale pattern compiles"));

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#,
    )
    .expect("email pattern compiles")
});

static SUBJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Za-z]{8}-[0-9A-Za-z]{4}-[0-9A-Za-z]{4}-[0-9A-Za-z]{4}-[0-9A-Za-z]{12}$")
        .expect("subject pattern compiles")
});

/// Longest run of one repeated character tolerated inside a subject group.
const MAX_SUBJECT_RUN: usize = 3;

pub fn validate_locale(tag: &str) -> Result<(), ValidationError> {
    let subtag = LOCALE_TAG
        .captures(tag)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| ValidationError::InvalidLocale(tag.to_string()))?;
    if LANGUAGES.iter().any(|l| l.subtag == subtag) {
        Ok(())
    } else {
        Err(ValidationError::InvalidLocale(tag.to_string()))
    }
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if EMAIL.is_match(email) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail)
    }
}

pub fn validate_subject(sub: &str) -> Result<(), ValidationError> {
    if !SUBJECT.is_match(sub) {
        return Err(ValidationError::InvalidSubject);
    }
    if sub.split('-').any(|group| longest_run(group) > MAX_SUBJECT_RUN) {
        return Err(ValidationError::InvalidSubject);
    }
    Ok(())
}

/// Checks every identity field of a sanitized request. Runs before any
/// downstream call is made.
pub fn validate_request(request: &Request) -> Result<(), ValidationError> {
    validate_locale(&request.lang)?;
    if let Some(email) = &request.user_info.email {
        validate_email(email)?;
    }
    validate_subject(&request.user_info.sub)
}

pub fn validate_speech_request(request: &SpeechRequest) -> Result<(), ValidationError> {
    if request.text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(())
}

pub fn locale_to_locale_id(language: &str) -> Result<&'static str, ValidationError> {
    LANGUAGES
        .iter()
        .find(|l| l.name == language)
        .map(|l| l.locale_id)
        .ok_or_else(|| ValidationError::UnsupportedLanguage(language.to_string()))
}

pub fn try_again_response(language: &str) -> Option<&'static str> {
    LANGUAGES
        .iter()
        .find(|l| l.name == language)
        .map(|l| l.try_again)
}

fn longest_run(group: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut prev = None;
    for c in group.chars() {
        current = if Some(c) == prev { current + 1 } else { 1 };
        prev = Some(c);
        longest = longest.max(current);
    }
    longest
}
