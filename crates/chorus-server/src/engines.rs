use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chorus_config::{Nlu, Speech};
use chorus_contracts::{NluQuery, NluReply, Outcome, Request, SynthesisRequest};
use chorus_kernel::{build_nlu_query, locale_to_locale_id, outcome_from_reply, ValidationError};
use reqwest::Client;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("nlu transport error: {0}")]
    Transport(String),
    #[error("nlu engine answered with HTTP {0}")]
    Status(u16),
    #[error("nlu reply did not match the contract: {0}")]
    Contract(String),
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech transport error: {0}")]
    Transport(String),
    #[error("speech engine answered with HTTP {0}")]
    Status(u16),
    #[error("speech engine returned no audio")]
    EmptyAudio,
}

/// Attempts and pause between them for one outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_millis(backoff_ms),
        }
    }

    pub async fn run<T, E, F, Fut>(&self, mut attempt: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut tried = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tried += 1;
                    if tried >= max_attempts {
                        return Err(err);
                    }
                    if self.backoff > Duration::ZERO {
                        sleep(self.backoff).await;
                    }
                }
            }
        }
    }
}

/// Natural-language engine that turns an utterance into a structured reply.
#[async_trait]
pub trait NluEngine: Send + Sync {
    async fn recognize(&self, query: &NluQuery) -> Result<NluReply, ResolutionError>;
}

/// Text-to-speech engine. Returns raw audio bytes.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError>;
}

pub struct HttpNluEngine {
    endpoint: String,
    retry: RetryPolicy,
    client: Client,
}

impl HttpNluEngine {
    pub fn new(cfg: &Nlu) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self {
            endpoint: cfg.endpoint.clone(),
            retry: RetryPolicy::new(cfg.retry_max_attempts, cfg.retry_backoff_ms),
            client,
        })
    }
}

#[async_trait]
impl NluEngine for HttpNluEngine {
    async fn recognize(&self, query: &NluQuery) -> Result<NluReply, ResolutionError> {
        let client = &self.client;
        let endpoint = self.endpoint.as_str();
        self.retry
            .run(move || async move {
                let response = client
                    .post(endpoint)
                    .json(query)
                    .send()
                    .await
                    .map_err(|e| ResolutionError::Transport(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(ResolutionError::Status(response.status().as_u16()));
                }
                response
                    .json::<NluReply>()
                    .await
                    .map_err(|e| ResolutionError::Contract(e.to_string()))
            })
            .await
    }
}

pub struct HttpSpeechEngine {
    endpoint: String,
    retry: RetryPolicy,
    client: Client,
}

impl HttpSpeechEngine {
    pub fn new(cfg: &Speech) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self {
            endpoint: cfg.endpoint.clone(),
            retry: RetryPolicy::new(cfg.retry_max_attempts, cfg.retry_backoff_ms),
            client,
        })
    }
}

#[async_trait]
impl SpeechEngine for HttpSpeechEngine {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
        let client = &self.client;
        let endpoint = self.endpoint.as_str();
        self.retry
            .run(move || async move {
                let response = client
                    .post(endpoint)
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| SynthesisError::Transport(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(SynthesisError::Status(response.status().as_u16()));
                }
                let audio = response
                    .bytes()
                    .await
                    .map_err(|e| SynthesisError::Transport(e.to_string()))?;
                if audio.is_empty() {
                    return Err(SynthesisError::EmptyAudio);
                }
                Ok(audio.to_vec())
            })
            .await
    }
}

/// Binds an `NluEngine` to the configured bot and language, and maps its
/// replies onto typed outcomes.
pub struct IntentResolver {
    engine: Arc<dyn NluEngine>,
    bot_id: String,
    bot_alias_id: String,
    language: String,
    locale_id: &'static str,
}

impl IntentResolver {
    pub fn new(engine: Arc<dyn NluEngine>, cfg: &Nlu) -> Result<Self, ValidationError> {
        Ok(Self {
            engine,
            bot_id: cfg.bot_id.clone(),
            bot_alias_id: cfg.bot_alias_id.clone(),
            locale_id: locale_to_locale_id(&cfg.language)?,
            language: cfg.language.clone(),
        })
    }

    pub async fn resolve(&self, request: &Request) -> Result<Outcome, ResolutionError> {
        let query = build_nlu_query(request, &self.bot_id, &self.bot_alias_id, self.locale_id);
        let reply = self.engine.recognize(&query).await?;
        Ok(outcome_from_reply(reply, &self.language))
    }
}
