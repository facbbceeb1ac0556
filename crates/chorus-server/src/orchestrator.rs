use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chorus_config::Config;
use chorus_contracts::{FinalResponse, Request, ResponsePayload, SpeechRequest, SpeechResponse};
use chorus_kernel::{
    finalize, needs_voice, sanitize, speech_job, standalone_speech_job, validate_request,
    validate_speech_request, CacheKey, Dispatcher, SpeechJob, VoicedAudio,
};
use serde_json::Value;

use crate::engines::{IntentResolver, NluEngine, SpeechEngine};
use crate::error::{ConversationError, ServerError};
use crate::journal::{ConversationJournal, JournalRecord};
use crate::store::SpeechCache;

/// Runs one conversation request end to end:
/// sanitize, validate, resolve, dispatch, voice, finalize, then answer the
/// caller exactly once.
pub struct Orchestrator {
    resolver: IntentResolver,
    speech: Arc<dyn SpeechEngine>,
    cache: SpeechCache,
    journal: ConversationJournal,
    default_voice: String,
    output_format: String,
}

struct RequestContext {
    request_id: String,
    started: Instant,
    subject: String,
    resolve_ms: u64,
    speech_ms: u64,
}

impl RequestContext {
    fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            started: Instant::now(),
            subject: String::new(),
            resolve_ms: 0,
            speech_ms: 0,
        }
    }
}

/// Freshly synthesized audio still to be written to the cache.
struct PendingAudio {
    key: CacheKey,
    binary: String,
}

struct Finalized {
    response: FinalResponse,
    pending: Option<PendingAudio>,
}

struct Voiced {
    audio: VoicedAudio,
    pending: Option<PendingAudio>,
}

impl Orchestrator {
    pub fn new(
        resolver: IntentResolver,
        speech: Arc<dyn SpeechEngine>,
        cache: SpeechCache,
        journal: ConversationJournal,
        default_voice: impl Into<String>,
        output_format: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            speech,
            cache,
            journal,
            default_voice: default_voice.into(),
            output_format: output_format.into(),
        }
    }

    pub async fn from_config(
        cfg: &Config,
        nlu: Arc<dyn NluEngine>,
        speech: Arc<dyn SpeechEngine>,
    ) -> Result<Self, ServerError> {
        let resolver = IntentResolver::new(nlu, &cfg.nlu)?;
        let cache = SpeechCache::from_config(&cfg.cache).await?;
        let journal = ConversationJournal::open(&cfg.journal.jsonl_path).await?;
        Ok(Self::new(
            resolver,
            speech,
            cache,
            journal,
            cfg.speech.default_voice.clone(),
            cfg.speech.output_format.clone(),
        ))
    }

    /// Processes `raw` and hands the result to `on_complete`.
    ///
    /// The callback runs before the cache write and the journal append, so a
    /// caller waiting on it is answered without waiting for either.
    pub async fn process<F>(&self, raw: &Value, on_complete: F)
    where
        F: FnOnce(Result<FinalResponse, ConversationError>) + Send,
    {
        let mut ctx = RequestContext::new();
        let mut dispatcher = Dispatcher::new();
        let result = self.run(&mut ctx, &mut dispatcher, raw).await;

        let mut record = JournalRecord::new(&ctx.request_id, &ctx.subject);
        record.resolve_ms = ctx.resolve_ms;
        record.speech_ms = ctx.speech_ms;
        record.total_ms = elapsed_ms(ctx.started);

        let pending = match result {
            Ok(finalized) => {
                record.kind = Some(finalized.response.kind);
                record.cache_hit = finalized.response.cache_hit;
                on_complete(Ok(finalized.response));
                if let Err(err) = dispatcher.complete() {
                    tracing::error!(
                        event_name = "conversation.dispatch_invariant",
                        request_id = %ctx.request_id,
                        error = %err,
                        "completion rejected by dispatcher"
                    );
                }
                finalized.pending
            }
            Err(err) => {
                record.result = "error".to_string();
                record.error_code = Some(err.code().to_string());
                tracing::warn!(
                    event_name = "conversation.failed",
                    request_id = %ctx.request_id,
                    code = err.code(),
                    error = %err,
                    "conversation request failed"
                );
                on_complete(Err(err));
                None
            }
        };

        if let Some(pending) = pending {
            self.cache.store(&pending.key, &pending.binary).await;
        }

        let kind = record.kind.map(|k| k.as_str()).unwrap_or("none");
        let cache_hit = record.cache_hit;
        let total_ms = record.total_ms;
        if let Err(err) = self.journal.append(record).await {
            tracing::warn!(
                event_name = "conversation.journal_failed",
                request_id = %ctx.request_id,
                error = %err,
                "journal append failed"
            );
        }
        tracing::info!(
            event_name = "conversation.completed",
            request_id = %ctx.request_id,
            kind,
            cache_hit,
            resolve_ms = ctx.resolve_ms,
            speech_ms = ctx.speech_ms,
            total_ms,
            "conversation request completed"
        );
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        dispatcher: &mut Dispatcher,
        raw: &Value,
    ) -> Result<Finalized, ConversationError> {
        let request = sanitize(raw);
        ctx.subject = request.user_info.sub.clone();
        validate_request(&request)?;
        dispatcher.begin()?;

        let resolve_started = Instant::now();
        let outcome = self.resolver.resolve(&request).await?;
        ctx.resolve_ms = elapsed_ms(resolve_started);

        let event_name = dispatcher.dispatch(&outcome)?;
        let voiced = needs_voice(&outcome, request.voice_on_server);
        tracing::info!(
            event_name,
            request_id = %ctx.request_id,
            kind = outcome.kind().as_str(),
            needs_voice = voiced,
            "outcome dispatched"
        );

        let (audio, pending) = match outcome.payload() {
            Some(payload) if voiced => {
                let speech_started = Instant::now();
                let spoken = self.voice(payload, &request, ctx).await?;
                ctx.speech_ms = elapsed_ms(speech_started);
                (Some(spoken.audio), spoken.pending)
            }
            _ => (None, None),
        };

        Ok(Finalized {
            response: finalize(&outcome, audio),
            pending,
        })
    }

    /// Voices `request.text` without resolving it, answering `on_complete`
    /// before freshly synthesized audio is written to the cache.
    pub async fn speak<F>(&self, request: &SpeechRequest, on_complete: F)
    where
        F: FnOnce(Result<SpeechResponse, ConversationError>) + Send,
    {
        let ctx = RequestContext::new();
        let result = match validate_speech_request(request) {
            Ok(()) => {
                let job = standalone_speech_job(request, &self.default_voice, &self.output_format);
                self.voice_job(job, &ctx).await
            }
            Err(err) => Err(err.into()),
        };

        let pending = match result {
            Ok(spoken) => {
                let cache_hit = spoken.audio.cache_hit;
                on_complete(Ok(SpeechResponse {
                    text: request.text.clone(),
                    binary: spoken.audio.binary,
                    hash_base: spoken.audio.key.into_string(),
                    cache_hit,
                }));
                tracing::info!(
                    event_name = "speech.completed",
                    request_id = %ctx.request_id,
                    cache_hit,
                    total_ms = elapsed_ms(ctx.started),
                    "speech request completed"
                );
                spoken.pending
            }
            Err(err) => {
                tracing::warn!(
                    event_name = "speech.failed",
                    request_id = %ctx.request_id,
                    code = err.code(),
                    error = %err,
                    "speech request failed"
                );
                on_complete(Err(err));
                None
            }
        };

        if let Some(pending) = pending {
            self.cache.store(&pending.key, &pending.binary).await;
        }
    }

    async fn voice(
        &self,
        payload: &ResponsePayload,
        request: &Request,
        ctx: &RequestContext,
    ) -> Result<Voiced, ConversationError> {
        let job = speech_job(payload, request, &self.default_voice, &self.output_format);
        self.voice_job(job, ctx).await
    }

    async fn voice_job(
        &self,
        job: SpeechJob,
        ctx: &RequestContext,
    ) -> Result<Voiced, ConversationError> {
        if let Some(binary) = self.cache.lookup(&job.key).await {
            tracing::debug!(
                event_name = "speech_cache.hit",
                request_id = %ctx.request_id,
                cache_key = %job.key,
                "serving cached audio"
            );
            return Ok(Voiced {
                audio: VoicedAudio {
                    binary,
                    cache_hit: true,
                    key: job.key,
                },
                pending: None,
            });
        }

        tracing::debug!(
            event_name = "speech_cache.miss",
            request_id = %ctx.request_id,
            cache_key = %job.key,
            voice = %job.request.voice_id,
            "synthesizing audio"
        );
        let audio = self.speech.synthesize(&job.request).await?;
        let binary = STANDARD.encode(audio);
        let pending = self.cache.enabled().then(|| PendingAudio {
            key: job.key.clone(),
            binary: binary.clone(),
        });
        Ok(Voiced {
            audio: VoicedAudio {
                binary,
                cache_hit: false,
                key: job.key,
            },
            pending,
        })
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
