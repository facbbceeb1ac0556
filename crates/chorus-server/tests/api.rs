use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chorus_config::{Cache, Config, Journal, Logging, Nlu, Server, Speech, Store};
use chorus_contracts::{
    FinalResponse, NluMessage, NluQuery, NluReply, OutcomeKind, SpeechRequest, SpeechResponse,
    SynthesisRequest, TextType, API_VERSION,
};
use chorus_kernel::{cache_key, CacheKey};
use chorus_server::{
    build_app_with, router, verify_journal_chain, AudioBackend, AudioStore, ConversationError,
    ConversationJournal, FsAudioStore, IntentResolver, NluEngine, Orchestrator, ResolutionError,
    SpeechCache, SpeechEngine, StoreError, SynthesisError,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

const SUB: &str = "77069b76-bf23-4b9b-b2ff-4ae245feca3g";

fn unique(prefix: &str, ext: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("{prefix}-{nanos}.{ext}"))
        .to_string_lossy()
        .to_string()
}

fn test_config() -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        nlu: Nlu {
            endpoint: "http://127.0.0.1:9/recognize".to_string(),
            bot_id: "ConciergeBot".to_string(),
            bot_alias_id: "test".to_string(),
            language: "English".to_string(),
            timeout_ms: 500,
            retry_max_attempts: 1,
            retry_backoff_ms: 0,
        },
        speech: Speech {
            endpoint: "http://127.0.0.1:9/synthesize".to_string(),
            default_voice: "Joanna".to_string(),
            output_format: "mp3".to_string(),
            timeout_ms: 500,
            retry_max_attempts: 1,
            retry_backoff_ms: 0,
        },
        cache: Cache {
            enabled: true,
            store: Store {
                kind: "memory".to_string(),
                sqlite_path: None,
                dir: None,
            },
        },
        journal: Journal {
            jsonl_path: unique("chorus-journal", "jsonl"),
        },
        logging: Logging::default(),
    }
}

fn test_config_sqlite(db_path: &str) -> Config {
    let mut cfg = test_config();
    cfg.cache.store.kind = "sqlite".to_string();
    cfg.cache.store.sqlite_path = Some(db_path.to_string());
    cfg
}

/// NLU engine answering every query with the same reply.
struct ScriptedNlu {
    reply: NluReply,
    seen: Mutex<Vec<NluQuery>>,
}

impl ScriptedNlu {
    fn replying(reply: NluReply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn saying(text: &str) -> Arc<Self> {
        Self::replying(NluReply {
            messages: vec![NluMessage {
                content: text.to_string(),
            }],
            ..NluReply::default()
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl NluEngine for ScriptedNlu {
    async fn recognize(&self, query: &NluQuery) -> Result<NluReply, ResolutionError> {
        self.seen.lock().unwrap().push(query.clone());
        Ok(self.reply.clone())
    }
}

struct DownNlu;

#[async_trait]
impl NluEngine for DownNlu {
    async fn recognize(&self, _query: &NluQuery) -> Result<NluReply, ResolutionError> {
        Err(ResolutionError::Status(503))
    }
}

/// Speech engine returning fixed bytes and recording each request.
#[derive(Default)]
struct CountingSpeech {
    seen: Mutex<Vec<SynthesisRequest>>,
}

impl CountingSpeech {
    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechEngine for CountingSpeech {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(format!("audio:{}:{}", request.voice_id, request.text).into_bytes())
    }
}

struct DownSpeech;

#[async_trait]
impl SpeechEngine for DownSpeech {
    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
        Err(SynthesisError::Transport("connection reset".to_string()))
    }
}

/// Audio backend whose writes wait until the test releases them.
#[derive(Default)]
struct GatedBackend {
    release: tokio::sync::Notify,
    entries: Mutex<HashMap<String, String>>,
}

impl GatedBackend {
    fn stored(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl AudioBackend for GatedBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().unwrap().get(key.as_str()).cloned())
    }

    async fn put(&self, key: &CacheKey, audio: &str) -> Result<(), StoreError> {
        self.release.notified().await;
        self.entries
            .lock()
            .unwrap()
            .entry(key.as_str().to_string())
            .or_insert_with(|| audio.to_string());
        Ok(())
    }
}

async fn orchestrator_with_store(
    store: AudioStore,
    nlu: Arc<dyn NluEngine>,
    speech: Arc<dyn SpeechEngine>,
) -> Orchestrator {
    let cfg = test_config();
    Orchestrator::new(
        IntentResolver::new(nlu, &cfg.nlu).unwrap(),
        speech,
        SpeechCache::new(store, true),
        ConversationJournal::open(&cfg.journal.jsonl_path).await.unwrap(),
        cfg.speech.default_voice.clone(),
        cfg.speech.output_format.clone(),
    )
}

fn inbound(text: &str, voice: bool) -> Value {
    json!({
        "body": {
            "text": text,
            "lang": "en-US",
            "voiceOnServer": voice
        },
        "userInfo": {
            "email": "foo@example.com",
            "sub": SUB
        }
    })
}

async fn post_conversation(app: axum::Router, body: Body) -> (StatusCode, Value) {
    post_json(app, "/v1/conversations", body).await
}

async fn post_json(app: axum::Router, uri: &str, body: Body) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn run_once(orchestrator: &Orchestrator, raw: &Value) -> Result<FinalResponse, ConversationError> {
    let calls = Arc::new(AtomicUsize::new(0));
    let slot = Arc::new(Mutex::new(None));
    {
        let calls = calls.clone();
        let slot = slot.clone();
        orchestrator
            .process(raw, move |result| {
                calls.fetch_add(1, Ordering::SeqCst);
                *slot.lock().unwrap() = Some(result);
            })
            .await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "callback must fire exactly once");
    let result = slot.lock().unwrap().take();
    result.expect("callback delivered a result")
}

async fn speak_once(
    orchestrator: &Orchestrator,
    request: &SpeechRequest,
) -> Result<SpeechResponse, ConversationError> {
    let slot = Arc::new(Mutex::new(Vec::new()));
    {
        let slot = slot.clone();
        orchestrator
            .speak(request, move |result| slot.lock().unwrap().push(result))
            .await;
    }
    let mut results = std::mem::take(&mut *slot.lock().unwrap());
    assert_eq!(results.len(), 1, "callback must fire exactly once");
    results.remove(0)
}

fn final_response_validator() -> jsonschema::Validator {
    schema_validator("final_response.schema.json")
}

fn schema_validator(file: &str) -> jsonschema::Validator {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../contracts/v1")
        .join(file);
    let schema: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    jsonschema::validator_for(&schema).unwrap()
}

#[tokio::test]
async fn healthz_ok() {
    let app = build_app_with(test_config(), ScriptedNlu::saying("hi"), Arc::new(CountingSpeech::default()))
        .await
        .unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn contracts_endpoint_reports_manifest() {
    let app = build_app_with(test_config(), ScriptedNlu::saying("hi"), Arc::new(CountingSpeech::default()))
        .await
        .unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/contracts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["api_version"], API_VERSION);
    assert_eq!(payload["openapi_sha256"].as_str().unwrap().len(), 64);
    assert_eq!(payload["contracts_set_sha256"].as_str().unwrap().len(), 64);
    assert_eq!(payload["outcome_kinds"].as_array().unwrap().len(), 9);
    assert!(payload["languages"]
        .as_array()
        .unwrap()
        .contains(&json!("German")));
}

#[tokio::test]
async fn text_only_request_returns_simple_response() {
    let nlu = ScriptedNlu::saying("Hello! How can I help?");
    let speech = Arc::new(CountingSpeech::default());
    let app = build_app_with(test_config(), nlu.clone(), speech.clone())
        .await
        .unwrap();

    let (status, body) =
        post_conversation(app, Body::from(inbound("t;e@s+<>t#", false).to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "simple_response");
    assert_eq!(body["text"], "Hello! How can I help?");
    assert_eq!(body["cacheHit"], false);
    assert!(body.get("binary").is_none());
    assert!(final_response_validator().is_valid(&body));

    let seen = nlu.seen.lock().unwrap();
    assert_eq!(seen[0].text, "test");
    assert_eq!(seen[0].session_id, SUB);
    assert_eq!(seen[0].locale_id, "en_US");
    assert_eq!(
        seen[0].attributes.get("email").map(String::as_str),
        Some("foo@example.com")
    );
    assert_eq!(speech.calls(), 0);
}

#[tokio::test]
async fn invalid_identity_is_rejected_before_any_engine_call() {
    let nlu = ScriptedNlu::saying("unused");
    let speech = Arc::new(CountingSpeech::default());
    let app = build_app_with(test_config(), nlu.clone(), speech.clone())
        .await
        .unwrap();

    let mut raw = inbound("hello", true);
    raw["userInfo"]["sub"] = json!("wrongsub-abc");
    let (status, body) = post_conversation(app.clone(), Body::from(raw.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation.invalid_subject");

    let mut raw = inbound("hello", true);
    raw["body"]["lang"] = json!("abcd");
    let (status, body) = post_conversation(app.clone(), Body::from(raw.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation.invalid_locale");

    let mut raw = inbound("hello", true);
    raw["userInfo"]["email"] = json!("wrongemail@");
    let (status, body) = post_conversation(app, Body::from(raw.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation.invalid_email");

    assert_eq!(nlu.calls(), 0);
    assert_eq!(speech.calls(), 0);
}

#[tokio::test]
async fn empty_or_mistyped_email_is_rejected_before_resolution() {
    let nlu = ScriptedNlu::saying("unused");
    let speech = Arc::new(CountingSpeech::default());
    let app = build_app_with(test_config(), nlu.clone(), speech.clone())
        .await
        .unwrap();

    for email in [json!(""), json!(42), json!({"address": "foo@example.com"})] {
        let mut raw = inbound("hello", true);
        raw["userInfo"]["email"] = email.clone();
        let (status, body) = post_conversation(app.clone(), Body::from(raw.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{email}");
        assert_eq!(body["error"]["code"], "validation.invalid_email", "{email}");
    }

    assert_eq!(nlu.calls(), 0);
    assert_eq!(speech.calls(), 0);
}

#[tokio::test]
async fn malformed_json_body_is_rejected() {
    let app = build_app_with(test_config(), ScriptedNlu::saying("hi"), Arc::new(CountingSpeech::default()))
        .await
        .unwrap();
    let (status, body) = post_conversation(app, Body::from("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation.malformed_body");
}

#[tokio::test]
async fn resolver_failure_maps_to_bad_gateway() {
    let app = build_app_with(test_config(), Arc::new(DownNlu), Arc::new(CountingSpeech::default()))
        .await
        .unwrap();
    let (status, body) = post_conversation(app, Body::from(inbound("hello", true).to_string())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "resolution_failed");
}

#[tokio::test]
async fn synthesis_failure_discards_text_and_maps_to_bad_gateway() {
    let app = build_app_with(test_config(), ScriptedNlu::saying("Your order shipped."), Arc::new(DownSpeech))
        .await
        .unwrap();
    let (status, body) = post_conversation(app, Body::from(inbound("status", true).to_string())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "synthesis_failed");
    assert!(body.get("text").is_none());
}

#[tokio::test]
async fn empty_nlu_reply_falls_back_to_try_again() {
    let app = build_app_with(
        test_config(),
        ScriptedNlu::replying(NluReply::default()),
        Arc::new(CountingSpeech::default()),
    )
    .await
    .unwrap();
    let (status, body) = post_conversation(app, Body::from(inbound("blorp", false).to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "no_intent_found");
    assert_eq!(body["text"], "I could not understand.");
}

#[tokio::test]
async fn repeated_voiced_request_is_served_from_cache() {
    let cfg = test_config();
    let speech = Arc::new(CountingSpeech::default());
    let orchestrator = Orchestrator::from_config(&cfg, ScriptedNlu::saying("Your pizza is on its way."), speech.clone())
        .await
        .unwrap();
    let raw = inbound("where is my pizza", true);

    let first = run_once(&orchestrator, &raw).await.unwrap();
    let second = run_once(&orchestrator, &raw).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert!(first.binary.is_some());
    assert_eq!(first.binary, second.binary);
    assert_eq!(first.text, second.text);
    assert_eq!(speech.calls(), 1);

    let key = cache_key("Joanna", "Your pizza is on its way.", None);
    assert_eq!(first.hash_base.as_deref(), Some(key.as_str()));
    assert_eq!(second.hash_base, first.hash_base);
    assert!(final_response_validator().is_valid(&serde_json::to_value(&second).unwrap()));
}

#[tokio::test]
async fn voice_and_pronunciation_change_the_cache_key() {
    let cfg = test_config();
    let speech = Arc::new(CountingSpeech::default());
    let orchestrator = Orchestrator::from_config(&cfg, ScriptedNlu::saying("Bonjour"), speech.clone())
        .await
        .unwrap();

    let plain = inbound("hi", true);
    let mut other_voice = inbound("hi", true);
    other_voice["body"]["voice"] = json!("Matthew");
    let mut with_lexicon = inbound("hi", true);
    with_lexicon["body"]["customPronunciation"] = json!("french-names");

    for raw in [&plain, &other_voice, &with_lexicon] {
        assert!(!run_once(&orchestrator, raw).await.unwrap().cache_hit);
    }
    assert_eq!(speech.calls(), 3);

    let seen = speech.seen.lock().unwrap();
    assert_eq!(seen[0].voice_id, "Joanna");
    assert_eq!(seen[1].voice_id, "Matthew");
    assert_eq!(seen[2].lexicon_names, vec!["french-names".to_string()]);
    assert_eq!(seen[0].text_type, TextType::Text);
}

#[tokio::test]
async fn ssml_speech_text_is_synthesized_as_ssml() {
    let cfg = test_config();
    let speech = Arc::new(CountingSpeech::default());
    let nlu = ScriptedNlu::replying(NluReply {
        kind: Some(OutcomeKind::AsyncConversation),
        messages: vec![NluMessage {
            content: "One moment".to_string(),
        }],
        speech: Some("<speak>One moment please</speak>".to_string()),
        ..NluReply::default()
    });
    let orchestrator = Orchestrator::from_config(&cfg, nlu, speech.clone()).await.unwrap();

    let response = run_once(&orchestrator, &inbound("wait", true)).await.unwrap();
    assert_eq!(response.kind, OutcomeKind::AsyncConversation);
    assert_eq!(response.text, "One moment");

    let seen = speech.seen.lock().unwrap();
    assert_eq!(seen[0].text_type, TextType::Ssml);
    assert_eq!(seen[0].text, "<speak>One moment please</speak>");
}

#[tokio::test]
async fn backend_audio_passes_through_without_synthesis() {
    let cfg = test_config();
    let speech = Arc::new(CountingSpeech::default());
    let nlu = ScriptedNlu::replying(NluReply {
        kind: Some(OutcomeKind::BackendResponse),
        messages: vec![NluMessage {
            content: "Order 42 confirmed".to_string(),
        }],
        binary: Some("SUQzBAAA".to_string()),
        content: Some(json!({"orderId": 42})),
        ..NluReply::default()
    });
    let orchestrator = Orchestrator::from_config(&cfg, nlu, speech.clone()).await.unwrap();

    let response = run_once(&orchestrator, &inbound("order", true)).await.unwrap();
    assert_eq!(response.binary.as_deref(), Some("SUQzBAAA"));
    assert!(!response.cache_hit);
    assert_eq!(response.hash_base, None);
    assert_eq!(response.content, Some(json!({"orderId": 42})));
    assert_eq!(speech.calls(), 0);
}

#[tokio::test]
async fn callback_fires_once_for_every_outcome_kind() {
    for kind in OutcomeKind::ALL {
        let cfg = test_config();
        let speech = Arc::new(CountingSpeech::default());
        let nlu = ScriptedNlu::replying(NluReply {
            kind: Some(kind),
            messages: vec![NluMessage {
                content: "Handled".to_string(),
            }],
            summary: Some("session closed".to_string()),
            ..NluReply::default()
        });
        let orchestrator = Orchestrator::from_config(&cfg, nlu, speech.clone()).await.unwrap();

        let response = run_once(&orchestrator, &inbound("go", true)).await.unwrap();
        assert_eq!(response.kind, kind);
        if kind == OutcomeKind::Completed {
            assert!(response.text.is_empty());
            assert_eq!(speech.calls(), 0);
        } else {
            assert_eq!(response.text, "Handled");
            assert_eq!(speech.calls(), 1);
        }
    }
}

#[tokio::test]
async fn failures_also_fire_the_callback_once() {
    let cfg = test_config();
    let orchestrator = Orchestrator::from_config(&cfg, Arc::new(DownNlu), Arc::new(DownSpeech))
        .await
        .unwrap();
    let err = run_once(&orchestrator, &inbound("hi", true)).await.unwrap_err();
    assert!(matches!(err, ConversationError::ResolutionFailed(_)));

    let orchestrator = Orchestrator::from_config(&cfg, ScriptedNlu::saying("hi"), Arc::new(DownSpeech))
        .await
        .unwrap();
    let err = run_once(&orchestrator, &inbound("hi", true)).await.unwrap_err();
    assert!(matches!(err, ConversationError::SynthesisFailed(_)));
}

#[tokio::test]
async fn disabled_cache_synthesizes_every_time() {
    let mut cfg = test_config();
    cfg.cache.enabled = false;
    let speech = Arc::new(CountingSpeech::default());
    let orchestrator = Orchestrator::from_config(&cfg, ScriptedNlu::saying("Hello"), speech.clone())
        .await
        .unwrap();
    let raw = inbound("hi", true);
    assert!(!run_once(&orchestrator, &raw).await.unwrap().cache_hit);
    assert!(!run_once(&orchestrator, &raw).await.unwrap().cache_hit);
    assert_eq!(speech.calls(), 2);
}

#[tokio::test]
async fn sqlite_cache_is_shared_across_restarts() {
    let db_path = unique("chorus-audio", "db");
    let raw = inbound("hi", true);

    let first_speech = Arc::new(CountingSpeech::default());
    let first = Orchestrator::from_config(
        &test_config_sqlite(&db_path),
        ScriptedNlu::saying("Welcome back"),
        first_speech.clone(),
    )
    .await
    .unwrap();
    let miss = run_once(&first, &raw).await.unwrap();
    assert!(!miss.cache_hit);
    drop(first);

    let second_speech = Arc::new(CountingSpeech::default());
    let second = Orchestrator::from_config(
        &test_config_sqlite(&db_path),
        ScriptedNlu::saying("Welcome back"),
        second_speech.clone(),
    )
    .await
    .unwrap();
    let hit = run_once(&second, &raw).await.unwrap();
    assert!(hit.cache_hit);
    assert_eq!(hit.binary, miss.binary);
    assert_eq!(second_speech.calls(), 0);
}

#[tokio::test]
async fn journal_records_every_request_and_detects_tampering() {
    let cfg = test_config();
    let journal_path = cfg.journal.jsonl_path.clone();
    let orchestrator = Orchestrator::from_config(&cfg, ScriptedNlu::saying("Hello"), Arc::new(CountingSpeech::default()))
        .await
        .unwrap();

    let raw = inbound("hi", true);
    run_once(&orchestrator, &raw).await.unwrap();
    run_once(&orchestrator, &raw).await.unwrap();
    let mut invalid = raw.clone();
    invalid["userInfo"]["sub"] = json!("nope");
    run_once(&orchestrator, &invalid).await.unwrap_err();

    assert_eq!(verify_journal_chain(&journal_path).unwrap(), 3);

    let text = std::fs::read_to_string(&journal_path).unwrap();
    let records: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records[0]["kind"], "simple_response");
    assert_eq!(records[0]["cache_hit"], false);
    assert_eq!(records[1]["cache_hit"], true);
    assert_eq!(records[2]["result"], "error");
    assert_eq!(records[2]["error_code"], "validation.invalid_subject");
    assert!(records.iter().all(|r| r.get("binary").is_none()));

    std::fs::write(&journal_path, text.replacen("\"cache_hit\":true", "\"cache_hit\":false", 1))
        .unwrap();
    assert!(verify_journal_chain(&journal_path).is_err());
}

#[tokio::test]
async fn speech_request_misses_then_hits_the_cache() {
    let speech = Arc::new(CountingSpeech::default());
    let orchestrator = Orchestrator::from_config(&test_config(), ScriptedNlu::saying("unused"), speech.clone())
        .await
        .unwrap();
    let request = SpeechRequest {
        text: "Bom dia".to_string(),
        voice: Some("Ricardo".to_string()),
        custom_pronunciation: None,
    };

    let miss = speak_once(&orchestrator, &request).await.unwrap();
    let hit = speak_once(&orchestrator, &request).await.unwrap();

    assert!(!miss.cache_hit);
    assert!(hit.cache_hit);
    assert_eq!(miss.text, "Bom dia");
    assert_eq!(miss.binary, STANDARD.encode("audio:Ricardo:Bom dia"));
    assert_eq!(hit.binary, miss.binary);
    assert_eq!(miss.hash_base, cache_key("Ricardo", "Bom dia", None).into_string());
    assert_eq!(hit.hash_base, miss.hash_base);
    assert_eq!(speech.calls(), 1);
}

#[tokio::test]
async fn speech_endpoint_uses_default_voice_and_shares_conversation_keys() {
    let speech = Arc::new(CountingSpeech::default());
    let app = build_app_with(test_config(), ScriptedNlu::saying("unused"), speech.clone())
        .await
        .unwrap();
    let (status, body) = post_json(
        app,
        "/v1/speech",
        Body::from(json!({"text": "Hello there", "customPronunciation": "names"}).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cacheHit"], false);
    assert_eq!(body["text"], "Hello there");
    assert_eq!(
        body["hashBase"],
        cache_key("Joanna", "Hello there", Some("names")).into_string()
    );
    assert!(schema_validator("speech_response.schema.json").is_valid(&body));

    let seen = speech.seen.lock().unwrap();
    assert_eq!(seen[0].voice_id, "Joanna");
    assert_eq!(seen[0].lexicon_names, vec!["names".to_string()]);
}

#[tokio::test]
async fn speech_endpoint_rejects_empty_text_and_reports_engine_failure() {
    let speech = Arc::new(CountingSpeech::default());
    let app = build_app_with(test_config(), ScriptedNlu::saying("unused"), speech.clone())
        .await
        .unwrap();
    let (status, body) = post_json(app.clone(), "/v1/speech", Body::from(json!({"text": " "}).to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation.empty_text");

    let (status, body) = post_json(app, "/v1/speech", Body::from(json!({"voice": "Joanna"}).to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation.malformed_body");
    assert_eq!(speech.calls(), 0);

    let down = build_app_with(test_config(), ScriptedNlu::saying("unused"), Arc::new(DownSpeech))
        .await
        .unwrap();
    let (status, body) = post_json(down, "/v1/speech", Body::from(json!({"text": "Hello"}).to_string())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "synthesis_failed");
}

#[tokio::test]
async fn unwritable_audio_store_still_returns_fresh_audio() {
    let dir = unique("chorus-audio-fs", "d");
    let store = FsAudioStore::open(&dir).await.unwrap();
    std::fs::remove_dir_all(&dir).unwrap();
    std::fs::write(&dir, "not a directory").unwrap();

    let speech = Arc::new(CountingSpeech::default());
    let orchestrator = orchestrator_with_store(
        AudioStore::Fs(store),
        ScriptedNlu::saying("Your table is ready."),
        speech.clone(),
    )
    .await;
    let raw = inbound("table", true);

    for _ in 0..2 {
        let response = run_once(&orchestrator, &raw).await.unwrap();
        assert!(!response.cache_hit);
        assert_eq!(
            response.binary.as_deref(),
            Some(STANDARD.encode("audio:Joanna:Your table is ready.").as_str())
        );
    }
    assert_eq!(speech.calls(), 2);
}

#[tokio::test]
async fn callback_fires_before_the_cache_write() {
    let backend = Arc::new(GatedBackend::default());
    let orchestrator = orchestrator_with_store(
        AudioStore::External(backend.clone()),
        ScriptedNlu::saying("Ready when you are."),
        Arc::new(CountingSpeech::default()),
    )
    .await;
    let answered = Arc::new(AtomicBool::new(false));
    let raw = inbound("ready", true);

    let run = {
        let backend = backend.clone();
        let answered = answered.clone();
        orchestrator.process(&raw, move |result| {
            assert!(result.is_ok());
            assert_eq!(backend.stored(), 0, "audio stored before the caller was answered");
            answered.store(true, Ordering::SeqCst);
            backend.release.notify_one();
        })
    };
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("cache write waited on the callback");

    assert!(answered.load(Ordering::SeqCst));
    assert_eq!(backend.stored(), 1);
}

#[tokio::test]
async fn http_response_does_not_wait_for_the_cache_write() {
    let backend = Arc::new(GatedBackend::default());
    let orchestrator = orchestrator_with_store(
        AudioStore::External(backend.clone()),
        ScriptedNlu::saying("Ready when you are."),
        Arc::new(CountingSpeech::default()),
    )
    .await;
    let app = router(Arc::new(orchestrator));

    let (status, body) = tokio::time::timeout(
        Duration::from_secs(2),
        post_conversation(app, Body::from(inbound("ready", true).to_string())),
    )
    .await
    .expect("answered while the cache write is blocked");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cacheHit"], false);
    assert!(body["binary"].is_string());
    assert_eq!(backend.stored(), 0);

    backend.release.notify_one();
    for _ in 0..100 {
        if backend.stored() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(backend.stored(), 1);
}
