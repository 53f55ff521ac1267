//! Shared fixtures for engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use mentor_engine::config::Config;
use mentor_engine::db::{Collection, Database, RecordStore, Row};
use mentor_engine::llm::router::LLMRouter;
use mentor_engine::llm::{
    FinalAnswer, InferenceRequest, InferenceRole, LLMError, LLMProvider, LLMResponse, ToolCall,
};
use mentor_engine::policy::{
    LanguageClassifier, LanguageVerdict, SafetyClassifier, SafetyVerdict, UnsafeCategory,
};
use mentor_engine::turn::TurnHandler;
use sdk::errors::EngineError;

pub async fn temp_store() -> (TempDir, Arc<dyn RecordStore>) {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("mentor.db")).await.unwrap();
    let store: Arc<dyn RecordStore> = Arc::new(db.store());
    (dir, store)
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

/// A user with a first name and an onboarding profile
pub async fn seed_user(
    store: &Arc<dyn RecordStore>,
    user_id: &str,
    first_name: &str,
    profile: Value,
) {
    store
        .upsert(
            Collection::Users,
            row(json!({"id": user_id, "first_name": first_name})),
            &["id"],
        )
        .await
        .unwrap();
    let mut profile = row(profile);
    profile.insert("user_id".into(), json!(user_id));
    store
        .upsert(Collection::UserProfiles, profile, &["user_id"])
        .await
        .unwrap();
}

pub fn tool_call(name: &str, args: Value) -> LLMResponse {
    LLMResponse::ToolCall(ToolCall::generated(name, args.to_string()))
}

pub fn answer(text: &str) -> LLMResponse {
    LLMResponse::FinalAnswer(FinalAnswer::new(text))
}

#[derive(Default)]
struct Script {
    master: VecDeque<LLMResponse>,
    delegate: VecDeque<LLMResponse>,
    classifier: VecDeque<LLMResponse>,
}

impl Script {
    fn queue(&mut self, role: InferenceRole) -> &mut VecDeque<LLMResponse> {
        match role {
            InferenceRole::Master => &mut self.master,
            InferenceRole::Delegate => &mut self.delegate,
            InferenceRole::Classifier => &mut self.classifier,
        }
    }
}

/// Provider that replays scripted responses per inference role
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
    delays: Arc<Mutex<Vec<(InferenceRole, Duration)>>>,
    pub seen: Arc<Mutex<Vec<InferenceRequest>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, role: InferenceRole, responses: Vec<LLMResponse>) -> Self {
        self.script.lock().unwrap().queue(role).extend(responses);
        self
    }

    pub fn delay(self, role: InferenceRole, delay: Duration) -> Self {
        self.delays.lock().unwrap().push((role, delay));
        self
    }

    pub fn requests(&self, role: InferenceRole) -> Vec<InferenceRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.role == role)
            .cloned()
            .collect()
    }

    pub fn router(&self) -> Arc<LLMRouter> {
        Arc::new(LLMRouter::new(
            vec![Box::new(self.clone()) as Box<dyn LLMProvider>],
            "scripted",
            Duration::from_secs(10),
        ))
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn estimated_cost(&self, _tokens: usize) -> f64 {
        0.0
    }

    async fn generate(&self, request: &InferenceRequest) -> Result<LLMResponse, LLMError> {
        self.seen.lock().unwrap().push(request.clone());
        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(role, _)| *role == request.role)
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .queue(request.role)
            .pop_front()
            .ok_or_else(|| LLMError::ProviderUnavailable("script exhausted".to_string()))
    }

    async fn check_health(&self) -> bool {
        true
    }
}

/// Safety classifier with a fixed verdict
pub struct FixedSafety {
    verdict: SafetyVerdict,
    pub calls: AtomicUsize,
}

impl FixedSafety {
    pub fn safe() -> Arc<Self> {
        Arc::new(Self {
            verdict: SafetyVerdict::safe(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn flagging(category: UnsafeCategory) -> Arc<Self> {
        Arc::new(Self {
            verdict: SafetyVerdict::unsafe_because(category, "scripted"),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SafetyClassifier for FixedSafety {
    async fn classify_safety(&self, _message: &str) -> Result<SafetyVerdict, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict.clone())
    }
}

/// Language classifier with a fixed verdict
pub struct FixedLanguage {
    wrong: bool,
    pub calls: AtomicUsize,
}

impl FixedLanguage {
    pub fn new(wrong: bool) -> Arc<Self> {
        Arc::new(Self {
            wrong,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageClassifier for FixedLanguage {
    async fn classify_language(
        &self,
        _text: &str,
        _target_language: &str,
    ) -> Result<LanguageVerdict, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(LanguageVerdict {
            is_wrong_language: self.wrong,
            detected_language: if self.wrong { "English" } else { "Norwegian" }.to_string(),
            reasoning: String::new(),
        })
    }
}

pub fn test_config() -> Config {
    Config::default_config()
}

pub fn handler(
    config: &Config,
    store: &Arc<dyn RecordStore>,
    provider: &ScriptedProvider,
    safety: Arc<FixedSafety>,
    language: Arc<FixedLanguage>,
) -> TurnHandler {
    TurnHandler::with_classifiers(config, Arc::clone(store), provider.router(), safety, language)
}
