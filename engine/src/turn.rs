//! Turn pipeline
//!
//! One user message in, one reply out:
//!
//! ```text
//! RECEIVED -> SAFETY_CHECKED -> ROUTED -> COMPOSED -> LANGUAGE_CHECKED -> RETURNED
//!                  |
//!                  +-> BLOCKED -> RETURNED
//! ```
//!
//! A blocked turn never reaches the router, so no capability runs. The
//! whole turn is bounded by the request deadline; mutations committed
//! before the deadline fires stay committed.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use sdk::errors::EngineError;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::agent::prompt::render;
use crate::agent::{DelegationRouter, HistoryEntry, PolicyBlock, RouterLimits, WorkingMemory};
use crate::capabilities::{build_master_catalog, AuditTrail, Catalog, Invocation, InvocationRecord};
use crate::config::{AgentConfig, Config};
use crate::context::{ContextAssembler, PersonaCache};
use crate::db::RecordStore;
use crate::llm::router::LLMRouter;
use crate::llm::{InferenceRequest, InferenceRole};
use crate::policy::{
    LanguageCheck, LanguageClassifier, LanguageGate, LlmClassifier, SafetyClassifier, SafetyGate,
    REFUSAL, SAFETY_REASON,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    Received,
    SafetyChecked,
    Blocked,
    Routed,
    Composed,
    LanguageChecked,
    Returned,
}

impl TurnStage {
    pub fn can_advance_to(self, next: TurnStage) -> bool {
        use TurnStage::*;
        matches!(
            (self, next),
            (Received, SafetyChecked)
                | (SafetyChecked, Routed)
                | (SafetyChecked, Blocked)
                | (Blocked, Returned)
                | (Routed, Composed)
                | (Composed, LanguageChecked)
                | (LanguageChecked, Returned)
        )
    }
}

impl fmt::Display for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnStage::Received => "RECEIVED",
            TurnStage::SafetyChecked => "SAFETY_CHECKED",
            TurnStage::Blocked => "BLOCKED",
            TurnStage::Routed => "ROUTED",
            TurnStage::Composed => "COMPOSED",
            TurnStage::LanguageChecked => "LANGUAGE_CHECKED",
            TurnStage::Returned => "RETURNED",
        };
        write!(f, "{}", name)
    }
}

/// Stage bookkeeping for one turn
struct StageTracker<'a> {
    user_id: &'a str,
    current: TurnStage,
    visited: Vec<TurnStage>,
}

impl<'a> StageTracker<'a> {
    fn new(user_id: &'a str) -> Self {
        debug!(user_id, stage = %TurnStage::Received, "Turn stage");
        Self {
            user_id,
            current: TurnStage::Received,
            visited: vec![TurnStage::Received],
        }
    }

    fn advance(&mut self, next: TurnStage) {
        debug_assert!(
            self.current.can_advance_to(next),
            "illegal turn transition {} -> {}",
            self.current,
            next
        );
        debug!(user_id = self.user_id, from = %self.current, stage = %next, "Turn stage");
        self.current = next;
        self.visited.push(next);
    }
}

/// Everything the transport reports back for a turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub agent_name: String,
    /// Top-level capabilities in report-back order
    pub tools_called: Vec<String>,
    /// Every invocation at every depth, in report-back order
    pub invocations: Vec<InvocationRecord>,
    pub elapsed_ms: u64,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub language: LanguageCheck,
    #[serde(skip)]
    pub stages: Vec<TurnStage>,
}

impl TurnOutcome {
    pub fn language_flagged(&self) -> bool {
        self.language.is_flagged()
    }
}

pub struct TurnHandler {
    assembler: ContextAssembler,
    router: Arc<DelegationRouter>,
    catalog: Catalog,
    safety: SafetyGate,
    language: LanguageGate,
    policy_block: PolicyBlock,
    agent: AgentConfig,
    master_temperature: f32,
}

impl TurnHandler {
    /// Handler whose gates classify through the same providers as the router
    pub fn new(config: &Config, store: Arc<dyn RecordStore>, llm: Arc<LLMRouter>) -> Self {
        let classifier = Arc::new(LlmClassifier::new(Arc::clone(&llm)));
        let safety: Arc<dyn SafetyClassifier> = Arc::<LlmClassifier>::clone(&classifier);
        Self::with_classifiers(config, store, llm, safety, classifier)
    }

    pub fn with_classifiers(
        config: &Config,
        store: Arc<dyn RecordStore>,
        llm: Arc<LLMRouter>,
        safety: Arc<dyn SafetyClassifier>,
        language: Arc<dyn LanguageClassifier>,
    ) -> Self {
        let personas = Arc::new(PersonaCache::new(config.persona_cache.capacity));
        let assembler = ContextAssembler::new(
            Arc::clone(&store),
            personas,
            config.agent.coach_display_name.clone(),
        );
        let router = Arc::new(DelegationRouter::new(
            llm,
            RouterLimits::from_config(&config.agent),
        ));
        let catalog = build_master_catalog(
            store,
            Arc::clone(&router),
            config.llm.delegate_temperature,
        );

        Self {
            assembler,
            router,
            catalog,
            safety: SafetyGate::new(
                safety,
                config.policy.gate_timeout(),
                config.policy.safety_enabled,
            ),
            language: LanguageGate::new(language, &config.policy),
            policy_block: PolicyBlock::new(config.policy.target_language.clone()),
            agent: config.agent.clone(),
            master_temperature: config.llm.master_temperature,
        }
    }

    /// The master persona's catalog
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run one turn under the request deadline
    ///
    /// # Errors
    /// `StoreUnavailable` if the context cannot be loaded, any fatal
    /// inference error, and `RequestDeadlineExceeded`.
    pub async fn handle_turn(
        &self,
        user_id: &str,
        coach_id: &str,
        message: &str,
        history: &[HistoryEntry],
    ) -> Result<TurnOutcome, EngineError> {
        let started = Instant::now();
        let deadline = self.agent.request_deadline();

        match timeout(deadline, self.run(user_id, coach_id, message, history, started)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    user_id,
                    "Turn exceeded the {}s request deadline",
                    deadline.as_secs()
                );
                Err(EngineError::RequestDeadlineExceeded(deadline.as_secs()))
            }
        }
    }

    async fn run(
        &self,
        user_id: &str,
        coach_id: &str,
        message: &str,
        history: &[HistoryEntry],
        started: Instant,
    ) -> Result<TurnOutcome, EngineError> {
        let mut stages = StageTracker::new(user_id);
        info!(
            user_id,
            coach_id,
            message_len = message.len(),
            history_len = history.len(),
            "Turn received"
        );

        let ctx = self.assembler.assemble(user_id, coach_id).await?;

        let verdict = self.safety.check(message).await;
        stages.advance(TurnStage::SafetyChecked);
        if verdict.is_unsafe {
            stages.advance(TurnStage::Blocked);
            stages.advance(TurnStage::Returned);
            return Ok(TurnOutcome {
                reply: REFUSAL.to_string(),
                agent_name: ctx.coach_name.clone(),
                tools_called: Vec::new(),
                invocations: Vec::new(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                blocked: true,
                blocked_reason: Some(SAFETY_REASON.to_string()),
                language: LanguageCheck::Skipped,
                stages: stages.visited,
            });
        }

        let mut memory = WorkingMemory::from_history(history, self.agent.history_window);
        memory.set_current(message);
        if self.agent.inject_profile_prefix && ctx.has_profile() {
            memory.inject_profile(&ctx.profile_inline());
        }
        debug!(
            window = memory.history_len(),
            tokens = memory.token_count(),
            "Working memory ready"
        );

        let request = InferenceRequest::new(InferenceRole::Master, render(&ctx, &self.policy_block))
            .with_temperature(self.master_temperature)
            .with_messages(memory.messages());
        let trail = AuditTrail::new();
        let invocation = Invocation {
            turn: &ctx,
            trail: &trail,
            depth: 0,
        };
        let routed = self.router.route(request, &self.catalog, &invocation).await?;
        stages.advance(TurnStage::Routed);

        let reply = routed.reply.trim().to_string();
        stages.advance(TurnStage::Composed);

        let language = self.language.check(&reply).await;
        stages.advance(TurnStage::LanguageChecked);

        let tools_called = trail.top_level_names();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        stages.advance(TurnStage::Returned);
        info!(
            user_id,
            provider = %routed.provider,
            steps = routed.steps,
            tools_called = ?tools_called,
            elapsed_ms,
            language_flagged = language.is_flagged(),
            "Turn complete"
        );

        Ok(TurnOutcome {
            reply,
            agent_name: ctx.coach_name.clone(),
            tools_called,
            invocations: trail.snapshot(),
            elapsed_ms,
            blocked: false,
            blocked_reason: None,
            language,
            stages: stages.visited,
        })
    }
}
