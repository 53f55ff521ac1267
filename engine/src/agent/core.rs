//! Delegation Router
//!
//! One reasoning pass over a capability catalog. The router processes a
//! turn through an iterative think-act-observe cycle:
//!
//! 1. Call the inference step with the conversation and the catalog
//! 2. On a capability request: run it under its cost-based timeout, append
//!    the call and its result to the conversation, and loop
//! 3. On a final answer: return it
//!
//! The same router drives the master persona and every delegate's
//! sub-reasoning. Capability failures and timeouts are handed back to the
//! model as text so it can tell the user; only inference failures abort.
//!
//! # Limits
//!
//! - `max_steps` capability requests per pass, then one closing step with
//!   the catalog withheld so the model has to compose a reply
//! - Standard capabilities: `default_capability_timeout_secs`
//! - Extended capabilities: `long_capability_timeout_secs`

use std::sync::Arc;
use std::time::{Duration, Instant};

use sdk::errors::EngineError;
use sdk::schema::CapabilityCost;
use sdk::types::{CapabilityArgs, ExecutionResult};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::capabilities::{Catalog, CapabilityOutcome, Invocation, InvocationRecord};
use crate::config::AgentConfig;
use crate::llm::router::LLMRouter;
use crate::llm::{InferenceRequest, LLMError, LLMResponse, Message, ToolCall};

/// Per-pass bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterLimits {
    pub max_steps: usize,
    pub standard_timeout: Duration,
    pub extended_timeout: Duration,
}

impl RouterLimits {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            standard_timeout: Duration::from_secs(config.default_capability_timeout_secs),
            extended_timeout: Duration::from_secs(config.long_capability_timeout_secs),
        }
    }

    pub fn timeout_for(&self, cost: CapabilityCost) -> Duration {
        match cost {
            CapabilityCost::Standard => self.standard_timeout,
            CapabilityCost::Extended => self.extended_timeout,
        }
    }
}

/// Result of one reasoning pass
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub reply: String,
    /// Capabilities this pass invoked, in report-back order
    pub invoked: Vec<String>,
    /// Provider that produced the final reply
    pub provider: String,
    pub steps: usize,
}

/// Map a provider failure onto the turn-level taxonomy
pub fn inference_error(err: LLMError) -> EngineError {
    match err {
        LLMError::Timeout => EngineError::InferenceTimeout,
        other => EngineError::InferenceUnavailable(other.to_string()),
    }
}

pub struct DelegationRouter {
    llm: Arc<LLMRouter>,
    limits: RouterLimits,
}

impl DelegationRouter {
    pub fn new(llm: Arc<LLMRouter>, limits: RouterLimits) -> Self {
        Self { llm, limits }
    }

    pub fn limits(&self) -> RouterLimits {
        self.limits
    }

    /// Run one pass: `request` carries the rendered prompt, the role,
    /// the temperature and the conversation; the catalog's descriptors
    /// replace any tools already on it.
    ///
    /// # Errors
    /// `InferenceUnavailable` / `InferenceTimeout` when the backend fails,
    /// any non-recoverable error a capability reports, and
    /// `MaxStepsExceeded` when even the closing step asks for a capability.
    pub async fn route(
        &self,
        request: InferenceRequest,
        catalog: &Catalog,
        invocation: &Invocation<'_>,
    ) -> Result<RouteOutcome, EngineError> {
        let mut request = request.with_tools(catalog.specs());
        let mut invoked = Vec::new();

        for step in 1..=self.limits.max_steps + 1 {
            let closing = step > self.limits.max_steps;
            if closing {
                warn!(
                    "Step limit of {} reached at depth {}, asking for a reply",
                    self.limits.max_steps, invocation.depth
                );
                request.tools.clear();
            }

            debug!(
                "Reasoning step {}/{} (role: {:?}, depth: {})",
                step, self.limits.max_steps, request.role, invocation.depth
            );
            let (response, provider) = self.llm.call(&request).await.map_err(|e| {
                error!("Inference failed at step {}: {}", step, e);
                inference_error(e)
            })?;

            match response {
                LLMResponse::FinalAnswer(answer) => {
                    debug!("Final answer from {} after {} step(s)", provider, step);
                    return Ok(RouteOutcome {
                        reply: answer.content,
                        invoked,
                        provider,
                        steps: step,
                    });
                }
                LLMResponse::ToolCall(_) if closing => break,
                LLMResponse::ToolCall(call) => {
                    debug!("Capability requested: {} ({})", call.name, call.id);
                    let output = self.invoke(catalog, &call, invocation).await?;
                    invoked.push(call.name.clone());
                    let call_id = call.id.clone();
                    request.messages.push(Message::assistant_tool_call(call));
                    request.messages.push(Message::tool_result(output, call_id));
                }
            }
        }

        error!(
            "Reasoning pass exceeded {} steps at depth {}",
            self.limits.max_steps, invocation.depth
        );
        Err(EngineError::MaxStepsExceeded(self.limits.max_steps))
    }

    /// Run one capability and record it; the returned text goes back to the model
    async fn invoke(
        &self,
        catalog: &Catalog,
        call: &ToolCall,
        invocation: &Invocation<'_>,
    ) -> Result<String, EngineError> {
        let started = Instant::now();
        let arguments = serde_json::from_str::<Value>(&call.arguments)
            .unwrap_or_else(|_| Value::String(call.arguments.clone()));
        let record = |success: bool, timed_out: bool| InvocationRecord {
            name: call.name.clone(),
            arguments: arguments.clone(),
            success,
            elapsed_ms: started.elapsed().as_millis() as u64,
            depth: invocation.depth,
            timed_out,
        };

        let Some(capability) = catalog.get(&call.name) else {
            warn!("Model requested unknown capability '{}'", call.name);
            invocation.trail.record(record(false, false));
            return Ok(ExecutionResult::failure(
                format!("Verktøyet '{}' finnes ikke", call.name),
                EngineError::CapabilityNotFound(call.name.clone()).to_string(),
            )
            .to_json());
        };

        let args = match CapabilityArgs::from_json_str(&call.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!("Unusable arguments for {}: {}", call.name, e);
                invocation.trail.record(record(false, false));
                return Ok(ExecutionResult::failure(
                    format!("Ugyldige argumenter til {}", call.name),
                    e.to_string(),
                )
                .to_json());
            }
        };

        let limit = self.limits.timeout_for(capability.spec().cost);
        let (outcome, timed_out) = match timeout(limit, capability.call(invocation, &args)).await {
            Ok(Ok(outcome)) => (outcome, false),
            Ok(Err(e)) => {
                error!("Capability {} failed fatally: {}", call.name, e);
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "Capability {} timed out after {}s",
                    call.name,
                    limit.as_secs()
                );
                let err = EngineError::CapabilityTimeout {
                    name: call.name.clone(),
                    secs: limit.as_secs(),
                };
                let result = ExecutionResult::failure(
                    format!("Kunne ikke fullføre {} i tide. Prøv igjen.", call.name),
                    err.to_string(),
                );
                (CapabilityOutcome::from(result), true)
            }
        };

        let entry = record(outcome.success, timed_out);
        info!(
            capability = %entry.name,
            elapsed_ms = entry.elapsed_ms,
            success = entry.success,
            depth = entry.depth,
            "Capability invoked"
        );
        invocation.trail.record(entry);
        Ok(outcome.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{AuditTrail, Capability};
    use crate::context::TurnContext;
    use crate::llm::{FinalAnswer, InferenceRole, LLMProvider};
    use async_trait::async_trait;
    use sdk::schema::CapabilitySpec;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<VecDeque<LLMResponse>>,
        seen: Arc<Mutex<Vec<InferenceRequest>>>,
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_local(&self) -> bool {
            true
        }

        fn estimated_cost(&self, _tokens: usize) -> f64 {
            0.0
        }

        async fn generate(&self, request: &InferenceRequest) -> crate::llm::Result<LLMResponse> {
            self.seen.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LLMError::ProviderUnavailable("script exhausted".to_string()))
        }
    }

    struct Echo {
        spec: CapabilitySpec,
        delay: Duration,
    }

    impl Echo {
        fn new(name: &str, delay: Duration) -> Self {
            Self {
                spec: CapabilitySpec::new(name, "echo"),
                delay,
            }
        }
    }

    #[async_trait]
    impl Capability for Echo {
        fn spec(&self) -> &CapabilitySpec {
            &self.spec
        }

        async fn call(
            &self,
            _invocation: &Invocation<'_>,
            args: &CapabilityArgs,
        ) -> Result<CapabilityOutcome, EngineError> {
            tokio::time::sleep(self.delay).await;
            Ok(ExecutionResult::ok(args.to_json()).into())
        }
    }

    fn router(
        responses: Vec<LLMResponse>,
    ) -> (DelegationRouter, Arc<Mutex<Vec<InferenceRequest>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider = Scripted {
            responses: Mutex::new(responses.into()),
            seen: Arc::clone(&seen),
        };
        let llm = LLMRouter::new(vec![Box::new(provider)], "scripted", Duration::from_secs(5));
        let limits = RouterLimits {
            max_steps: 3,
            standard_timeout: Duration::from_millis(50),
            extended_timeout: Duration::from_millis(200),
        };
        (DelegationRouter::new(Arc::new(llm), limits), seen)
    }

    fn call(name: &str, args: &str) -> LLMResponse {
        LLMResponse::ToolCall(ToolCall::generated(name, args))
    }

    fn answer(text: &str) -> LLMResponse {
        LLMResponse::FinalAnswer(FinalAnswer::new(text))
    }

    fn request() -> InferenceRequest {
        InferenceRequest::new(InferenceRole::Master, "system")
            .with_messages(vec![Message::user("hei")])
    }

    #[tokio::test]
    async fn test_direct_answer_invokes_nothing() {
        let (router, _) = router(vec![answer("Hei!")]);
        let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
        let trail = AuditTrail::new();
        let invocation = Invocation { turn: &ctx, trail: &trail, depth: 0 };

        let outcome = router.route(request(), &Catalog::new(), &invocation).await.unwrap();
        assert_eq!(outcome.reply, "Hei!");
        assert!(outcome.invoked.is_empty());
        assert!(trail.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_tool_result_is_fed_back() {
        let (router, seen) = router(vec![call("echo", r#"{"kg":82}"#), answer("Logget!")]);
        let catalog = Catalog::new().with(Arc::new(Echo::new("echo", Duration::ZERO)));
        let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
        let trail = AuditTrail::new();
        let invocation = Invocation { turn: &ctx, trail: &trail, depth: 0 };

        let outcome = router.route(request(), &catalog, &invocation).await.unwrap();
        assert_eq!(outcome.invoked, vec!["echo"]);
        assert_eq!(outcome.steps, 2);

        let requests = seen.lock().unwrap();
        let second = &requests[1];
        assert_eq!(second.messages.len(), 3);
        assert!(second.messages[2].content.contains("\\\"kg\\\":82"));
        assert_eq!(second.tools.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_a_soft_failure() {
        let (router, seen) = router(vec![call("slow", "{}"), answer("Beklager, prøv igjen")]);
        let catalog = Catalog::new().with(Arc::new(Echo::new("slow", Duration::from_secs(2))));
        let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
        let trail = AuditTrail::new();
        let invocation = Invocation { turn: &ctx, trail: &trail, depth: 0 };

        let outcome = router.route(request(), &catalog, &invocation).await.unwrap();
        assert_eq!(outcome.reply, "Beklager, prøv igjen");

        let records = trail.snapshot();
        assert_eq!(records.len(), 1);
        assert!(records[0].timed_out);
        assert!(!records[0].success);

        let fed_back = &seen.lock().unwrap()[1].messages[2].content;
        assert!(fed_back.contains("i tide"));
    }

    #[tokio::test]
    async fn test_unknown_capability_is_reported_to_model() {
        let (router, _) = router(vec![call("nope", "{}"), answer("ok")]);
        let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
        let trail = AuditTrail::new();
        let invocation = Invocation { turn: &ctx, trail: &trail, depth: 0 };

        let outcome = router.route(request(), &Catalog::new(), &invocation).await.unwrap();
        assert_eq!(outcome.reply, "ok");
        assert!(!trail.snapshot()[0].success);
    }

    #[tokio::test]
    async fn test_inference_failure_is_fatal() {
        let (router, _) = router(vec![]);
        let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
        let trail = AuditTrail::new();
        let invocation = Invocation { turn: &ctx, trail: &trail, depth: 0 };

        let err = router.route(request(), &Catalog::new(), &invocation).await.unwrap_err();
        assert!(matches!(err, EngineError::InferenceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_closing_step_withholds_catalog() {
        let script = vec![
            call("echo", "{}"),
            call("echo", "{}"),
            call("echo", "{}"),
            answer("ferdig"),
        ];
        let (router, seen) = router(script);
        let catalog = Catalog::new().with(Arc::new(Echo::new("echo", Duration::ZERO)));
        let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
        let trail = AuditTrail::new();
        let invocation = Invocation { turn: &ctx, trail: &trail, depth: 0 };

        let outcome = router.route(request(), &catalog, &invocation).await.unwrap();
        assert_eq!(outcome.reply, "ferdig");
        assert_eq!(outcome.invoked.len(), 3);
        assert!(seen.lock().unwrap()[3].tools.is_empty());
    }
}
