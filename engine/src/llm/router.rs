//! LLM Router
//!
//! Failover across the configured providers. The configured default is
//! always tried first; the rest follow cheapest-first. Each attempt is
//! bounded by the inference timeout, and only when every provider has
//! failed does the caller see an error.

use super::{InferenceRequest, LLMError, LLMProvider, LLMResponse};
use std::time::Duration;

pub struct LLMRouter {
    providers: Vec<Box<dyn LLMProvider>>,
    default_provider: String,
    timeout: Duration,
}

impl LLMRouter {
    pub fn new(
        providers: Vec<Box<dyn LLMProvider>>,
        default_provider: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            providers,
            default_provider: default_provider.into(),
            timeout,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Providers in attempt order for a request of `tokens` size
    pub fn rank_providers(&self, tokens: usize) -> Vec<&dyn LLMProvider> {
        let mut providers: Vec<&dyn LLMProvider> =
            self.providers.iter().map(|b| b.as_ref()).collect();

        providers.sort_by(|a, b| {
            let a_default = a.name() == self.default_provider;
            let b_default = b.name() == self.default_provider;
            b_default.cmp(&a_default).then_with(|| {
                a.estimated_cost(tokens)
                    .partial_cmp(&b.estimated_cost(tokens))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });

        providers
    }

    /// Run one reasoning step with automatic failover
    ///
    /// Returns the response and the name of the provider that produced it.
    pub async fn call(&self, request: &InferenceRequest) -> super::Result<(LLMResponse, String)> {
        if self.providers.is_empty() {
            return Err(LLMError::ProviderUnavailable(
                "No LLM providers configured".to_string(),
            ));
        }

        let mut last_error = None;
        for provider in self.rank_providers(request.estimated_tokens()) {
            tracing::debug!(
                "Attempting provider: {} (role: {:?}, timeout: {}s)",
                provider.name(),
                request.role,
                self.timeout.as_secs()
            );

            match tokio::time::timeout(self.timeout, provider.generate(request)).await {
                Ok(Ok(response)) => {
                    tracing::debug!("Provider {} succeeded", provider.name());
                    return Ok((response, provider.name().to_string()));
                }
                Ok(Err(e)) => {
                    tracing::warn!("Provider {} failed: {}", provider.name(), e);
                    last_error = Some(e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Provider {} timed out after {}s",
                        provider.name(),
                        self.timeout.as_secs()
                    );
                    last_error = Some(LLMError::Timeout);
                }
            }
        }

        tracing::error!("All LLM providers exhausted");
        Err(match last_error {
            Some(LLMError::Timeout) => LLMError::Timeout,
            Some(e) => LLMError::ProviderUnavailable(format!("All LLM providers failed: {}", e)),
            None => LLMError::ProviderUnavailable("All LLM providers failed".to_string()),
        })
    }

    /// Health of every registered provider as (name, healthy)
    pub async fn check_health(&self) -> Vec<(&str, bool)> {
        let mut results = Vec::new();
        for provider in &self.providers {
            results.push((provider.name(), provider.check_health().await));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FinalAnswer, InferenceRole};
    use async_trait::async_trait;

    struct MockProvider {
        name: String,
        cost_per_1k: f64,
        fails: bool,
        delay: Duration,
    }

    impl MockProvider {
        fn new(name: &str, cost_per_1k: f64) -> Self {
            Self {
                name: name.to_string(),
                cost_per_1k,
                fails: false,
                delay: Duration::ZERO,
            }
        }

        fn failing(mut self) -> Self {
            self.fails = true;
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl LLMProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_local(&self) -> bool {
            self.cost_per_1k == 0.0
        }

        fn estimated_cost(&self, tokens: usize) -> f64 {
            (tokens as f64 / 1000.0) * self.cost_per_1k
        }

        async fn generate(&self, _request: &InferenceRequest) -> super::super::Result<LLMResponse> {
            tokio::time::sleep(self.delay).await;
            if self.fails {
                return Err(LLMError::NetworkError("boom".to_string()));
            }
            Ok(LLMResponse::FinalAnswer(FinalAnswer::new(format!(
                "from {}",
                self.name
            ))))
        }
    }

    fn request() -> InferenceRequest {
        InferenceRequest::new(InferenceRole::Master, "system")
    }

    #[test]
    fn test_default_provider_ranks_first() {
        let router = LLMRouter::new(
            vec![
                Box::new(MockProvider::new("ollama", 0.0)),
                Box::new(MockProvider::new("openai", 0.005)),
            ],
            "openai",
            Duration::from_secs(1),
        );
        let ranked = router.rank_providers(1000);
        assert_eq!(ranked[0].name(), "openai");
        assert_eq!(ranked[1].name(), "ollama");
    }

    #[test]
    fn test_fallbacks_ordered_by_cost() {
        let router = LLMRouter::new(
            vec![
                Box::new(MockProvider::new("expensive", 0.01)),
                Box::new(MockProvider::new("cheap", 0.001)),
                Box::new(MockProvider::new("primary", 0.02)),
            ],
            "primary",
            Duration::from_secs(1),
        );
        let names: Vec<&str> = router.rank_providers(1000).iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["primary", "cheap", "expensive"]);
    }

    #[tokio::test]
    async fn test_failover_to_next_provider() {
        let router = LLMRouter::new(
            vec![
                Box::new(MockProvider::new("openai", 0.005).failing()),
                Box::new(MockProvider::new("ollama", 0.0)),
            ],
            "openai",
            Duration::from_secs(1),
        );
        let (response, provider) = router.call(&request()).await.unwrap();
        assert_eq!(provider, "ollama");
        assert!(matches!(response, LLMResponse::FinalAnswer(_)));
    }

    #[tokio::test]
    async fn test_all_providers_failing_is_an_error() {
        let router = LLMRouter::new(
            vec![Box::new(MockProvider::new("openai", 0.005).failing())],
            "openai",
            Duration::from_secs(1),
        );
        assert!(matches!(
            router.call(&request()).await,
            Err(LLMError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let router = LLMRouter::new(
            vec![Box::new(
                MockProvider::new("openai", 0.005).slow(Duration::from_millis(200)),
            )],
            "openai",
            Duration::from_millis(20),
        );
        assert!(matches!(router.call(&request()).await, Err(LLMError::Timeout)));
    }

    #[tokio::test]
    async fn test_empty_router() {
        let router = LLMRouter::new(vec![], "openai", Duration::from_secs(1));
        assert!(router.is_empty());
        assert!(router.call(&request()).await.is_err());
    }
}
