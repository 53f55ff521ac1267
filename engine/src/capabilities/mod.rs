//! Capabilities
//!
//! A capability is anything the router may invoke by name: a task executor
//! (one validated unit of record-store work) or a delegate (a nested
//! reasoning pass over a subset of executors). The catalog is built once at
//! startup and never changes afterwards.
//!
//! Every invocation, at any depth, is appended to the turn's [`AuditTrail`]
//! when it reports back, so the trail preserves report-back order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use sdk::errors::EngineError;
use sdk::schema::CapabilitySpec;
use sdk::types::{CapabilityArgs, ExecutionResult};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::context::TurnContext;
use crate::db::{Collection, RecordStore, Row, StoreError};

pub mod body;
pub mod delegates;
pub mod goals;
pub mod nutrition;
pub mod profile;
pub mod stats;
pub mod training;

pub use delegates::{build_master_catalog, DelegateCapability};

/// One capability invocation as recorded for audit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRecord {
    pub name: String,
    pub arguments: Value,
    pub success: bool,
    pub elapsed_ms: u64,
    /// 0 for capabilities invoked by the master persona
    pub depth: usize,
    pub timed_out: bool,
}

/// Ordered log of every invocation in a turn
#[derive(Debug, Clone, Default)]
pub struct AuditTrail(Arc<Mutex<Vec<InvocationRecord>>>);

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: InvocationRecord) {
        if let Ok(mut records) = self.0.lock() {
            records.push(record);
        }
    }

    pub fn snapshot(&self) -> Vec<InvocationRecord> {
        self.0.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every invocation at `depth` recorded from index `since` on
    /// succeeded, or `None` if nothing ran at that depth
    pub fn succeeded_since(&self, since: usize, depth: usize) -> Option<bool> {
        let records = self.0.lock().ok()?;
        let mut nested = records.iter().skip(since).filter(|r| r.depth == depth).peekable();
        nested.peek()?;
        Some(nested.all(|r| r.success))
    }

    /// Names of capabilities the master invoked, in report-back order
    pub fn top_level_names(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|r| r.depth == 0)
            .map(|r| r.name)
            .collect()
    }
}

/// Where an invocation happens
pub struct Invocation<'a> {
    pub turn: &'a TurnContext,
    pub trail: &'a AuditTrail,
    pub depth: usize,
}

/// Text handed back to the invoking reasoning step
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityOutcome {
    pub output: String,
    pub success: bool,
}

impl From<ExecutionResult> for CapabilityOutcome {
    fn from(result: ExecutionResult) -> Self {
        Self {
            success: result.success,
            output: result.to_json(),
        }
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn spec(&self) -> &CapabilitySpec;

    /// Run the capability. `Err` is reserved for errors fatal to the turn;
    /// everything else is reported through a failed outcome.
    async fn call(
        &self,
        invocation: &Invocation<'_>,
        args: &CapabilityArgs,
    ) -> Result<CapabilityOutcome, EngineError>;
}

/// A narrowly scoped operation over the record store
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn spec(&self) -> &CapabilitySpec;

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult;
}

/// Adapter exposing a [`TaskExecutor`] as a [`Capability`]
pub struct Executor(pub Arc<dyn TaskExecutor>);

#[async_trait]
impl Capability for Executor {
    fn spec(&self) -> &CapabilitySpec {
        self.0.spec()
    }

    async fn call(
        &self,
        invocation: &Invocation<'_>,
        args: &CapabilityArgs,
    ) -> Result<CapabilityOutcome, EngineError> {
        Ok(self.0.execute(invocation.turn, args).await.into())
    }
}

/// Immutable name -> capability map
#[derive(Clone, Default)]
pub struct Catalog {
    order: Vec<String>,
    entries: HashMap<String, Arc<dyn Capability>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        let name = capability.spec().name.clone();
        if self.entries.insert(name.clone(), capability).is_none() {
            self.order.push(name);
        }
        self
    }

    pub fn with_executor(self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.with(Arc::new(Executor(executor)))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Capability>> {
        self.entries.get(name)
    }

    /// Descriptors in registration order
    pub fn specs(&self) -> Vec<CapabilitySpec> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|c| c.spec().clone())
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Every task executor, keyed by name
pub struct ExecutorSet {
    executors: HashMap<&'static str, Arc<dyn TaskExecutor>>,
}

impl ExecutorSet {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let all: Vec<(&'static str, Arc<dyn TaskExecutor>)> = vec![
            ("log_weight", Arc::new(body::LogWeight::new(Arc::clone(&store)))),
            (
                "get_weight_history",
                Arc::new(body::GetWeightHistory::new(Arc::clone(&store))),
            ),
            ("log_meal", Arc::new(nutrition::LogMeal::new(Arc::clone(&store)))),
            (
                "get_today_nutrition",
                Arc::new(nutrition::GetTodayNutrition::new(Arc::clone(&store))),
            ),
            (
                "save_nutrition_plan",
                Arc::new(nutrition::SaveNutritionPlan::new(Arc::clone(&store))),
            ),
            ("log_workout", Arc::new(training::LogWorkout::new(Arc::clone(&store)))),
            (
                "save_training_plan",
                Arc::new(training::SaveTrainingPlan::new(Arc::clone(&store))),
            ),
            (
                "get_current_training_plan",
                Arc::new(training::GetCurrentTrainingPlan::new(Arc::clone(&store))),
            ),
            ("save_goal", Arc::new(goals::SaveGoal::new(Arc::clone(&store)))),
            (
                "remember_fact",
                Arc::new(profile::RememberFact::new(Arc::clone(&store))),
            ),
            (
                "update_profile",
                Arc::new(profile::UpdateProfile::new(Arc::clone(&store))),
            ),
            ("get_user_stats", Arc::new(stats::GetUserStats::new(store))),
        ];
        Self {
            executors: all.into_iter().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(name).cloned()
    }

    /// Catalog of the named executors; unknown names are skipped with a warning
    pub fn catalog(&self, names: &[&str]) -> Catalog {
        names.iter().fold(Catalog::new(), |catalog, name| match self.get(name) {
            Some(executor) => catalog.with_executor(executor),
            None => {
                warn!("No executor named '{}'", name);
                catalog
            }
        })
    }
}

// Shared helpers for executors

/// Today's date in ISO format, local time
pub fn today() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Validate an optional ISO date, defaulting to today
pub(crate) fn resolve_date(date: Option<&str>) -> Result<String, String> {
    match date.map(str::trim).filter(|d| !d.is_empty()) {
        None => Ok(today()),
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .map(|parsed| parsed.format("%Y-%m-%d").to_string())
            .map_err(|_| format!("invalid date '{}', expected YYYY-MM-DD", d)),
    }
}

/// Format a number without a trailing ".0"
pub(crate) fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Accept a JSON array, or a string holding one
pub(crate) fn parse_json_list(value: &Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(_) => Err("expected a JSON list".to_string()),
            Err(e) => Err(format!("invalid JSON: {}", e)),
        },
        Value::Null => Ok(Vec::new()),
        _ => Err("expected a JSON list".to_string()),
    }
}

/// Build a row from (column, value) pairs
pub(crate) fn row<const N: usize>(pairs: [(&str, Value); N]) -> Row {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Reads degrade to empty: log and carry on
pub(crate) fn or_empty<T: Default>(result: Result<T, StoreError>, what: &str) -> T {
    result.unwrap_or_else(|e| {
        warn!("Read of {} failed, continuing without it: {}", what, e);
        T::default()
    })
}

/// Failure result for a primary write that did not happen
pub(crate) fn write_failed(message: &str, err: StoreError) -> ExecutionResult {
    warn!("Primary write failed: {}", err);
    ExecutionResult::failure(message, err.to_string())
}

/// Append an audit event. The primary mutation has already committed, so a
/// failure here is logged, not reported.
pub(crate) async fn record_change(
    store: &dyn RecordStore,
    user_id: &str,
    kind: &str,
    summary: &str,
    after: Option<Value>,
) {
    let event = row([
        ("user_id", json!(user_id)),
        ("type", json!(kind)),
        ("summary", json!(summary)),
        ("actor", json!("agent")),
        ("after_data", after.unwrap_or(Value::Null)),
    ]);
    if let Err(e) = store.insert(Collection::ChangeEvents, event).await {
        warn!("Failed to record {} change event: {}", kind, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_date() {
        assert_eq!(resolve_date(None).unwrap(), today());
        assert_eq!(resolve_date(Some("  ")).unwrap(), today());
        assert_eq!(resolve_date(Some("2024-05-01")).unwrap(), "2024-05-01");
        assert!(resolve_date(Some("01.05.2024")).is_err());
    }

    #[test]
    fn test_parse_json_list() {
        assert_eq!(parse_json_list(&json!([1, 2])).unwrap().len(), 2);
        assert_eq!(parse_json_list(&json!("[{\"day\":\"Mandag\"}]")).unwrap().len(), 1);
        assert!(parse_json_list(&json!("{\"day\":1}")).is_err());
        assert!(parse_json_list(&json!("not json")).is_err());
        assert!(parse_json_list(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(82.0), "82");
        assert_eq!(fmt_num(82.5), "82.5");
    }

    #[test]
    fn test_audit_trail_top_level_names() {
        let trail = AuditTrail::new();
        for (name, depth) in [("log_weight", 1), ("delegate_body_tracking", 0)] {
            trail.record(InvocationRecord {
                name: name.to_string(),
                arguments: json!({}),
                success: true,
                elapsed_ms: 1,
                depth,
                timed_out: false,
            });
        }
        assert_eq!(trail.top_level_names(), vec!["delegate_body_tracking"]);
        assert_eq!(trail.snapshot().len(), 2);
    }

    #[test]
    fn test_audit_trail_succeeded_since() {
        let trail = AuditTrail::new();
        let record = |name: &str, depth, success| InvocationRecord {
            name: name.to_string(),
            arguments: json!({}),
            success,
            elapsed_ms: 1,
            depth,
            timed_out: false,
        };
        trail.record(record("log_weight", 1, false));
        assert_eq!(trail.succeeded_since(1, 1), None);

        trail.record(record("get_weight_history", 1, true));
        trail.record(record("delegate_body_tracking", 0, true));
        assert_eq!(trail.succeeded_since(1, 1), Some(true));
        assert_eq!(trail.succeeded_since(0, 1), Some(false));
        assert_eq!(trail.succeeded_since(0, 2), None);
        assert_eq!(trail.len(), 3);
    }
}
