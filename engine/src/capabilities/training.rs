//! Training: workout log and the versioned training plan

use std::sync::Arc;

use async_trait::async_trait;
use sdk::schema::{CapabilityCost, CapabilitySpec, ParamKind, ParamSpec};
use sdk::types::{CapabilityArgs, ExecutionResult};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{
    or_empty, parse_json_list, record_change, resolve_date, row, write_failed, TaskExecutor,
};
use crate::context::TurnContext;
use crate::db::{Collection, Filter, FindOptions, RecordStore};

pub struct LogWorkout {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

#[derive(Deserialize)]
struct LogWorkoutArgs {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    entries: Value,
    #[serde(default)]
    date: Option<String>,
}

impl LogWorkout {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "log_workout",
            "Logg en gjennomført treningsøkt. Én logg per dag; samme dato overskrives.",
        )
        .param(ParamSpec::optional("description", ParamKind::String, "Kort beskrivelse av økten"))
        .param(ParamSpec::optional(
            "entries",
            ParamKind::Any,
            "Liste med øvelser, f.eks. [{\"exercise\":\"Knebøy\",\"sets\":3,\"reps\":8,\"weight_kg\":80}]",
        ))
        .param(ParamSpec::optional(
            "date",
            ParamKind::String,
            "Dato (YYYY-MM-DD), standard i dag",
        ));
        Self { store, spec }
    }
}

#[async_trait]
impl TaskExecutor for LogWorkout {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult {
        let args: LogWorkoutArgs = match args.parse(&self.spec.params) {
            Ok(a) => a,
            Err(e) => return ExecutionResult::failure("Ugyldig treningslogg", e.to_string()),
        };
        let date = match resolve_date(args.date.as_deref()) {
            Ok(d) => d,
            Err(e) => {
                return ExecutionResult::failure("Ugyldig dato, bruk formatet ÅÅÅÅ-MM-DD", e)
            }
        };
        let entries = parse_json_list(&args.entries).unwrap_or_else(|e| {
            warn!("Ignoring malformed workout entries: {}", e);
            Vec::new()
        });
        let description = args.description.unwrap_or_default();
        if description.trim().is_empty() && entries.is_empty() {
            return ExecutionResult::failure(
                "Beskriv økten eller list opp øvelsene",
                "workout has neither description nor entries",
            );
        }

        let entry_count = entries.len();
        let workout = row([
            ("user_id", json!(ctx.user_id)),
            ("date", json!(date)),
            ("description", json!(description.trim())),
            ("entries", Value::Array(entries)),
        ]);
        if let Err(e) = self
            .store
            .upsert(Collection::WorkoutLogs, workout, &["user_id", "date"])
            .await
        {
            return write_failed("Kunne ikke logge treningen akkurat nå", e);
        }

        let message = format!("Trening logget for {}", date);
        record_change(
            self.store.as_ref(),
            &ctx.user_id,
            "WORKOUT_LOG",
            &message,
            Some(json!({ "date": date, "entries": entry_count })),
        )
        .await;

        info!(user_id = %ctx.user_id, %date, "Workout logged");
        ExecutionResult::ok(message)
    }
}

pub struct SaveTrainingPlan {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

#[derive(Deserialize)]
struct SavePlanArgs {
    days: Value,
    #[serde(default)]
    reason: Option<String>,
}

impl SaveTrainingPlan {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "save_training_plan",
            "Lagre en ny versjon av brukerens treningsplan. `days` er en liste der hver dag \
             har dag, fokus og øvelser med sett, reps og hvile.",
        )
        .param(ParamSpec::required(
            "days",
            ParamKind::Any,
            "Liste med treningsdager (JSON)",
        ))
        .param(ParamSpec::optional("reason", ParamKind::String, "Hvorfor planen endres"))
        .cost(CapabilityCost::Extended);
        Self { store, spec }
    }
}

#[async_trait]
impl TaskExecutor for SaveTrainingPlan {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult {
        let args: SavePlanArgs = match args.parse(&self.spec.params) {
            Ok(a) => a,
            Err(e) => return ExecutionResult::failure("Ugyldig treningsplan", e.to_string()),
        };
        let days = match &args.days {
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return ExecutionResult::failure(
                        format!("Ugyldig JSON for days: {}", e),
                        e.to_string(),
                    )
                }
            },
            other => other.clone(),
        };
        let days = match days {
            Value::Array(items) if !items.is_empty() => items,
            _ => {
                return ExecutionResult::failure(
                    "days må være en liste med minst 1 dag",
                    "days must be a non-empty list",
                )
            }
        };

        let day_count = days.len();
        let reason = args.reason.unwrap_or_default();
        let plan = row([
            ("user_id", json!(ctx.user_id)),
            ("days", Value::Array(days)),
            ("reason", json!(reason)),
        ]);
        let version = match self
            .store
            .insert_versioned(Collection::TrainingPlanVersions, plan)
            .await
        {
            Ok(v) => v,
            Err(e) => return write_failed("Kunne ikke lagre treningsplanen akkurat nå", e),
        };

        record_change(
            self.store.as_ref(),
            &ctx.user_id,
            "TRAINING_PLAN_SAVED",
            &format!("Treningsplan v{}: {} dager", version, day_count),
            Some(json!({ "version": version, "reason": reason })),
        )
        .await;

        info!(user_id = %ctx.user_id, version, days = day_count, "Training plan saved");
        ExecutionResult::with_data(
            format!(
                "Treningsplan lagret (v{}) med {} treningsdager. Brukeren finner den i \
                 Aktivitet-fanen i Student Senteret.",
                version, day_count
            ),
            json!({ "version": version }),
        )
    }
}

pub struct GetCurrentTrainingPlan {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

impl GetCurrentTrainingPlan {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "get_current_training_plan",
            "Hent brukerens nyeste treningsplan.",
        )
        .read_only();
        Self { store, spec }
    }
}

#[async_trait]
impl TaskExecutor for GetCurrentTrainingPlan {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, _args: &CapabilityArgs) -> ExecutionResult {
        let latest = or_empty(
            self.store
                .find_many(
                    Collection::TrainingPlanVersions,
                    &[Filter::eq("user_id", ctx.user_id.as_str())],
                    FindOptions::new()
                        .select(&["version", "days", "reason", "created_at"])
                        .order_by("version", false)
                        .limit(1),
                )
                .await,
            "training plan",
        );
        match latest.into_iter().next() {
            Some(plan) => {
                let version = plan.get("version").cloned().unwrap_or(Value::Null);
                ExecutionResult::with_data(
                    format!("Treningsplan v{} hentet", version),
                    Value::Object(plan),
                )
            }
            None => ExecutionResult::ok("Ingen treningsplan lagret ennå"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<dyn RecordStore>) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("mentor.db")).await.unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(db.store());
        (dir, store)
    }

    fn ctx() -> TurnContext {
        TurnContext::empty("u1", "c1", "Coach Majen")
    }

    #[tokio::test]
    async fn test_malformed_days_json() {
        let (_dir, store) = setup().await;
        let save = SaveTrainingPlan::new(store);
        let result = save
            .execute(&ctx(), &CapabilityArgs::new().with_param("days", json!("[{oops")))
            .await;
        assert!(!result.success);
        assert!(result.message.starts_with("Ugyldig JSON for days:"));
    }

    #[tokio::test]
    async fn test_empty_days_rejected() {
        let (_dir, store) = setup().await;
        let save = SaveTrainingPlan::new(store);
        let result = save
            .execute(&ctx(), &CapabilityArgs::new().with_param("days", json!([])))
            .await;
        assert_eq!(result.message, "days må være en liste med minst 1 dag");
    }

    #[tokio::test]
    async fn test_save_then_fetch_latest() {
        let (_dir, store) = setup().await;
        let save = SaveTrainingPlan::new(Arc::clone(&store));
        let fetch = GetCurrentTrainingPlan::new(store);

        let days = json!([
            {"day": "Mandag", "focus": "Ben", "exercises": [{"name": "Knebøy", "sets": 4, "reps": "6-8"}]},
            {"day": "Torsdag", "focus": "Overkropp", "exercises": []}
        ]);
        let first = save
            .execute(&ctx(), &CapabilityArgs::new().with_param("days", days.clone()))
            .await;
        assert!(first.message.starts_with("Treningsplan lagret (v1) med 2 treningsdager."));
        let second = save
            .execute(
                &ctx(),
                &CapabilityArgs::new().with_param("days", json!(days.to_string())),
            )
            .await;
        assert_eq!(second.data["version"], json!(2));

        let current = fetch.execute(&ctx(), &CapabilityArgs::new()).await;
        assert_eq!(current.data["version"], json!(2));
        assert_eq!(current.data["days"], days);
    }

    #[tokio::test]
    async fn test_no_plan_yet() {
        let (_dir, store) = setup().await;
        let fetch = GetCurrentTrainingPlan::new(store);
        let result = fetch.execute(&ctx(), &CapabilityArgs::new()).await;
        assert!(result.success);
        assert!(result.data.is_null());
    }
}
