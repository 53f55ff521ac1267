//! Aggregate snapshot of everything stored for a user

use std::sync::Arc;

use async_trait::async_trait;
use sdk::schema::CapabilitySpec;
use sdk::types::{CapabilityArgs, ExecutionResult};
use serde_json::{json, Map, Value};

use super::nutrition::NutritionTotals;
use super::{or_empty, today, TaskExecutor};
use crate::context::TurnContext;
use crate::db::{Collection, Filter, FindOptions, RecordStore, Row, StoreError};

const RECENT_WEIGHTS: u32 = 5;

pub struct GetUserStats {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

impl GetUserStats {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "get_user_stats",
            "Hent en oversikt over brukerens data: vekt, mål, dagens måltider, \
             gjeldende planer, huskede fakta og profil.",
        )
        .read_only();
        Self { store, spec }
    }

    async fn latest(
        &self,
        collection: Collection,
        user_id: &str,
        columns: &[&str],
    ) -> Result<Option<Row>, StoreError> {
        Ok(self
            .store
            .find_many(
                collection,
                &[Filter::eq("user_id", user_id)],
                FindOptions::new()
                    .select(columns)
                    .order_by("version", false)
                    .limit(1),
            )
            .await?
            .into_iter()
            .next())
    }

    /// Build the stats object; sub-resources that are missing or fail to
    /// load are left out. The reads are independent and run concurrently.
    pub async fn collect(&self, user_id: &str) -> Value {
        let store = self.store.as_ref();
        let today = today();
        let by_user = [Filter::eq("user_id", user_id)];
        let current_goal = [Filter::eq("user_id", user_id), Filter::eq("is_current", true)];
        let todays_meals = [Filter::eq("user_id", user_id), Filter::eq("date", today.as_str())];

        let (weights, goal, meals, training, nutrition, facts, profile) = futures::join!(
            store.find_many(
                Collection::WeightEntries,
                &by_user,
                FindOptions::new()
                    .select(&["date", "kg"])
                    .order_by("date", false)
                    .limit(RECENT_WEIGHTS),
            ),
            store.find_one(
                Collection::Goals,
                &current_goal,
                Some(&["target_weight_kg", "strength_targets", "horizon_weeks"][..]),
            ),
            store.find_many(
                Collection::MealLogs,
                &todays_meals,
                FindOptions::new().select(&[
                    "total_calories",
                    "total_protein_g",
                    "total_carbs_g",
                    "total_fat_g",
                ]),
            ),
            self.latest(Collection::TrainingPlanVersions, user_id, &["version", "days"]),
            self.latest(
                Collection::NutritionPlanVersions,
                user_id,
                &["version", "kcal", "protein_grams", "carbs_grams", "fat_grams"],
            ),
            store.find_many(
                Collection::UserContext,
                &by_user,
                FindOptions::new().select(&["key", "value"]).order_by("key", true),
            ),
            store.find_one(Collection::UserProfiles, &by_user, None),
        );

        let mut stats = Map::new();

        let weights = or_empty(weights, "recent weights");
        if let Some(latest) = weights.first() {
            stats.insert("latest_weight".into(), Value::Object(latest.clone()));
            stats.insert(
                "recent_weights".into(),
                Value::Array(weights.into_iter().map(Value::Object).collect()),
            );
        }

        if let Some(goal) = or_empty(goal, "current goal") {
            stats.insert("current_goal".into(), Value::Object(goal));
        }

        let meals = or_empty(meals, "today's meals");
        if !meals.is_empty() {
            stats.insert(
                "today_meals".into(),
                json!({ "count": meals.len(), "totals": NutritionTotals::sum(&meals) }),
            );
        }

        if let Some(plan) = or_empty(training, "training plan") {
            let days_count = plan.get("days").and_then(Value::as_array).map_or(0, Vec::len);
            stats.insert(
                "training_plan".into(),
                json!({ "version": plan.get("version"), "days_count": days_count }),
            );
        }

        if let Some(plan) = or_empty(nutrition, "nutrition plan") {
            stats.insert("nutrition_plan".into(), Value::Object(plan));
        }

        let facts = or_empty(facts, "remembered facts");
        if !facts.is_empty() {
            let context: Map<String, Value> = facts
                .into_iter()
                .filter_map(|f| {
                    let key = f.get("key")?.as_str()?.to_string();
                    Some((key, f.get("value")?.clone()))
                })
                .collect();
            stats.insert("user_context".into(), Value::Object(context));
        }

        if let Some(mut profile) = or_empty(profile, "profile") {
            for hidden in ["user_id", "created_at", "updated_at"] {
                profile.remove(hidden);
            }
            profile.retain(|_, v| !v.is_null());
            if !profile.is_empty() {
                stats.insert("profile".into(), Value::Object(profile));
            }
        }

        Value::Object(stats)
    }
}

#[async_trait]
impl TaskExecutor for GetUserStats {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, _args: &CapabilityArgs) -> ExecutionResult {
        let stats = self.collect(&ctx.user_id).await;
        ExecutionResult::with_data("Brukerstatistikk hentet", stats)
    }
}
