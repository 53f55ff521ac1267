//! Nutrition: meal log, daily totals and the versioned nutrition plan

use std::sync::Arc;

use async_trait::async_trait;
use sdk::schema::{CapabilitySpec, ParamKind, ParamSpec};
use sdk::types::{CapabilityArgs, ExecutionResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{
    fmt_num, or_empty, parse_json_list, record_change, resolve_date, row, today, write_failed,
    TaskExecutor,
};
use crate::context::TurnContext;
use crate::db::{Collection, Filter, FindOptions, RecordStore, Row};

/// Macro totals over a set of meal rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NutritionTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl NutritionTotals {
    /// Sum the macro columns of `meals`; missing values count as zero
    pub fn sum(meals: &[Row]) -> Self {
        let field = |meal: &Row, column: &str| {
            meal.get(column).and_then(Value::as_f64).unwrap_or(0.0)
        };
        meals.iter().fold(Self::default(), |acc, meal| Self {
            calories: acc.calories + field(meal, "total_calories"),
            protein: acc.protein + field(meal, "total_protein_g"),
            carbs: acc.carbs + field(meal, "total_carbs_g"),
            fat: acc.fat + field(meal, "total_fat_g"),
        })
    }
}

pub struct LogMeal {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

#[derive(Deserialize)]
struct LogMealArgs {
    description: String,
    meal_type: String,
    calories: f64,
    protein_g: f64,
    carbs_g: f64,
    fat_g: f64,
    #[serde(default)]
    items: Value,
    #[serde(default)]
    date: Option<String>,
}

impl LogMeal {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "log_meal",
            "Logg et måltid brukeren har spist, med estimerte makroer.",
        )
        .param(ParamSpec::required("description", ParamKind::String, "Hva som ble spist"))
        .param(
            ParamSpec::optional(
                "meal_type",
                ParamKind::String,
                "breakfast, lunch, dinner, snack eller other",
            )
            .with_default(json!("other")),
        )
        .param(
            ParamSpec::optional("calories", ParamKind::Number, "Kalorier").with_default(json!(0)),
        )
        .param(
            ParamSpec::optional("protein_g", ParamKind::Number, "Protein i gram")
                .with_default(json!(0)),
        )
        .param(
            ParamSpec::optional("carbs_g", ParamKind::Number, "Karbohydrater i gram")
                .with_default(json!(0)),
        )
        .param(
            ParamSpec::optional("fat_g", ParamKind::Number, "Fett i gram").with_default(json!(0)),
        )
        .param(ParamSpec::optional(
            "items",
            ParamKind::Any,
            "Liste med enkeltmatvarer (valgfri)",
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
impl TaskExecutor for LogMeal {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult {
        let args: LogMealArgs = match args.parse(&self.spec.params) {
            Ok(a) => a,
            Err(e) => return ExecutionResult::failure("Ugyldig måltid", e.to_string()),
        };
        let description = args.description.trim();
        if description.is_empty() {
            return ExecutionResult::failure("Beskriv hva som ble spist", "description is empty");
        }
        let date = match resolve_date(args.date.as_deref()) {
            Ok(d) => d,
            Err(e) => {
                return ExecutionResult::failure("Ugyldig dato, bruk formatet ÅÅÅÅ-MM-DD", e)
            }
        };
        let items = parse_json_list(&args.items).unwrap_or_else(|e| {
            warn!("Ignoring malformed meal items: {}", e);
            Vec::new()
        });

        let meal = row([
            ("user_id", json!(ctx.user_id)),
            ("date", json!(date)),
            ("meal_type", json!(args.meal_type)),
            ("description", json!(description)),
            ("total_calories", json!(args.calories)),
            ("total_protein_g", json!(args.protein_g)),
            ("total_carbs_g", json!(args.carbs_g)),
            ("total_fat_g", json!(args.fat_g)),
            ("items", Value::Array(items)),
        ]);
        if let Err(e) = self.store.insert(Collection::MealLogs, meal).await {
            return write_failed("Kunne ikke logge måltidet akkurat nå", e);
        }

        info!(user_id = %ctx.user_id, calories = args.calories, "Meal logged");
        ExecutionResult::ok(format!(
            "Måltid logget: {} ({} kcal, {}g P, {}g K, {}g F)",
            description,
            fmt_num(args.calories),
            fmt_num(args.protein_g),
            fmt_num(args.carbs_g),
            fmt_num(args.fat_g)
        ))
    }
}

pub struct GetTodayNutrition {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

impl GetTodayNutrition {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "get_today_nutrition",
            "Hent dagens loggede måltider og summen av kalorier og makroer.",
        )
        .read_only();
        Self { store, spec }
    }
}

#[async_trait]
impl TaskExecutor for GetTodayNutrition {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, _args: &CapabilityArgs) -> ExecutionResult {
        let meals = or_empty(
            self.store
                .find_many(
                    Collection::MealLogs,
                    &[
                        Filter::eq("user_id", ctx.user_id.as_str()),
                        Filter::eq("date", today()),
                    ],
                    FindOptions::new()
                        .select(&[
                            "meal_type",
                            "description",
                            "total_calories",
                            "total_protein_g",
                            "total_carbs_g",
                            "total_fat_g",
                            "created_at",
                        ])
                        .order_by("created_at", true),
                )
                .await,
            "today's meals",
        );
        let totals = NutritionTotals::sum(&meals);
        let count = meals.len();
        ExecutionResult::with_data(
            format!("{} måltider logget i dag, {} kcal totalt", count, fmt_num(totals.calories)),
            json!({ "meals": meals, "totals": totals, "count": count }),
        )
    }
}

pub struct SaveNutritionPlan {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

#[derive(Deserialize)]
struct PlanArgs {
    kcal: i64,
    protein_grams: i64,
    carbs_grams: i64,
    fat_grams: i64,
    #[serde(default)]
    meals: Value,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl SaveNutritionPlan {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "save_nutrition_plan",
            "Lagre en ny versjon av brukerens kostholdsplan. Kall denne med de \
             fullstendige tallene fra planen brukeren har godkjent.",
        )
        .param(ParamSpec::required("kcal", ParamKind::Integer, "Daglig kaloriinntak"))
        .param(ParamSpec::required("protein_grams", ParamKind::Integer, "Protein per dag i gram"))
        .param(ParamSpec::required(
            "carbs_grams",
            ParamKind::Integer,
            "Karbohydrater per dag i gram",
        ))
        .param(ParamSpec::required("fat_grams", ParamKind::Integer, "Fett per dag i gram"))
        .param(ParamSpec::optional(
            "meals",
            ParamKind::Any,
            "Liste med måltider i planen (JSON)",
        ))
        .param(ParamSpec::optional("notes", ParamKind::String, "Notater til planen"))
        .param(ParamSpec::optional("reason", ParamKind::String, "Hvorfor planen endres"));
        Self { store, spec }
    }
}

#[async_trait]
impl TaskExecutor for SaveNutritionPlan {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult {
        let args: PlanArgs = match args.parse(&self.spec.params) {
            Ok(a) => a,
            Err(e) => return ExecutionResult::failure("Ugyldig kostholdsplan", e.to_string()),
        };
        if [args.kcal, args.protein_grams, args.carbs_grams, args.fat_grams]
            .iter()
            .any(|n| *n < 0)
        {
            return ExecutionResult::failure(
                "Kalorier og makroer kan ikke være negative",
                "negative plan value",
            );
        }
        let meals = parse_json_list(&args.meals).unwrap_or_else(|e| {
            warn!("Ignoring malformed plan meals: {}", e);
            Vec::new()
        });
        let reason = args.reason.unwrap_or_default();

        let plan = row([
            ("user_id", json!(ctx.user_id)),
            ("kcal", json!(args.kcal)),
            ("protein_grams", json!(args.protein_grams)),
            ("carbs_grams", json!(args.carbs_grams)),
            ("fat_grams", json!(args.fat_grams)),
            ("meals", Value::Array(meals)),
            ("notes", json!(args.notes.unwrap_or_default())),
            ("reason", json!(reason)),
        ]);
        let version = match self
            .store
            .insert_versioned(Collection::NutritionPlanVersions, plan)
            .await
        {
            Ok(v) => v,
            Err(e) => return write_failed("Kunne ikke lagre kostholdsplanen akkurat nå", e),
        };

        record_change(
            self.store.as_ref(),
            &ctx.user_id,
            "NUTRITION_PLAN_SAVED",
            &format!(
                "Kostholdsplan v{}: {} kcal, {}g P",
                version, args.kcal, args.protein_grams
            ),
            Some(json!({ "version": version, "reason": reason })),
        )
        .await;

        info!(user_id = %ctx.user_id, version, "Nutrition plan saved");
        ExecutionResult::with_data(
            format!(
                "Kostholdsplan lagret (v{}): {} kcal, {}g protein, {}g karbs, {}g fett. \
                 Brukeren finner den i Ernæring-fanen.",
                version, args.kcal, args.protein_grams, args.carbs_grams, args.fat_grams
            ),
            json!({ "version": version }),
        )
    }
}
