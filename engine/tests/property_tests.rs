mod common;

use common::row;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

use mentor_engine::capabilities::body::LogWeight;
use mentor_engine::capabilities::goals::SaveGoal;
use mentor_engine::capabilities::nutrition::NutritionTotals;
use mentor_engine::capabilities::training::{GetCurrentTrainingPlan, SaveTrainingPlan};
use mentor_engine::capabilities::TaskExecutor;
use mentor_engine::config::Config;
use mentor_engine::context::TurnContext;
use mentor_engine::db::{Collection, Database, Filter, FindOptions, RecordStore};
use sdk::types::CapabilityArgs;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn fresh_store() -> (TempDir, Arc<dyn RecordStore>) {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("mentor.db")).await.unwrap();
    (dir, Arc::new(db.store()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    // A weight is stored if and only if it lies within 20..=500 kg
    #[test]
    fn test_weight_stored_iff_in_range(kg in 0.0..800.0f64) {
        let rt = runtime();
        let (stored, success) = rt.block_on(async {
            let (_dir, store) = fresh_store().await;
            let executor = LogWeight::new(Arc::clone(&store));
            let result = executor
                .execute(
                    &TurnContext::empty("u1", "c1", "Coach Majen"),
                    &CapabilityArgs::new().with_param("kg", json!(kg)),
                )
                .await;
            let rows = store
                .find_many(Collection::WeightEntries, &[], FindOptions::new())
                .await
                .unwrap();
            (rows.len(), result.success)
        });

        let in_range = (20.0..=500.0).contains(&kg);
        prop_assert_eq!(success, in_range);
        prop_assert_eq!(stored, usize::from(in_range));
    }

    // N saves for one user produce versions 1..=N with no gaps
    #[test]
    fn test_plan_versions_are_dense(saves in 1usize..8) {
        let rt = runtime();
        let versions = rt.block_on(async {
            let (_dir, store) = fresh_store().await;
            let mut versions = Vec::new();
            for i in 0..saves {
                let v = store
                    .insert_versioned(
                        Collection::TrainingPlanVersions,
                        row(json!({"user_id": "u1", "days": [{"day": "Mandag"}], "reason": format!("endring {}", i)})),
                    )
                    .await
                    .unwrap();
                versions.push(v);
            }
            versions
        });

        let expected: Vec<i64> = (1..=saves as i64).collect();
        prop_assert_eq!(versions, expected);
    }

    // A saved plan reads back structurally unchanged as the current plan
    #[test]
    fn test_plan_round_trip(
        days in prop::collection::vec(
            ("[A-Z][a-z]{3,8}", "[a-z]{3,10}", prop::collection::vec(("[a-z]{3,12}", 1u32..6, 1u32..20), 1..5)),
            1..7,
        ),
        as_text in any::<bool>(),
    ) {
        let days = serde_json::Value::Array(
            days.into_iter()
                .map(|(day, focus, exercises)| json!({
                    "day": day,
                    "focus": focus,
                    "exercises": exercises
                        .into_iter()
                        .map(|(name, sets, reps)| json!({"name": name, "sets": sets, "reps": reps.to_string()}))
                        .collect::<Vec<_>>(),
                }))
                .collect(),
        );
        // The model sometimes sends the list as JSON text
        let arg = if as_text { json!(days.to_string()) } else { days.clone() };

        let rt = runtime();
        let (saved, fetched) = rt.block_on(async {
            let (_dir, store) = fresh_store().await;
            let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
            let saved = SaveTrainingPlan::new(Arc::clone(&store))
                .execute(&ctx, &CapabilityArgs::new().with_param("days", arg))
                .await;
            let fetched = GetCurrentTrainingPlan::new(Arc::clone(&store))
                .execute(&ctx, &CapabilityArgs::new())
                .await;
            (saved, fetched)
        });

        prop_assert!(saved.success);
        prop_assert_eq!(&fetched.data["days"], &days);
        prop_assert_eq!(&fetched.data["version"], &json!(1));
    }

    // Saving goals through the executor leaves exactly one current goal,
    // whether or not strength targets are given
    #[test]
    fn test_single_current_goal(
        targets in prop::collection::vec(prop::option::of("[A-Za-z ]{0,12}"), 1..6)
    ) {
        let replacements = targets.len();
        let rt = runtime();
        let (current, total, all_saved) = rt.block_on(async {
            let (_dir, store) = fresh_store().await;
            let executor = SaveGoal::new(Arc::clone(&store));
            let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
            let mut all_saved = true;
            for (i, strength) in targets.iter().enumerate() {
                let mut args =
                    CapabilityArgs::new().with_param("target_weight_kg", json!(70 + i));
                if let Some(s) = strength {
                    args = args.with_param("strength_targets", json!(s));
                }
                all_saved &= executor.execute(&ctx, &args).await.success;
            }
            let current = store
                .find_many(
                    Collection::Goals,
                    &[Filter::eq("user_id", "u1"), Filter::eq("is_current", true)],
                    FindOptions::new(),
                )
                .await
                .unwrap();
            let total = store
                .find_many(Collection::Goals, &[Filter::eq("user_id", "u1")], FindOptions::new())
                .await
                .unwrap();
            (current, total.len(), all_saved)
        });

        prop_assert!(all_saved);
        prop_assert_eq!(current.len(), 1);
        prop_assert_eq!(total, replacements);
        prop_assert_eq!(
            current[0]["target_weight_kg"].as_f64(),
            Some((70 + replacements - 1) as f64)
        );
    }

    // Totals are the column-wise sum of the logged meals
    #[test]
    fn test_nutrition_totals_are_sums(
        meals in prop::collection::vec((0u32..2000, 0u32..200, 0u32..300, 0u32..150), 0..10)
    ) {
        let rows: Vec<_> = meals
            .iter()
            .map(|(kcal, p, c, f)| row(json!({
                "total_calories": kcal,
                "total_protein_g": p,
                "total_carbs_g": c,
                "total_fat_g": f,
            })))
            .collect();
        let totals = NutritionTotals::sum(&rows);

        let sum = |pick: fn(&(u32, u32, u32, u32)) -> u32| {
            meals.iter().map(pick).map(f64::from).sum::<f64>()
        };
        prop_assert_eq!(totals.calories, sum(|m| m.0));
        prop_assert_eq!(totals.protein, sum(|m| m.1));
        prop_assert_eq!(totals.carbs, sum(|m| m.2));
        prop_assert_eq!(totals.fat, sum(|m| m.3));
    }

    // Configuration survives a TOML round trip
    #[test]
    fn test_config_round_trip(
        log_level in "error|warn|info|debug|trace",
        default_provider in "openai|ollama",
        master_temperature in 0.0..=2.0f32,
        history_window in 1usize..100,
        max_steps in 1usize..20,
        port in 1024u16..65535,
    ) {
        let mut config = Config::default_config();
        config.core.log_level = log_level;
        config.llm.default_provider = default_provider;
        config.llm.master_temperature = master_temperature;
        config.agent.history_window = history_window;
        config.agent.max_steps = max_steps;
        config.server.port = port;

        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        prop_assert_eq!(parsed.core.log_level, config.core.log_level);
        prop_assert_eq!(parsed.llm.default_provider, config.llm.default_provider);
        prop_assert_eq!(parsed.llm.master_temperature, config.llm.master_temperature);
        prop_assert_eq!(parsed.agent.history_window, config.agent.history_window);
        prop_assert_eq!(parsed.agent.max_steps, config.agent.max_steps);
        prop_assert_eq!(parsed.server.port, config.server.port);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_versioned_writers_get_unique_versions() {
    let (_dir, store) = fresh_store().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .insert_versioned(
                    Collection::NutritionPlanVersions,
                    row(json!({"user_id": "u1", "kcal": 2000 + i, "protein_grams": 150, "carbs_grams": 250, "fat_grams": 70, "reason": "parallell"})),
                )
                .await
        }));
    }

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap().unwrap());
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=8).collect::<Vec<i64>>());
}
