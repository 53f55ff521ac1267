//! Goals: exactly one current goal per user, with full version history

use std::sync::Arc;

use async_trait::async_trait;
use sdk::schema::{CapabilitySpec, ParamKind, ParamSpec};
use sdk::types::{CapabilityArgs, ExecutionResult};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{fmt_num, record_change, row, write_failed, TaskExecutor};
use crate::context::TurnContext;
use crate::db::{Collection, RecordStore};

pub struct SaveGoal {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

#[derive(Deserialize)]
struct SaveGoalArgs {
    #[serde(default)]
    target_weight_kg: Option<f64>,
    #[serde(default)]
    strength_targets: Option<String>,
    #[serde(default)]
    horizon_weeks: Option<i64>,
    #[serde(default)]
    plan_text: Option<String>,
}

impl SaveGoal {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "save_goal",
            "Lagre brukerens mål. Erstatter det gjeldende målet; tidligere mål beholdes i historikken.",
        )
        .param(ParamSpec::optional("target_weight_kg", ParamKind::Number, "Målvekt i kg"))
        .param(ParamSpec::optional(
            "strength_targets",
            ParamKind::String,
            "Styrkemål, f.eks. \"Benk 100 kg\"",
        ))
        .param(ParamSpec::optional("horizon_weeks", ParamKind::Integer, "Tidshorisont i uker"))
        .param(ParamSpec::optional(
            "plan_text",
            ParamKind::String,
            "Kort beskrivelse av hvordan målet skal nås",
        ));
        Self { store, spec }
    }
}

#[async_trait]
impl TaskExecutor for SaveGoal {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult {
        let args: SaveGoalArgs = match args.parse(&self.spec.params) {
            Ok(a) => a,
            Err(e) => return ExecutionResult::failure("Ugyldig mål", e.to_string()),
        };
        if let Some(kg) = args.target_weight_kg {
            if !(20.0..=500.0).contains(&kg) {
                return ExecutionResult::failure(
                    "Målvekt må være mellom 20 og 500 kg",
                    format!("target_weight_kg {} out of range", kg),
                );
            }
        }
        if matches!(args.horizon_weeks, Some(w) if w <= 0) {
            return ExecutionResult::failure(
                "Tidshorisonten må være minst én uke",
                "horizon_weeks must be positive",
            );
        }

        let strength = args
            .strength_targets
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let plan = args
            .plan_text
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|text| json!({ "text": text }))
            .unwrap_or(Value::Null);

        let goal = row([
            ("user_id", json!(ctx.user_id)),
            ("target_weight_kg", json!(args.target_weight_kg)),
            ("strength_targets", json!(strength.clone().unwrap_or_default())),
            ("horizon_weeks", json!(args.horizon_weeks)),
            ("plan", plan),
        ]);
        let version = match self.store.replace_current(Collection::Goals, goal).await {
            Ok(v) => v,
            Err(e) => return write_failed("Kunne ikke lagre målet akkurat nå", e),
        };

        let mut parts = Vec::new();
        if let Some(kg) = args.target_weight_kg {
            parts.push(format!("vektmål {} kg", fmt_num(kg)));
        }
        if let Some(s) = &strength {
            parts.push(format!("styrke: {}", s));
        }
        if let Some(w) = args.horizon_weeks {
            parts.push(format!("{} uker", w));
        }
        let summary = if parts.is_empty() {
            "oppdatert".to_string()
        } else {
            parts.join(", ")
        };

        record_change(
            self.store.as_ref(),
            &ctx.user_id,
            "GOAL_SAVED",
            &format!("Mål v{}: {}", version, summary),
            Some(json!({ "version": version })),
        )
        .await;

        info!(user_id = %ctx.user_id, version, "Goal saved");
        ExecutionResult::with_data(
            format!(
                "Mål lagret: {}. Brukeren finner det på Dashboard i Student Senteret.",
                summary
            ),
            json!({ "version": version }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Filter, FindOptions};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_new_goal_replaces_current() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("mentor.db")).await.unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(db.store());
        let save = SaveGoal::new(Arc::clone(&store));
        let ctx = TurnContext::empty("u1", "c1", "Coach Majen");

        let first = save
            .execute(
                &ctx,
                &CapabilityArgs::new()
                    .with_param("target_weight_kg", json!(80))
                    .with_param("horizon_weeks", json!(12)),
            )
            .await;
        assert!(first.success, "{:?}", first.error);
        assert_eq!(
            first.message,
            "Mål lagret: vektmål 80 kg, 12 uker. Brukeren finner det på Dashboard i Student Senteret."
        );

        let second = save
            .execute(
                &ctx,
                &CapabilityArgs::new().with_param("strength_targets", json!("Benk 100 kg")),
            )
            .await;
        assert!(second.success);

        let current = store
            .find_many(
                Collection::Goals,
                &[Filter::eq("user_id", "u1"), Filter::eq("is_current", true)],
                FindOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0]["version"], json!(2));
        assert_eq!(current[0]["strength_targets"], json!("Benk 100 kg"));

        let first_row = store
            .find_one(
                Collection::Goals,
                &[Filter::eq("user_id", "u1"), Filter::eq("version", 1)],
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_row["strength_targets"], json!(""));
        assert_eq!(first_row["is_current"], json!(false));
    }

    #[tokio::test]
    async fn test_empty_goal_reads_oppdatert() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("mentor.db")).await.unwrap();
        let save = SaveGoal::new(Arc::new(db.store()));
        let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
        let result = save.execute(&ctx, &CapabilityArgs::new()).await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.message.starts_with("Mål lagret: oppdatert."));
    }
}
