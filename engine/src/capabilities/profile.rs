//! Profile: remembered facts and onboarding profile updates

use std::sync::Arc;

use async_trait::async_trait;
use sdk::schema::{CapabilitySpec, ParamKind, ParamSpec};
use sdk::types::{CapabilityArgs, ExecutionResult};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::{record_change, row, write_failed, TaskExecutor};
use crate::context::assembler::PROFILE_LABELS;
use crate::context::TurnContext;
use crate::db::{Collection, RecordStore, Row};

const MAX_FACT_KEY_CHARS: usize = 64;

pub struct RememberFact {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

#[derive(Deserialize)]
struct RememberArgs {
    key: String,
    value: String,
}

impl RememberFact {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "remember_fact",
            "Husk et fakta om brukeren (navn, skade, preferanse, livssituasjon). \
             Samme nøkkel overskriver tidligere verdi.",
        )
        .param(ParamSpec::required(
            "key",
            ParamKind::String,
            "Kort nøkkel, f.eks. \"skade\" eller \"navn\"",
        ))
        .param(ParamSpec::required("value", ParamKind::String, "Verdien som skal huskes"));
        Self { store, spec }
    }
}

#[async_trait]
impl TaskExecutor for RememberFact {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult {
        let args: RememberArgs = match args.parse(&self.spec.params) {
            Ok(a) => a,
            Err(e) => return ExecutionResult::failure("Ugyldig fakta", e.to_string()),
        };
        let key = args.key.trim().to_lowercase();
        let value = args.value.trim();
        if key.is_empty() || value.is_empty() {
            return ExecutionResult::failure(
                "Både nøkkel og verdi må fylles ut",
                "key and value must be non-empty",
            );
        }
        if key.chars().count() > MAX_FACT_KEY_CHARS {
            return ExecutionResult::failure("Nøkkelen er for lang", "key exceeds 64 characters");
        }

        let fact = row([
            ("user_id", json!(ctx.user_id)),
            ("key", json!(key)),
            ("value", json!(value)),
            ("source", json!("agent")),
        ]);
        if let Err(e) = self
            .store
            .upsert(Collection::UserContext, fact, &["user_id", "key"])
            .await
        {
            return write_failed("Kunne ikke lagre dette akkurat nå", e);
        }

        let message = format!("Lagret: {} = {}", key, value);
        record_change(
            self.store.as_ref(),
            &ctx.user_id,
            "FACT_REMEMBERED",
            &message,
            Some(json!({ "key": key })),
        )
        .await;

        info!(user_id = %ctx.user_id, %key, "Fact remembered");
        ExecutionResult::ok(message)
    }
}

/// Profile columns the agent may set or clear
const EDITABLE_FIELDS: [(&str, ParamKind, &str); 8] = [
    ("current_weight_kg", ParamKind::Number, "Nåværende vekt i kg"),
    ("training_days_per_week", ParamKind::Integer, "Treningsdager per uke (0-7)"),
    ("goals", ParamKind::String, "Brukerens mål med treningen"),
    ("fitness_level", ParamKind::String, "Treningsnivå"),
    ("training_location", ParamKind::String, "Hvor brukeren trener"),
    ("available_equipment", ParamKind::String, "Tilgjengelig utstyr"),
    ("injury_history", ParamKind::String, "Skader og plager"),
    ("nutrition_preferences", ParamKind::String, "Matpreferanser og allergier"),
];

fn label_for(column: &'static str) -> &'static str {
    PROFILE_LABELS
        .iter()
        .find(|(c, _)| *c == column)
        .map(|(_, label)| *label)
        .unwrap_or(column)
}

pub struct UpdateProfile {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

impl UpdateProfile {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = EDITABLE_FIELDS.iter().fold(
            CapabilitySpec::new(
                "update_profile",
                "Oppdater feltene i brukerens profil. Oppgi bare feltene som endres; \
                 feltnavn i `clear` tømmes.",
            ),
            |spec, (name, kind, description)| {
                spec.param(ParamSpec::optional(*name, *kind, *description))
            },
        );
        let spec = spec.param(ParamSpec::optional(
            "clear",
            ParamKind::Array,
            "Liste med feltnavn som skal tømmes",
        ));
        Self { store, spec }
    }

    fn validate(fields: &Map<String, Value>) -> Result<(), (String, String)> {
        if let Some(kg) = fields.get("current_weight_kg").and_then(Value::as_f64) {
            if !(20.0..=500.0).contains(&kg) {
                return Err((
                    "Vekt må være mellom 20 og 500 kg".to_string(),
                    format!("current_weight_kg {} out of range", kg),
                ));
            }
        }
        if let Some(days) = fields.get("training_days_per_week").and_then(Value::as_i64) {
            if !(0..=7).contains(&days) {
                return Err((
                    "Treningsdager per uke må være mellom 0 og 7".to_string(),
                    format!("training_days_per_week {} out of range", days),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for UpdateProfile {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult {
        let mut fields = match args.normalize(&self.spec.params) {
            Ok(f) => f,
            Err(e) => return ExecutionResult::failure("Ugyldige profilfelter", e.to_string()),
        };
        let clear: Vec<String> = match fields.remove("clear") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .collect(),
            _ => Vec::new(),
        };

        if let Some(unknown) = clear
            .iter()
            .find(|c| !EDITABLE_FIELDS.iter().any(|(name, _, _)| name == c))
        {
            return ExecutionResult::failure(
                format!("Feltet '{}' finnes ikke i profilen", unknown),
                format!("cannot clear unknown field '{}'", unknown),
            );
        }
        if let Some(both) = clear.iter().find(|c| fields.contains_key(c.as_str())) {
            return ExecutionResult::failure(
                format!("Feltet '{}' kan ikke både settes og tømmes", both),
                format!("field '{}' both set and cleared", both),
            );
        }
        // Blank strings carry no information; ignore them instead of wiping the field
        fields.retain(|_, v| !matches!(v, Value::String(s) if s.trim().is_empty()));
        if fields.is_empty() && clear.is_empty() {
            return ExecutionResult::failure("Ingen profilfelter å oppdatere", "no fields given");
        }
        if let Err((message, error)) = Self::validate(&fields) {
            return ExecutionResult::failure(message, error);
        }

        let mut changed: Vec<&str> = Vec::new();
        let mut update = Row::new();
        update.insert("user_id".to_string(), json!(ctx.user_id));
        for (name, _, _) in EDITABLE_FIELDS.iter() {
            if let Some(value) = fields.get(*name) {
                update.insert(name.to_string(), value.clone());
                changed.push(label_for(*name));
            } else if clear.iter().any(|c| c == name) {
                update.insert(name.to_string(), Value::Null);
                changed.push(label_for(*name));
            }
        }

        if let Err(e) = self
            .store
            .upsert(Collection::UserProfiles, update, &["user_id"])
            .await
        {
            return write_failed("Kunne ikke oppdatere profilen akkurat nå", e);
        }

        let message = format!("Profil oppdatert: {}", changed.join(", "));
        record_change(
            self.store.as_ref(),
            &ctx.user_id,
            "PROFILE_UPDATED",
            &message,
            Some(json!({ "fields": fields, "cleared": clear })),
        )
        .await;

        info!(user_id = %ctx.user_id, fields = changed.len(), "Profile updated");
        ExecutionResult::ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Filter};
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
    async fn test_remember_fact_overwrites_key() {
        let (_dir, store) = setup().await;
        let remember = RememberFact::new(Arc::clone(&store));

        for value in ["vondt kne", "kneet er bra igjen"] {
            let result = remember
                .execute(
                    &ctx(),
                    &CapabilityArgs::new()
                        .with_param("key", json!("Skade"))
                        .with_param("value", json!(value)),
                )
                .await;
            assert!(result.success);
        }

        let fact = store
            .find_one(
                Collection::UserContext,
                &[Filter::eq("user_id", "u1"), Filter::eq("key", "skade")],
                None,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fact["value"], json!("kneet er bra igjen"));
        assert_eq!(fact["source"], json!("agent"));
    }

    #[tokio::test]
    async fn test_remember_fact_rejects_blank_value() {
        let (_dir, store) = setup().await;
        let remember = RememberFact::new(store);
        let result = remember
            .execute(
                &ctx(),
                &CapabilityArgs::new()
                    .with_param("key", json!("navn"))
                    .with_param("value", json!("  ")),
            )
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_update_profile_sets_and_clears() {
        let (_dir, store) = setup().await;
        let update = UpdateProfile::new(Arc::clone(&store));

        let result = update
            .execute(
                &ctx(),
                &CapabilityArgs::new()
                    .with_param("training_days_per_week", json!("4"))
                    .with_param("injury_history", json!("Vondt kne")),
            )
            .await;
        assert_eq!(result.message, "Profil oppdatert: Treningsdager/uke, Skader");

        let result = update
            .execute(
                &ctx(),
                &CapabilityArgs::new().with_param("clear", json!(["injury_history"])),
            )
            .await;
        assert!(result.success);

        let profile = store
            .find_one(Collection::UserProfiles, &[Filter::eq("user_id", "u1")], None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile["training_days_per_week"], json!(4));
        assert_eq!(profile["injury_history"], Value::Null);
    }

    #[tokio::test]
    async fn test_update_profile_validation() {
        let (_dir, store) = setup().await;
        let update = UpdateProfile::new(store);

        let nothing = update.execute(&ctx(), &CapabilityArgs::new()).await;
        assert_eq!(nothing.message, "Ingen profilfelter å oppdatere");

        let too_many = update
            .execute(
                &ctx(),
                &CapabilityArgs::new().with_param("training_days_per_week", json!(9)),
            )
            .await;
        assert!(!too_many.success);

        let unknown = update
            .execute(&ctx(), &CapabilityArgs::new().with_param("clear", json!(["age"])))
            .await;
        assert!(!unknown.success);
    }
}
