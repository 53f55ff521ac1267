//! Context assembler
//!
//! Builds the [`TurnContext`] for one turn from the user row, the profile,
//! the remembered facts and the coach persona. Missing rows are normal and
//! simply leave the matching fields empty. A store failure is not: it is
//! propagated so the turn never reasons over a half-loaded context.

use std::sync::Arc;

use sdk::errors::EngineError;
use serde_json::Value;
use tracing::info;

use super::{PersonaCache, ProfileItem, TurnContext};
use crate::db::{Collection, Filter, FindOptions, RecordStore, Row};

/// Profile columns rendered into the onboarding summary, with their labels
pub const PROFILE_LABELS: [(&str, &str); 11] = [
    ("gender", "Kjønn"),
    ("age", "Alder"),
    ("height_cm", "Høyde"),
    ("current_weight_kg", "Vekt"),
    ("training_days_per_week", "Treningsdager/uke"),
    ("goals", "Mål"),
    ("fitness_level", "Treningsnivå"),
    ("training_location", "Treningssted"),
    ("available_equipment", "Utstyr"),
    ("injury_history", "Skader"),
    ("nutrition_preferences", "Matpreferanser"),
];

/// Profile columns where a stored zero is an answer, not a blank
const ZERO_IS_KNOWN: [&str; 1] = ["training_days_per_week"];

/// Fact keys that may carry the user's name
const NAME_FACT_KEYS: [&str; 2] = ["name", "navn"];

/// Render a stored value for display; absent, blank, zero and false render as `None`
pub fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some("ja".to_string()),
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => {
            let f = n.as_f64()?;
            if f == 0.0 {
                None
            } else if f.fract() == 0.0 && f.abs() < 1e15 {
                Some(format!("{}", f as i64))
            } else {
                Some(format!("{}", f))
            }
        }
        Value::Array(items) if items.is_empty() => None,
        other => Some(other.to_string()),
    }
}

fn profile_value(column: &str, value: &Value) -> Option<String> {
    match value.as_f64() {
        Some(n) if n == 0.0 && ZERO_IS_KNOWN.contains(&column) => Some("0".to_string()),
        _ => display_value(value),
    }
}

fn first_name(row: &Row) -> Option<String> {
    ["first_name", "username"]
        .iter()
        .filter_map(|col| row.get(*col).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

pub struct ContextAssembler {
    store: Arc<dyn RecordStore>,
    personas: Arc<PersonaCache>,
    fallback_coach_name: String,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        personas: Arc<PersonaCache>,
        fallback_coach_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            personas,
            fallback_coach_name: fallback_coach_name.into(),
        }
    }

    /// Load everything the turn needs about `user_id` and `coach_id`
    ///
    /// # Errors
    /// `EngineError::StoreUnavailable` when the record store cannot be reached.
    pub async fn assemble(
        &self,
        user_id: &str,
        coach_id: &str,
    ) -> Result<TurnContext, EngineError> {
        let store = self.store.as_ref();

        let user = store
            .find_one(Collection::Users, &[Filter::eq("id", user_id)], None)
            .await?;

        let profile_row = store
            .find_one(
                Collection::UserProfiles,
                &[Filter::eq("user_id", user_id)],
                None,
            )
            .await?;
        let profile: Vec<ProfileItem> = profile_row
            .as_ref()
            .map(|row| {
                PROFILE_LABELS
                    .iter()
                    .filter_map(|(column, label)| {
                        let value = profile_value(column, row.get(*column)?)?;
                        Some(ProfileItem {
                            label: *label,
                            value,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let fact_rows = store
            .find_many(
                Collection::UserContext,
                &[Filter::eq("user_id", user_id)],
                FindOptions::new().select(&["key", "value"]).order_by("key", true),
            )
            .await?;
        let facts: Vec<(String, String)> = fact_rows
            .iter()
            .filter_map(|row| {
                Some((
                    row.get("key")?.as_str()?.to_string(),
                    row.get("value")?.as_str()?.to_string(),
                ))
            })
            .collect();

        let user_name = user
            .as_ref()
            .and_then(first_name)
            .or_else(|| {
                facts
                    .iter()
                    .find(|(key, _)| NAME_FACT_KEYS.contains(&key.to_lowercase().as_str()))
                    .map(|(_, value)| value.clone())
            })
            .unwrap_or_default();

        let coach_name = store
            .find_one(Collection::Users, &[Filter::eq("id", coach_id)], None)
            .await?
            .as_ref()
            .and_then(first_name)
            .map(|name| format!("Coach {}", name))
            .unwrap_or_else(|| self.fallback_coach_name.clone());

        let persona = self.personas.get_or_load(store, coach_id).await?;

        info!(
            user_id,
            coach_id,
            has_profile = !profile.is_empty(),
            facts = facts.len(),
            "Turn context assembled"
        );

        Ok(TurnContext {
            user_id: user_id.to_string(),
            coach_id: coach_id.to_string(),
            user_name,
            coach_name,
            profile,
            facts,
            persona,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!(90.0)), Some("90".to_string()));
        assert_eq!(display_value(&json!(82.5)), Some("82.5".to_string()));
        assert_eq!(display_value(&json!("  ")), None);
        assert_eq!(display_value(&Value::Null), None);
        assert_eq!(display_value(&json!(0)), None);
    }

    #[test]
    fn test_zero_training_days_is_shown() {
        assert_eq!(
            profile_value("training_days_per_week", &json!(0)).as_deref(),
            Some("0")
        );
        assert_eq!(profile_value("current_weight_kg", &json!(0)), None);
        assert_eq!(profile_value("age", &json!(0)), None);
    }

    #[test]
    fn test_first_name_prefers_first_name_column() {
        let mut row = Row::new();
        row.insert("first_name".into(), json!("Kari"));
        row.insert("username".into(), json!("kari92"));
        assert_eq!(first_name(&row).as_deref(), Some("Kari"));

        row.insert("first_name".into(), json!(""));
        assert_eq!(first_name(&row).as_deref(), Some("kari92"));
    }
}
