//! Body tracking: weight log and history

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Local};
use sdk::schema::{CapabilitySpec, ParamKind, ParamSpec};
use sdk::types::{CapabilityArgs, ExecutionResult};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{fmt_num, or_empty, record_change, resolve_date, row, write_failed, TaskExecutor};
use crate::context::TurnContext;
use crate::db::{Collection, Filter, FindOptions, RecordStore};

pub const MIN_WEIGHT_KG: f64 = 20.0;
pub const MAX_WEIGHT_KG: f64 = 500.0;

pub struct LogWeight {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

#[derive(Deserialize)]
struct LogWeightArgs {
    kg: f64,
    date: Option<String>,
}

impl LogWeight {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "log_weight",
            "Logg brukerens kroppsvekt. Én måling per dag; samme dato overskrives.",
        )
        .param(ParamSpec::required("kg", ParamKind::Number, "Vekt i kg"))
        .param(ParamSpec::optional(
            "date",
            ParamKind::String,
            "Dato (YYYY-MM-DD), standard i dag",
        ));
        Self { store, spec }
    }
}

#[async_trait]
impl TaskExecutor for LogWeight {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult {
        let args: LogWeightArgs = match args.parse(&self.spec.params) {
            Ok(a) => a,
            Err(e) => return ExecutionResult::failure("Ugyldig vekt", e.to_string()),
        };

        if !(MIN_WEIGHT_KG..=MAX_WEIGHT_KG).contains(&args.kg) {
            return ExecutionResult::failure(
                "Vekt må være mellom 20 og 500 kg",
                format!("kg {} outside [{}, {}]", args.kg, MIN_WEIGHT_KG, MAX_WEIGHT_KG),
            );
        }
        let date = match resolve_date(args.date.as_deref()) {
            Ok(d) => d,
            Err(e) => {
                return ExecutionResult::failure("Ugyldig dato, bruk formatet ÅÅÅÅ-MM-DD", e)
            }
        };

        let entry = row([
            ("user_id", json!(ctx.user_id)),
            ("date", json!(date)),
            ("kg", json!(args.kg)),
        ]);
        if let Err(e) = self
            .store
            .upsert(Collection::WeightEntries, entry, &["user_id", "date"])
            .await
        {
            return write_failed("Kunne ikke lagre vekten akkurat nå", e);
        }

        let message = format!("Vekt logget: {} kg ({})", fmt_num(args.kg), date);
        record_change(
            self.store.as_ref(),
            &ctx.user_id,
            "WEIGHT_LOG",
            &message,
            Some(json!({ "date": date, "kg": args.kg })),
        )
        .await;

        info!(user_id = %ctx.user_id, %date, kg = args.kg, "Weight logged");
        ExecutionResult::with_data(message, json!({ "date": date, "kg": args.kg }))
    }
}

pub struct GetWeightHistory {
    store: Arc<dyn RecordStore>,
    spec: CapabilitySpec,
}

#[derive(Deserialize)]
struct HistoryArgs {
    days: i64,
}

impl GetWeightHistory {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let spec = CapabilitySpec::new(
            "get_weight_history",
            "Hent brukerens vektmålinger for de siste dagene, eldste først.",
        )
        .param(
            ParamSpec::optional("days", ParamKind::Integer, "Antall dager tilbake")
                .with_default(json!(30)),
        )
        .read_only();
        Self { store, spec }
    }
}

#[async_trait]
impl TaskExecutor for GetWeightHistory {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, ctx: &TurnContext, args: &CapabilityArgs) -> ExecutionResult {
        let args: HistoryArgs = match args.parse(&self.spec.params) {
            Ok(a) => a,
            Err(e) => return ExecutionResult::failure("Ugyldig antall dager", e.to_string()),
        };
        let days = args.days.clamp(1, 3650);
        let cutoff = (Local::now().date_naive() - Duration::days(days))
            .format("%Y-%m-%d")
            .to_string();

        let rows = or_empty(
            self.store
                .find_many(
                    Collection::WeightEntries,
                    &[
                        Filter::eq("user_id", ctx.user_id.as_str()),
                        Filter::gte("date", cutoff),
                    ],
                    FindOptions::new()
                        .select(&["date", "kg"])
                        .order_by("date", true),
                )
                .await,
            "weight history",
        );

        let entries: Vec<Value> = rows
            .into_iter()
            .map(|r| json!({ "date": r.get("date"), "kg": r.get("kg") }))
            .collect();
        let count = entries.len();
        ExecutionResult::with_data(
            format!("{} vektmålinger siste {} dager", count, days),
            json!({ "entries": entries, "count": count }),
        )
    }
}
