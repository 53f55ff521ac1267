//! Delegates
//!
//! A delegate is a capability backed by its own reasoning pass: it takes a
//! single `task` description from the master persona, reasons over a small
//! executor subset with its own instructions and temperature, and returns
//! its final text. Control always returns to the master, so the user only
//! ever talks to one persona.

use std::sync::Arc;

use async_trait::async_trait;
use sdk::errors::{CoachErrorExt, EngineError};
use sdk::schema::{CapabilityCost, CapabilitySpec, ParamKind, ParamSpec};
use sdk::types::{CapabilityArgs, ExecutionResult};
use serde::Deserialize;
use tracing::{info, warn};

use super::{today, Capability, CapabilityOutcome, Catalog, ExecutorSet, Invocation};
use crate::agent::prompt::render_delegate;
use crate::agent::DelegationRouter;
use crate::db::RecordStore;
use crate::llm::{InferenceRequest, InferenceRole, Message};

/// Static description of one delegate
pub struct DelegateDef {
    pub name: &'static str,
    pub description: &'static str,
    pub task_hint: &'static str,
    pub instructions: &'static str,
    pub executors: &'static [&'static str],
    /// `None` uses the configured delegate temperature
    pub temperature: Option<f32>,
    pub cost: CapabilityCost,
}

const NEVER_CLAIM: &str =
    "Bruk alltid verktøyene dine, og si ALDRI at noe er gjort uten å ha kalt verktøyet. \
     Feiler et verktøy, gjengi feilmeldingen.";

pub const DELEGATES: [DelegateDef; 6] = [
    DelegateDef {
        name: "delegate_body_tracking",
        description: "Logg vekt eller hent vekthistorikk. Send en tydelig oppgavebeskrivelse.",
        task_hint: "Hva som skal gjøres, f.eks. 'Logg vekt 82 kg for i dag' eller 'Hent vekthistorikk siste 14 dager'",
        instructions: "Du er en spesialisert agent for vekt- og kroppslogging. Du logger vekt, \
                       henter vekthistorikk og ser på trender. Svar kort med hva du gjorde.",
        executors: &["log_weight", "get_weight_history"],
        temperature: None,
        cost: CapabilityCost::Standard,
    },
    DelegateDef {
        name: "delegate_nutrition",
        description: "Logg måltider, hent dagens ernæring eller lagre en kostholdsplan.",
        task_hint: "Hva som skal gjøres, f.eks. 'Logg frokost: 2 egg og havregrøt, ca 400 kcal, 30g protein' \
                    eller 'Lagre kostholdsplan: 2800 kcal, 180g protein, 310g karbs, 85g fett'",
        instructions: "Du er en spesialisert ernæringsagent. Du logger måltider, henter dagens \
                       ernæring og lagrer kostholdsplaner. En kostholdsplan lagres med \
                       save_nutrition_plan og ALLE tallene (kcal, protein, karbs, fett). \
                       Svar kort med hva du gjorde og resultatet.",
        executors: &["log_meal", "get_today_nutrition", "save_nutrition_plan"],
        temperature: Some(0.3),
        cost: CapabilityCost::Standard,
    },
    DelegateDef {
        name: "delegate_training_plan",
        description: "Lagre eller hent treningsplan. Ta med ALLE detaljer i planen.",
        task_hint: "Hele planen som skal lagres, med alle dager og øvelser, f.eks. \
                    'Lagre treningsplan med 5 dager: Mandag=Bryst(Benkpress 4x6-8, ...), ...'",
        instructions: "Du er en spesialisert treningsplanlegger. Du lagrer treningsplaner i \
                       Student Senteret. Når du får en plan, kall save_training_plan med en \
                       komplett days-liste som inneholder ALLE dager og øvelser. \
                       Svar kort med hva du gjorde.",
        executors: &["save_training_plan", "get_current_training_plan"],
        temperature: Some(0.3),
        cost: CapabilityCost::Extended,
    },
    DelegateDef {
        name: "delegate_workout_log",
        description: "Logg en gjennomført treningsøkt med beskrivelse og øvelser.",
        task_hint: "Hva som skal logges, f.eks. 'Logg trening for i dag: Bryst og triceps, 60 min'",
        instructions: "Du er en spesialisert agent for treningslogging. Du logger gjennomførte \
                       økter med log_workout. Svar kort med bekreftelse.",
        executors: &["log_workout"],
        temperature: None,
        cost: CapabilityCost::Standard,
    },
    DelegateDef {
        name: "delegate_goals",
        description: "Lagre eller oppdater brukerens mål.",
        task_hint: "Målet som skal lagres, f.eks. 'Lagre mål: 80 kg innen 12 uker, benkpress 100 kg'",
        instructions: "Du er en spesialisert agent for målsetting. Du lagrer og oppdaterer \
                       brukerens mål med save_goal. Svar kort med bekreftelse.",
        executors: &["save_goal"],
        temperature: Some(0.3),
        cost: CapabilityCost::Standard,
    },
    DelegateDef {
        name: "delegate_profile",
        description: "Oppdater brukerens profil eller husk viktige fakta om brukeren.",
        task_hint: "Hva som skal lagres, f.eks. 'Husk at brukeren har vondt i høyre skulder' \
                    eller 'Oppdater profil: trener 5 dager i uken'",
        instructions: "Du er en spesialisert agent for profil og hukommelse. Bruk remember_fact \
                       for skader, allergier og preferanser, og update_profile for profildata. \
                       Svar kort med bekreftelse.",
        executors: &["remember_fact", "update_profile"],
        temperature: None,
        cost: CapabilityCost::Standard,
    },
];

#[derive(Deserialize)]
struct DelegateArgs {
    task: String,
}

pub struct DelegateCapability {
    spec: CapabilitySpec,
    instructions: &'static str,
    temperature: f32,
    executors: Catalog,
    router: Arc<DelegationRouter>,
}

impl DelegateCapability {
    pub fn new(
        def: &DelegateDef,
        executors: &ExecutorSet,
        router: Arc<DelegationRouter>,
        default_temperature: f32,
    ) -> Self {
        let spec = CapabilitySpec::new(def.name, def.description)
            .param(ParamSpec::required("task", ParamKind::String, def.task_hint))
            .cost(def.cost);
        Self {
            spec,
            instructions: def.instructions,
            temperature: def.temperature.unwrap_or(default_temperature),
            executors: executors.catalog(def.executors),
            router,
        }
    }

    pub fn executor_names(&self) -> &[String] {
        self.executors.names()
    }
}

#[async_trait]
impl Capability for DelegateCapability {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn call(
        &self,
        invocation: &Invocation<'_>,
        args: &CapabilityArgs,
    ) -> Result<CapabilityOutcome, EngineError> {
        let task = match args.parse::<DelegateArgs>(&self.spec.params) {
            Ok(a) if !a.task.trim().is_empty() => a.task,
            Ok(_) => {
                let result =
                    ExecutionResult::failure("Oppgaven mangler beskrivelse", "task is empty");
                return Ok(result.into());
            }
            Err(e) => return Ok(ExecutionResult::failure("Ugyldig oppgave", e.to_string()).into()),
        };
        info!(
            delegate = %self.spec.name,
            user_id = %invocation.turn.user_id,
            task_len = task.len(),
            "Delegating task"
        );

        let system_prompt = render_delegate(
            &format!("{}\n{}", self.instructions, NEVER_CLAIM),
            invocation.turn,
            &today(),
        );
        let request = InferenceRequest::new(InferenceRole::Delegate, system_prompt)
            .with_temperature(self.temperature)
            .with_messages(vec![Message::user(task)]);
        let first_record = invocation.trail.len();
        let nested = Invocation {
            turn: invocation.turn,
            trail: invocation.trail,
            depth: invocation.depth + 1,
        };

        match self.router.route(request, &self.executors, &nested).await {
            Ok(outcome) => {
                // A delegate succeeds only if it acted and none of its executors failed
                let success = invocation
                    .trail
                    .succeeded_since(first_record, nested.depth)
                    .unwrap_or(false);
                info!(
                    delegate = %self.spec.name,
                    sub_capabilities = ?outcome.invoked,
                    reply_len = outcome.reply.len(),
                    success,
                    "Delegate finished"
                );
                Ok(CapabilityOutcome {
                    output: outcome.reply,
                    success,
                })
            }
            Err(e) if e.is_recoverable() => {
                warn!("Delegate {} gave up: {}", self.spec.name, e);
                Ok(ExecutionResult::failure(
                    format!("{} kunne ikke fullføre oppgaven", self.spec.name),
                    e.to_string(),
                )
                .into())
            }
            Err(e) => Err(e),
        }
    }
}

/// The master persona's catalog: every delegate plus `get_user_stats`
pub fn build_master_catalog(
    store: Arc<dyn RecordStore>,
    router: Arc<DelegationRouter>,
    delegate_temperature: f32,
) -> Catalog {
    let executors = ExecutorSet::new(store);
    let catalog = DELEGATES.iter().fold(Catalog::new(), |catalog, def| {
        catalog.with(Arc::new(DelegateCapability::new(
            def,
            &executors,
            Arc::clone(&router),
            delegate_temperature,
        )))
    });
    match executors.get("get_user_stats") {
        Some(stats) => catalog.with_executor(stats),
        None => catalog,
    }
}
