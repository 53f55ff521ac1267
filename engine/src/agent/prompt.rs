//! Persona prompt rendering
//!
//! The master prompt is recomputed for every turn from the [`TurnContext`]
//! and a fixed [`PolicyBlock`]. Rendering is pure: no state survives
//! between turns, so persona or profile edits show up on the next turn.

use crate::context::TurnContext;

/// Fixed rules appended to every master prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyBlock {
    pub language: String,
    /// Affirmations that approve a just-proposed plan
    pub approval_words: Vec<String>,
}

impl PolicyBlock {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            approval_words: ["ja", "lagre", "godkjent", "ser bra ut", "kjør på"]
                .iter()
                .map(|w| w.to_string())
                .collect(),
        }
    }

    fn language_rule(&self) -> String {
        if self.language.eq_ignore_ascii_case("norwegian") {
            "**Svar alltid på norsk** (bokmål), med mindre brukeren selv ber om et annet språk.".to_string()
        } else {
            format!("**Svar alltid på {}**.", self.language)
        }
    }

    fn render(&self) -> String {
        let approvals = self
            .approval_words
            .iter()
            .map(|w| format!("\"{}\"", w))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            r#"# KJERNEREGLER

1. {language}
2. **Vær varm, motiverende og personlig.** Bruk navnet til brukeren.
3. **Spør aldri om noe du allerede vet.** Alt under "BRUKERENS DATA" og "TING JEG HUSKER" er kjent; bruk det direkte.
4. **Vær handlingsorientert.** Ber brukeren om en plan, lager du den med en gang ut fra dataene du har.
5. **Påstå aldri at noe er gjort uten å ha kalt verktøyet.** "Jeg har lagret" forutsetter et verktøykall i samme tur.
6. **Feiler et verktøy, sier du det ærlig** og forklarer hva som gikk galt. Lat aldri som om det gikk bra.

# VERKTØY

- **delegate_body_tracking**: logg vekt, hent vekthistorikk
- **delegate_nutrition**: logg måltider, hent dagens ernæring, lagre kostholdsplan
- **delegate_training_plan**: lagre eller hent treningsplan
- **delegate_workout_log**: logg gjennomført trening
- **delegate_goals**: lagre eller oppdater mål
- **delegate_profile**: oppdater profilen, husk viktige fakta
- **get_user_stats**: hent oversikt over all brukerdata

# OBLIGATORISK VERKTØYBRUK

- Brukeren oppgir vekt ("veier 82 kg") → delegate_body_tracking("Logg vekt 82 kg for i dag")
- Brukeren forteller om et måltid → delegate_nutrition("Logg <måltid med estimerte makroer>")
- Brukeren godkjenner en treningsplan → delegate_training_plan("Lagre treningsplan: <hele planen>")
- Brukeren vil lagre en kostholdsplan → delegate_nutrition("Lagre kostholdsplan: <alle tall og måltider>")
- Brukeren nevner skade, allergi eller preferanse → delegate_profile("Husk at brukeren <detalj>")
- Du trenger ferske tall → get_user_stats

# NÅR BRUKEREN BER OM EN PLAN

1. Sjekk brukerdataene først; ikke spør om treningsdager, mål eller utstyr du allerede kjenner.
2. Lag planen med en gang og presenter den ryddig.
3. Spør: "Skal jeg lagre denne i Student Senteret ditt?"

# KRITISK: NÅR BRUKEREN GODKJENNER

Sier brukeren {approvals} eller lignende rett etter at du har presentert en plan:

→ Du husker planen du nettopp presenterte (den står i samtalen over)
→ Du kaller verktøyet med en gang, med KOMPLETT plan: alle dager, øvelser, sett og reps
→ Du bekrefter at planen er lagret og hvor brukeren finner den
→ Du spør ALDRI "hvilken plan?" eller ber brukeren gjenta den
"#,
            language = self.language_rule(),
            approvals = approvals
        )
    }
}

/// Render the master persona prompt for one turn
pub fn render(ctx: &TurnContext, policy: &PolicyBlock) -> String {
    let user_name = if ctx.user_name.is_empty() {
        "brukeren"
    } else {
        ctx.user_name.as_str()
    };

    let mut prompt = format!(
        "Du er {}, en profesjonell og varm online fitness-coach på Mentorio-plattformen.\n\
         Brukeren heter {}.\n\n",
        ctx.coach_name, user_name
    );

    prompt.push_str(&policy.render());

    if ctx.has_profile() {
        prompt.push_str("\n## BRUKERENS DATA (fra onboarding og profil)\n");
        prompt.push_str(&ctx.onboarding_summary());
        prompt.push('\n');
    }

    if !ctx.facts.is_empty() {
        prompt.push_str("\n## TING JEG HUSKER OM DENNE BRUKEREN\n");
        prompt.push_str(&ctx.facts_summary());
        prompt.push('\n');
    }

    let persona = &ctx.persona;
    let personality: Vec<String> = [
        ("Tone", &persona.voice_tone),
        ("Treningsfilosofi", &persona.training_philosophy),
        ("Ernæringsfilosofi", &persona.nutrition_philosophy),
        ("Spesielle instruksjoner", &persona.core_instructions),
    ]
    .iter()
    .filter(|(_, value)| !value.trim().is_empty())
    .map(|(label, value)| format!("{}: {}", label, value.trim()))
    .collect();
    if !personality.is_empty() {
        prompt.push_str("\n## MIN PERSONLIGHET OG FILOSOFI\n");
        prompt.push_str(&personality.join("\n"));
        prompt.push('\n');
    }

    prompt
}

/// Render a delegate's system prompt: its instructions plus the minimum
/// context it needs to act for the right user on the right date
pub fn render_delegate(instructions: &str, ctx: &TurnContext, today: &str) -> String {
    let mut prompt = format!("{}\n\nDagens dato: {}.", instructions, today);
    if !ctx.user_name.is_empty() {
        prompt.push_str(&format!(" Brukeren heter {}.", ctx.user_name));
    }
    if !ctx.facts.is_empty() {
        prompt.push_str("\n\nKjente fakta om brukeren:\n");
        prompt.push_str(&ctx.facts_summary());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CoachPersona, ProfileItem};
    use std::sync::Arc;

    fn context() -> TurnContext {
        let mut ctx = TurnContext::empty("u1", "c1", "Coach Majen");
        ctx.user_name = "Kari".to_string();
        ctx.profile = vec![
            ProfileItem {
                label: "Vekt",
                value: "90".to_string(),
            },
            ProfileItem {
                label: "Treningsdager/uke",
                value: "4".to_string(),
            },
        ];
        ctx
    }

    #[test]
    fn test_profile_fields_are_rendered() {
        let prompt = render(&context(), &PolicyBlock::new("Norwegian"));
        assert!(prompt.contains("Du er Coach Majen"));
        assert!(prompt.contains("Brukeren heter Kari."));
        assert!(prompt.contains("- Vekt: 90"));
        assert!(prompt.contains("- Treningsdager/uke: 4"));
        assert!(prompt.contains("Spør aldri om noe du allerede vet"));
    }

    #[test]
    fn test_absent_sections_are_omitted() {
        let ctx = TurnContext::empty("u1", "c1", "Coach Majen");
        let prompt = render(&ctx, &PolicyBlock::new("Norwegian"));
        assert!(prompt.contains("Brukeren heter brukeren."));
        assert!(!prompt.contains("## BRUKERENS DATA"));
        assert!(!prompt.contains("## TING JEG HUSKER"));
        assert!(!prompt.contains("MIN PERSONLIGHET"));
    }

    #[test]
    fn test_approval_protocol_lists_affirmations() {
        let prompt = render(&context(), &PolicyBlock::new("Norwegian"));
        assert!(prompt.contains("KRITISK: NÅR BRUKEREN GODKJENNER"));
        assert!(prompt.contains("\"ser bra ut\""));
        assert!(prompt.contains("\"kjør på\""));
    }

    #[test]
    fn test_render_is_recomputed_from_context() {
        let mut ctx = context();
        let before = render(&ctx, &PolicyBlock::new("Norwegian"));
        ctx.persona = Arc::new(CoachPersona {
            voice_tone: "Rolig og saklig".to_string(),
            ..CoachPersona::default()
        });
        ctx.facts.push(("skade".to_string(), "vondt kne".to_string()));
        let after = render(&ctx, &PolicyBlock::new("Norwegian"));
        assert_ne!(before, after);
        assert!(after.contains("Tone: Rolig og saklig"));
        assert!(after.contains("- skade: vondt kne"));
    }

    #[test]
    fn test_delegate_prompt() {
        let prompt = render_delegate("Du logger vekt.", &context(), "2024-05-01");
        assert!(prompt.starts_with("Du logger vekt."));
        assert!(prompt.contains("Dagens dato: 2024-05-01."));
        assert!(prompt.contains("Brukeren heter Kari."));
    }
}
