//! Context assembly against a real store

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;

use mentor_engine::context::{ContextAssembler, PersonaCache};
use mentor_engine::db::Collection;

fn assembler(store: &Arc<dyn mentor_engine::db::RecordStore>) -> ContextAssembler {
    ContextAssembler::new(Arc::clone(store), Arc::new(PersonaCache::new(8)), "Coach Majen")
}

#[tokio::test]
async fn test_new_user_gets_empty_context() {
    let (_dir, store) = temp_store().await;
    let ctx = assembler(&store).assemble("ny", "c1").await.unwrap();

    assert_eq!(ctx.user_name, "");
    assert_eq!(ctx.coach_name, "Coach Majen");
    assert!(!ctx.has_profile());
    assert_eq!(ctx.onboarding_summary(), "");
    assert!(ctx.facts.is_empty());
    assert!(ctx.persona.is_empty());
}

#[tokio::test]
async fn test_full_context() {
    let (_dir, store) = temp_store().await;
    seed_user(
        &store,
        "u1",
        "Kari",
        json!({
            "gender": "kvinne",
            "current_weight_kg": 68.5,
            "training_days_per_week": 3,
            "injury_history": "",
            "age": null
        }),
    )
    .await;
    store
        .upsert(
            Collection::Users,
            row(json!({"id": "c1", "first_name": "Majen", "role": "mentor"})),
            &["id"],
        )
        .await
        .unwrap();
    for (key, value) in [("favorittøvelse", "knebøy"), ("allergi", "nøtter")] {
        store
            .upsert(
                Collection::UserContext,
                row(json!({"user_id": "u1", "key": key, "value": value, "source": "agent"})),
                &["user_id", "key"],
            )
            .await
            .unwrap();
    }
    for (key, value) in [("voice_tone", "Varm og direkte"), ("favorite_color", "blå")] {
        store
            .upsert(
                Collection::CoachKnowledge,
                row(json!({"coach_id": "c1", "key": key, "value": value})),
                &["coach_id", "key"],
            )
            .await
            .unwrap();
    }

    let ctx = assembler(&store).assemble("u1", "c1").await.unwrap();

    assert_eq!(ctx.user_name, "Kari");
    assert_eq!(ctx.coach_name, "Coach Majen");
    // Blank and null fields are left out entirely
    assert_eq!(
        ctx.onboarding_summary(),
        "- Kjønn: kvinne\n- Vekt: 68.5\n- Treningsdager/uke: 3"
    );
    assert_eq!(ctx.facts_summary(), "- allergi: nøtter\n- favorittøvelse: knebøy");
    assert_eq!(ctx.persona.voice_tone, "Varm og direkte");
    assert!(ctx.persona.training_philosophy.is_empty());
}

#[tokio::test]
async fn test_name_falls_back_to_remembered_fact() {
    let (_dir, store) = temp_store().await;
    store
        .upsert(
            Collection::UserContext,
            row(json!({"user_id": "u1", "key": "navn", "value": "Ola"})),
            &["user_id", "key"],
        )
        .await
        .unwrap();

    let ctx = assembler(&store).assemble("u1", "c1").await.unwrap();
    assert_eq!(ctx.user_name, "Ola");
}

#[tokio::test]
async fn test_coach_name_uses_first_name_of_coach_row() {
    let (_dir, store) = temp_store().await;
    store
        .upsert(
            Collection::Users,
            row(json!({"id": "c9", "first_name": "Ingrid", "role": "mentor"})),
            &["id"],
        )
        .await
        .unwrap();

    let ctx = assembler(&store).assemble("u1", "c9").await.unwrap();
    assert_eq!(ctx.coach_name, "Coach Ingrid");
}

#[tokio::test]
async fn test_zero_training_days_stays_known() {
    let (_dir, store) = temp_store().await;
    seed_user(
        &store,
        "u1",
        "Kari",
        json!({"current_weight_kg": 70, "training_days_per_week": 0}),
    )
    .await;

    let ctx = assembler(&store).assemble("u1", "c1").await.unwrap();
    assert_eq!(ctx.onboarding_summary(), "- Vekt: 70\n- Treningsdager/uke: 0");
}
