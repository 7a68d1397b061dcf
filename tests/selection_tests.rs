mod common;

use chrono::Duration;

use common::{harness, CONCEPT};
use kt_core::kt::config::{ArmScope, CoreConfig};
use kt_core::kt::decision::{CandidateQuestion, FEATURE_DIM};
use kt_core::kt::types::ConceptParameters;
use kt_core::{CoreError, FeedbackRequest, UpdateRequest};

fn candidate(id: &str, difficulty: f64) -> CandidateQuestion {
    CandidateQuestion {
        question_id: id.to_string(),
        difficulty,
        expected_time_ms: Some(20_000),
    }
}

fn feedback_for(decision: &kt_core::kt::decision::SelectionDecision, reward: f64) -> FeedbackRequest {
    FeedbackRequest {
        student_id: "s1".into(),
        concept_id: CONCEPT.into(),
        question_id: decision.chosen_question_id.clone(),
        policy: decision.policy.clone(),
        score: decision.debug.chosen.score,
        reward,
        features: decision.debug.chosen.features.clone(),
        debug: Some(decision.debug.clone()),
    }
}

#[tokio::test]
async fn identical_arms_tie_to_the_lowest_id() {
    let h = harness(CoreConfig::default(), ConceptParameters::default());
    let candidates = vec![candidate("q-20", 0.5), candidate("q-10", 0.5)];
    let decision = h.engine.select("s1", CONCEPT, &candidates).await.unwrap();

    let scores = &decision.debug.scores;
    assert_eq!(scores.len(), 2);
    assert_eq!(scores[0].score, scores[1].score);
    assert_eq!(scores[0].features, scores[1].features);
    assert_eq!(decision.chosen_question_id, "q-10");
}

#[tokio::test]
async fn features_reflect_student_state() {
    let h = harness(CoreConfig::default(), ConceptParameters::default());
    let fresh = h
        .engine
        .select("s1", CONCEPT, &[candidate("q1", 0.5)])
        .await
        .unwrap();
    assert_eq!(fresh.debug.chosen.features.len(), FEATURE_DIM);
    assert_eq!(fresh.debug.chosen.features[1], 1.0);

    h.engine
        .update(UpdateRequest::new("s1", CONCEPT, "q1", true))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(6));
    let after = h
        .engine
        .select("s1", CONCEPT, &[candidate("q1", 0.5)])
        .await
        .unwrap();
    let recency = after.debug.chosen.features[1];
    assert!((recency - (1.0 - (-0.25f64).exp())).abs() < 1e-9);
    assert!(after.debug.chosen.features[0] > 0.0);
}

#[tokio::test]
async fn feedback_updates_only_the_chosen_arm() {
    let h = harness(CoreConfig::default(), ConceptParameters::default());
    let candidates = vec![candidate("q1", 0.3), candidate("q2", 0.7)];
    let decision = h.engine.select("s1", CONCEPT, &candidates).await.unwrap();
    let chosen = decision.chosen_question_id.clone();
    let other = if chosen == "q1" { "q2" } else { "q1" };

    let ack = h.engine.feedback(feedback_for(&decision, 1.0)).await.unwrap();
    assert_eq!(ack.update_count, 1);
    assert_eq!(ack.question_id, chosen);

    let policy = h.engine.policy();
    assert_eq!(policy.arm_stats("s1", CONCEPT, &chosen).unwrap().update_count(), 1);
    assert!(policy.arm_stats("s1", CONCEPT, other).is_none());
}

#[tokio::test]
async fn repeated_reward_shifts_selection() {
    let mut config = CoreConfig::default();
    config.bandit.alpha = 0.1;
    let h = harness(config, ConceptParameters::default());
    let candidates = vec![candidate("q1", 0.5), candidate("q2", 0.9)];

    for _ in 0..10 {
        let decision = h.engine.select("s1", CONCEPT, &candidates).await.unwrap();
        let reward = if decision.chosen_question_id == "q2" { 1.0 } else { 0.0 };
        h.engine.feedback(feedback_for(&decision, reward)).await.unwrap();
    }
    let decision = h.engine.select("s1", CONCEPT, &candidates).await.unwrap();
    assert_eq!(decision.chosen_question_id, "q2");
}

#[tokio::test]
async fn feedback_validation() {
    let h = harness(CoreConfig::default(), ConceptParameters::default());
    let decision = h
        .engine
        .select("s1", CONCEPT, &[candidate("q1", 0.5)])
        .await
        .unwrap();

    let mut wrong_policy = feedback_for(&decision, 1.0);
    wrong_policy.policy = "thompson".into();
    assert!(matches!(
        h.engine.feedback(wrong_policy).await,
        Err(CoreError::Validation(_))
    ));

    let mut bad_reward = feedback_for(&decision, 1.0);
    bad_reward.reward = f64::INFINITY;
    assert!(h.engine.feedback(bad_reward).await.is_err());

    let mut short = feedback_for(&decision, 1.0);
    short.features.truncate(3);
    assert!(h.engine.feedback(short).await.is_err());

    assert!(h.engine.policy().arm_stats("s1", CONCEPT, "q1").is_none());
}

#[tokio::test]
async fn selection_rejects_bad_candidates() {
    let h = harness(CoreConfig::default(), ConceptParameters::default());
    assert!(h.engine.select("s1", CONCEPT, &[]).await.is_err());
    assert!(h
        .engine
        .select("s1", CONCEPT, &[candidate("q1", 0.2), candidate("q1", 0.4)])
        .await
        .is_err());
    assert!(matches!(
        h.engine.select("s1", "geometry", &[candidate("q1", 0.2)]).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn student_scope_keeps_arms_apart() {
    let mut config = CoreConfig::default();
    config.bandit.scope = ArmScope::Student;
    let h = harness(config, ConceptParameters::default());
    let decision = h
        .engine
        .select("s1", CONCEPT, &[candidate("q1", 0.5)])
        .await
        .unwrap();
    h.engine.feedback(feedback_for(&decision, 1.0)).await.unwrap();

    let policy = h.engine.policy();
    assert!(policy.arm_stats("s1", CONCEPT, "q1").is_some());
    assert!(policy.arm_stats("s2", CONCEPT, "q1").is_none());
}
