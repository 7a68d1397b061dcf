//! Property-Based Tests for the BKT pipeline
//!
//! Tests the following invariants:
//! - Bounds: new mastery stays in [0, 1] for any valid inputs
//! - Monotonicity: new mastery is non-decreasing in the prior for a fixed outcome
//! - Prediction: p_correct_pred equals m(1-s) + (1-m)g
//! - Projection: the constraint projection is a fixed point and never leaves the feasible region

use proptest::prelude::*;

use kt_core::kt::modeling::{
    BktUpdateEngine, ConstraintValidator, ContextualModulator, ProjectedParameters,
};
use kt_core::kt::types::{AttemptContext, ConceptParameters, KnowledgeConcept};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_f64_0_1() -> impl Strategy<Value = f64> {
    (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_f64_0_half() -> impl Strategy<Value = f64> {
    (0u64..=500u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_valid_params() -> impl Strategy<Value = ConceptParameters> {
    (arb_f64_0_1(), arb_f64_0_half(), arb_f64_0_half())
        .prop_map(|(l, s, g)| ConceptParameters::new(l, s, g))
}

fn arb_raw_params() -> impl Strategy<Value = ConceptParameters> {
    (-2.0f64..3.0, -2.0f64..3.0, -2.0f64..3.0)
        .prop_map(|(l, s, g)| ConceptParameters::new(l, s, g))
}

fn arb_context() -> impl Strategy<Value = AttemptContext> {
    (
        proptest::option::of(1u8..=5),
        proptest::option::of(1u8..=6),
        proptest::option::of(0u64..=300_000),
    )
        .prop_map(|(difficulty_level, bloom_level, response_time_ms)| AttemptContext {
            difficulty_level,
            bloom_level,
            response_time_ms,
        })
}

fn projected(params: ConceptParameters) -> ProjectedParameters {
    ConstraintValidator::default().project(params)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn new_mastery_stays_in_unit_interval(
        m in arb_f64_0_1(),
        params in arb_valid_params(),
        correct in any::<bool>(),
    ) {
        let out = BktUpdateEngine::default().update(m, &projected(params), correct);
        prop_assert!(out.new_mastery.is_finite());
        prop_assert!((0.0..=1.0).contains(&out.new_mastery));
        prop_assert!((0.0..=1.0).contains(&out.posterior_mastery));
    }

    #[test]
    fn new_mastery_is_monotone_in_prior(
        a in arb_f64_0_1(),
        b in arb_f64_0_1(),
        params in arb_valid_params(),
        correct in any::<bool>(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let p = projected(params);
        let engine = BktUpdateEngine::default();
        let low = engine.update(lo, &p, correct).new_mastery;
        let high = engine.update(hi, &p, correct).new_mastery;
        prop_assert!(low <= high + 1e-12, "m={} -> {}, m={} -> {}", lo, low, hi, high);
    }

    #[test]
    fn prediction_matches_closed_form(
        m in arb_f64_0_1(),
        params in arb_valid_params(),
        correct in any::<bool>(),
    ) {
        let p = projected(params);
        let out = BktUpdateEngine::default().update(m, &p, correct);
        let s = p.params.slip_rate;
        let g = p.params.guess_rate;
        let expected = m * (1.0 - s) + (1.0 - m) * g;
        prop_assert!((out.p_correct_pred - expected).abs() < 1e-12);
    }

    #[test]
    fn projection_is_idempotent(raw in arb_raw_params()) {
        let validator = ConstraintValidator::default();
        let once = validator.project(raw);
        let twice = validator.project(once.params);
        prop_assert_eq!(once.params, twice.params);
        prop_assert!(twice.violations.is_empty(), "{:?}", twice.violations);
    }

    #[test]
    fn projection_lands_in_feasible_region(raw in arb_raw_params()) {
        let out = ConstraintValidator::default().project(raw);
        let p = out.params;
        prop_assert!((0.0..=1.0).contains(&p.learn_rate));
        prop_assert!((0.0..=0.5).contains(&p.slip_rate));
        prop_assert!((0.0..=0.5).contains(&p.guess_rate));
        prop_assert!(p.slip_rate + p.guess_rate < 1.0);
        prop_assert!((1.0 - p.slip_rate) - p.guess_rate >= 0.05 - 1e-9);
    }

    #[test]
    fn modulated_pipeline_stays_bounded(
        m in arb_f64_0_1(),
        params in arb_valid_params(),
        ctx in arb_context(),
        correct in any::<bool>(),
    ) {
        let concept = KnowledgeConcept::new("c1", 3, 3);
        let modulated = ContextualModulator::default().modulate(params, &concept, &ctx);
        let out = BktUpdateEngine::default().update(m, &projected(modulated.params), correct);
        prop_assert!((0.0..=1.0).contains(&out.new_mastery));
    }
}
