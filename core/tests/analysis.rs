use freeship_core::{
    aggregate::Order,
    analysis::{analyze, compare_groups, metric_rows, segment_effects},
    config::{DesignConfig, PipelineConfig, SegmentBounds},
    design::Assignment,
    error::PipelineError,
    segment::Segment,
    treatment::{outcome_for, SimulatedOutcome},
    types::Group,
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn outcome(id: usize, price: f64, shipping: f64, group: Group) -> SimulatedOutcome {
    let a = Assignment {
        order: Order {
            order_id:       format!("o{id}"),
            total_price:    price,
            total_shipping: shipping,
            num_items:      1,
            order_total:    price + shipping,
        },
        group,
    };
    outcome_for(&a, None, 100.0)
}

// ── Overall comparison ───────────────────────────────────────────────────────

#[test]
fn overall_comparison_matches_hand_computation() {
    let control = [1.0, 2.0, 3.0, 4.0, 5.0];
    let treatment = [3.0, 4.0, 5.0, 6.0, 7.0];
    let r = compare_groups(&control, &treatment, &DesignConfig::default()).unwrap();

    assert_eq!(r.mean_diff, 2.0);
    assert!((r.pct_diff.unwrap() - 66.666_666).abs() < 1e-4);
    // Equal variances (2.5) in both arms: pooled t = 2 / sqrt(2.5 × 0.4) = 2.
    assert!((r.t_stat.unwrap() - 2.0).abs() < 1e-12);
    assert!((r.p_value.unwrap() - 0.080_516).abs() < 1e-4);
    assert!((r.se - 1.0).abs() < 1e-12);
    assert_eq!(r.df, 4);
    assert!((r.t_crit - 2.776_445).abs() < 1e-4);
    assert!((r.ci_low - (2.0 - r.t_crit)).abs() < 1e-12);
    assert!((r.ci_high - (2.0 + r.t_crit)).abs() < 1e-12);
    assert!((r.pooled_std - 2.5_f64.sqrt()).abs() < 1e-12);
    assert!((r.cohens_d.unwrap() - 2.0 / 2.5_f64.sqrt()).abs() < 1e-12);
}

#[test]
fn comparison_needs_two_rows_per_arm() {
    let err = compare_groups(&[1.0], &[2.0, 3.0], &DesignConfig::default()).unwrap_err();
    assert!(matches!(err, PipelineError::InsufficientData { .. }));
}

#[test]
fn identical_constant_arms_leave_test_undefined() {
    let r = compare_groups(&[5.0, 5.0, 5.0], &[5.0, 5.0], &DesignConfig::default()).unwrap();
    assert_eq!(r.mean_diff, 0.0);
    assert_eq!(r.t_stat, None);
    assert_eq!(r.p_value, None);
    assert_eq!(r.cohens_d, None);

    let rows = metric_rows(&r);
    let p = rows.iter().find(|row| row.metric == "P-value").unwrap();
    assert_eq!(p.value, "", "undefined values are written as empty cells");
}

#[test]
fn headline_table_has_seven_metrics() {
    let r = compare_groups(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0], &DesignConfig::default()).unwrap();
    let rows = metric_rows(&r);
    let names: Vec<&str> = rows.iter().map(|row| row.metric.as_str()).collect();
    assert_eq!(
        names,
        [
            "Overall Effect (BRL)",
            "Effect (%)",
            "P-value",
            "95% CI Lower",
            "95% CI Upper",
            "Cohen's d",
            "Detectable Effect (BRL)",
        ]
    );
    assert_eq!(rows[1].value, "100.00%");
}

// ── Segments ─────────────────────────────────────────────────────────────────

#[test]
fn segment_without_one_arm_is_skipped() {
    let bounds = SegmentBounds::default();
    let outcomes = vec![
        outcome(0, 40.0, 10.0, Group::Control),
        outcome(1, 50.0, 10.0, Group::Treatment),
        outcome(2, 60.0, 12.0, Group::Treatment),
        outcome(3, 120.0, 15.0, Group::Control),
        outcome(4, 130.0, 15.0, Group::Control),
        // No Large orders at all.
    ];
    let (effects, skipped) = segment_effects(&outcomes, &bounds).unwrap();

    assert_eq!(effects.len(), 1);
    assert_eq!(effects[0].segment, Segment::Small);
    assert_eq!(effects[0].n_control, 1);
    assert_eq!(effects[0].n_treatment, 2);
    assert_eq!(skipped, vec![Segment::Medium, Segment::Large]);
}

#[test]
fn segment_edges_are_half_open() {
    let bounds = SegmentBounds::default();
    assert_eq!(Segment::classify(74.99, &bounds), Segment::Small);
    assert_eq!(Segment::classify(75.0, &bounds), Segment::Medium);
    assert_eq!(Segment::classify(149.99, &bounds), Segment::Medium);
    assert_eq!(Segment::classify(150.0, &bounds), Segment::Large);
}

#[test]
fn analysis_is_a_pure_function_of_outcomes() {
    let outcomes: Vec<SimulatedOutcome> = (0..60)
        .map(|i| {
            let group = if i % 3 == 0 { Group::Treatment } else { Group::Control };
            outcome(i, 20.0 + (i * 11 % 200) as f64, 9.0 + (i % 4) as f64, group)
        })
        .collect();
    let config = PipelineConfig::default();
    let a = analyze(&outcomes, &config).unwrap();
    let b = analyze(&outcomes, &config).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.overall.n_control + a.overall.n_treatment, 60);
}
