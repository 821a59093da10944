use freeship_core::{
    aggregate::Order,
    config::DesignConfig,
    design::{assign_groups, balance, baseline, design_experiment, plan_power, required_sample_size},
    error::PipelineError,
    rng::StageRng,
    types::Group,
};
use std::collections::HashSet;

fn orders(n: usize) -> Vec<Order> {
    (0..n)
        .map(|i| {
            let price = 30.0 + (i * 13 % 170) as f64;
            let shipping = 8.0 + (i % 6) as f64;
            Order {
                order_id:       format!("o{i:04}"),
                total_price:    price,
                total_shipping: shipping,
                num_items:      1,
                order_total:    price + shipping,
            }
        })
        .collect()
}

#[test]
fn sample_size_matches_hand_computation() {
    // 2 × (1.959964 + 0.841621)² × 50² / 10² = 392.44 → 393
    let n = required_sample_size(50.0, 10.0, 0.05, 0.80).unwrap();
    assert_eq!(n, 393);
}

#[test]
fn sample_size_shrinks_as_effect_grows() {
    let small = required_sample_size(50.0, 5.0, 0.05, 0.80).unwrap();
    let large = required_sample_size(50.0, 20.0, 0.05, 0.80).unwrap();
    assert!(small > large);
}

#[test]
fn non_positive_mde_is_rejected() {
    for mde in [0.0, -3.0, f64::NAN] {
        let err = required_sample_size(50.0, mde, 0.05, 0.80).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDesign(_)), "mde {mde}: {err}");
    }
}

#[test]
fn plan_uses_percent_of_mean_revenue() {
    let data = orders(200);
    let base = baseline(&data).unwrap();
    let plan = plan_power(&base, &DesignConfig::default()).unwrap();

    assert!((plan.mde_abs - base.mean_revenue * 0.05).abs() < 1e-9);
    assert_eq!(plan.n_total, plan.n_per_group * 2);
    assert!((plan.z_alpha - 1.959964).abs() < 1e-5);
}

#[test]
fn baseline_needs_two_orders() {
    let err = baseline(&orders(1)).unwrap_err();
    assert!(matches!(err, PipelineError::InsufficientData { actual: 1, .. }));
}

#[test]
fn sampling_is_without_replacement_and_clamped() {
    let data = orders(50);
    let mut rng = StageRng::new(42, 2);
    let assigned = assign_groups(&data, 500, 0.5, &mut rng);

    assert_eq!(assigned.len(), 50, "sample must be clamped to the available orders");
    let ids: HashSet<&str> = assigned.iter().map(|a| a.order.order_id.as_str()).collect();
    assert_eq!(ids.len(), 50, "an order was sampled twice");
}

#[test]
fn assignment_probability_is_respected() {
    let data = orders(2000);
    let mut rng = StageRng::new(5, 2);
    let assigned = assign_groups(&data, 2000, 0.5, &mut rng);
    let treated = assigned.iter().filter(|a| a.group == Group::Treatment).count();

    // ±5 standard deviations of Binomial(2000, 0.5).
    assert!((889..=1111).contains(&treated), "treatment count {treated}");

    let bal = balance(&assigned);
    assert_eq!(bal.n_control + bal.n_treatment, 2000);
    assert!(bal.abs_diff.is_some());
}

#[test]
fn design_is_reproducible_for_a_seed() {
    let data = orders(300);
    let cfg = DesignConfig::default();
    let a = design_experiment(&data, &cfg, &mut StageRng::new(42, 2)).unwrap();
    let b = design_experiment(&data, &cfg, &mut StageRng::new(42, 2)).unwrap();
    assert_eq!(a.assignments, b.assignments);
}

#[test]
fn constant_revenue_cannot_be_designed() {
    let data: Vec<Order> = (0..10)
        .map(|i| Order {
            order_id:       format!("o{i}"),
            total_price:    50.0,
            total_shipping: 10.0,
            num_items:      1,
            order_total:    60.0,
        })
        .collect();
    let err = design_experiment(&data, &DesignConfig::default(), &mut StageRng::new(1, 2)).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidDesign(_)));
}
