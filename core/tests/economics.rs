use freeship_core::{
    aggregate::Order,
    config::{SegmentBounds, TreatmentConfig},
    design::Assignment,
    rng::StageRng,
    segment::Segment,
    summary::{
        compare_strategies, evaluate_strategy, roi_pct, segment_economics, Recommendation,
        SegmentEconomics, Strategy,
    },
    treatment::{outcome_for, simulate_treatment, SimulatedOutcome, TreatmentRun},
    types::Group,
};

// ── Helpers ──────────────────────────────────────────────────────────────────

const THRESHOLD: f64 = 100.0;

fn outcome(id: usize, price: f64, shipping: f64, group: Group, extra: Option<f64>) -> SimulatedOutcome {
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
    outcome_for(&a, extra, THRESHOLD)
}

/// Simulated run over a price sweep that populates every segment in
/// both arms.
fn simulated_run(n: usize, seed: u64) -> TreatmentRun {
    let assignments: Vec<Assignment> = (0..n)
        .map(|i| Assignment {
            order: Order {
                order_id:       format!("o{i:05}"),
                total_price:    10.0 + (i * 37 % 290) as f64 + 0.25 * (i % 4) as f64,
                total_shipping: 8.0 + (i % 11) as f64 * 1.5,
                num_items:      1,
                order_total:    0.0,
            },
            group: if i % 3 == 0 { Group::Control } else { Group::Treatment },
        })
        .collect();
    simulate_treatment(&assignments, &TreatmentConfig::default(), &mut StageRng::new(seed, 3))
}

fn econ(segment: Segment, gain: f64, cost: f64) -> SegmentEconomics {
    SegmentEconomics {
        segment,
        n_control:         10,
        n_treatment:       10,
        revenue_gain:      gain,
        shipping_cost:     cost,
        net_impact:        gain - cost,
        per_customer_diff: None,
    }
}

// ── ROI ──────────────────────────────────────────────────────────────────────

#[test]
fn roi_is_undefined_without_shipping_cost() {
    assert_eq!(roi_pct(50.0, 0.0), None);

    let economics = [econ(Segment::Small, 50.0, 0.0)];
    let s = evaluate_strategy(Strategy::Targeted, &[Segment::Small], &economics);
    assert_eq!(s.net_profit, 50.0);
    assert_eq!(s.roi_pct, None);
    assert_eq!(s.recommendation, Recommendation::Implement);
}

#[test]
fn roi_is_net_over_cost() {
    let roi = roi_pct(-25.0, 100.0).unwrap();
    assert!((roi + 25.0).abs() < 1e-12);
}

// ── Segment economics ────────────────────────────────────────────────────────

#[test]
fn segment_economics_follow_the_revenue_rule() {
    let bounds = SegmentBounds::default();
    let outcomes = vec![
        // Small responder: +60 gain, crosses threshold, loses 15 shipping.
        outcome(0, 60.0, 15.0, Group::Treatment, Some(20.0)),
        // Small non-responder: nothing gained, still pays shipping.
        outcome(1, 50.0, 10.0, Group::Treatment, None),
        outcome(2, 55.0, 11.0, Group::Control, None),
        // Medium already above threshold: shipping lost.
        outcome(3, 120.0, 18.0, Group::Treatment, None),
        outcome(4, 110.0, 17.0, Group::Control, None),
    ];
    let economics = segment_economics(&outcomes, &bounds, THRESHOLD);

    assert_eq!(economics.len(), 3, "every segment is reported, even when empty");
    let small = &economics[0];
    assert_eq!(small.segment, Segment::Small);
    assert_eq!(small.revenue_gain, 60.0);
    assert_eq!(small.shipping_cost, 15.0);
    assert_eq!(small.net_impact, 45.0);
    assert_eq!(small.n_treatment, 2);
    assert_eq!(small.n_control, 1);

    let medium = &economics[1];
    assert_eq!(medium.revenue_gain, 0.0);
    assert_eq!(medium.shipping_cost, 18.0);
    assert_eq!(medium.per_customer_diff, Some(120.0 - 127.0));

    let large = &economics[2];
    assert_eq!((large.n_control, large.n_treatment), (0, 0));
    assert_eq!(large.net_impact, 0.0);
    assert_eq!(large.per_customer_diff, None);
}

#[test]
fn universal_totals_are_the_sum_of_segments() {
    let economics = [
        econ(Segment::Small, 400.0, 150.0),
        econ(Segment::Medium, 250.0, 600.0),
        econ(Segment::Large, 0.0, 900.0),
    ];
    let cmp = compare_strategies(&economics, &[Segment::Small]);

    let gain: f64 = economics.iter().map(|e| e.revenue_gain).sum();
    let cost: f64 = economics.iter().map(|e| e.shipping_cost).sum();
    let net: f64 = economics.iter().map(|e| e.net_impact).sum();
    assert_eq!(cmp.universal.revenue_gain, gain);
    assert_eq!(cmp.universal.shipping_cost, cost);
    assert_eq!(cmp.universal.net_profit, net);
    assert_eq!(cmp.universal.scope, "Small+Medium+Large");
    assert_eq!(cmp.universal.customers_affected, 30);

    assert_eq!(cmp.targeted.scope, "Small");
    assert_eq!(cmp.targeted.net_profit, 250.0);
    assert_eq!(cmp.improvement, 250.0 - net);
}

#[test]
fn preferred_strategy_is_chosen_by_signed_net_impact() {
    // Universal loses money, targeted makes money.
    let losing = [
        econ(Segment::Small, 400.0, 150.0),
        econ(Segment::Medium, 100.0, 600.0),
        econ(Segment::Large, 0.0, 900.0),
    ];
    let cmp = compare_strategies(&losing, &[Segment::Small]);
    assert_eq!(cmp.universal.recommendation, Recommendation::Reject);
    assert_eq!(cmp.targeted.recommendation, Recommendation::Implement);
    assert_eq!(cmp.preferred, Some(Strategy::Targeted));

    // Same segment names, different numbers: universal wins.
    let winning = [
        econ(Segment::Small, 100.0, 50.0),
        econ(Segment::Medium, 500.0, 100.0),
        econ(Segment::Large, 300.0, 100.0),
    ];
    let cmp = compare_strategies(&winning, &[Segment::Small]);
    assert_eq!(cmp.preferred, Some(Strategy::Universal));

    // Nothing profitable.
    let none = [
        econ(Segment::Small, 0.0, 50.0),
        econ(Segment::Medium, 0.0, 50.0),
        econ(Segment::Large, 0.0, 50.0),
    ];
    assert_eq!(compare_strategies(&none, &[Segment::Small]).preferred, None);
}

#[test]
fn zero_net_is_not_worth_implementing() {
    assert_eq!(Recommendation::for_net(0.0), Recommendation::Reject);
    assert_eq!(Recommendation::for_net(0.01), Recommendation::Implement);
}

// ── Additivity over simulated outcomes ───────────────────────────────────────

#[test]
fn segment_gains_add_up_to_total_gain() {
    let bounds = SegmentBounds::default();
    let run = simulated_run(2000, 42);
    let economics = segment_economics(&run.outcomes, &bounds, THRESHOLD);

    for e in &economics {
        assert!(e.n_control > 0 && e.n_treatment > 0, "{} segment not covered", e.segment);
    }
    assert!(run.summary.responders > 0);

    let per_segment: f64 = economics.iter().map(|e| e.revenue_gain).sum();
    let responders: f64 = run.outcomes.iter().filter(|o| o.responded).map(|o| o.amount_added).sum();
    assert!(
        (per_segment - run.summary.revenue_gained).abs() < 1e-6,
        "segments {per_segment} vs total {}",
        run.summary.revenue_gained
    );
    assert!((per_segment - responders).abs() < 1e-6);
}

#[test]
fn segment_shipping_costs_add_up_to_waived_shipping() {
    let bounds = SegmentBounds::default();
    let run = simulated_run(2000, 7);
    let economics = segment_economics(&run.outcomes, &bounds, THRESHOLD);

    let per_segment: f64 = economics.iter().map(|e| e.shipping_cost).sum();
    let waived: f64 = run
        .outcomes
        .iter()
        .filter(|o| o.group() == Group::Treatment && o.final_price >= THRESHOLD)
        .map(|o| o.total_shipping())
        .sum();
    assert!(waived > 0.0);
    assert!(
        (per_segment - waived).abs() < 1e-6,
        "segments {per_segment} vs waived {waived}"
    );

    // Every order whose shipping was waived pays exactly its final price.
    for o in run.outcomes.iter().filter(|o| o.group() == Group::Treatment && o.final_price >= THRESHOLD) {
        assert_eq!(o.final_revenue, o.final_price);
    }
    let net: f64 = economics.iter().map(|e| e.net_impact).sum();
    assert!((net - (per_segment_gain(&economics) - waived)).abs() < 1e-6);
}

fn per_segment_gain(economics: &[SegmentEconomics]) -> f64 {
    economics.iter().map(|e| e.revenue_gain).sum()
}
