// ==============================================
// ALLOCATOR END-TO-END SCENARIOS (integration)
// ==============================================
//
// Fixtures pin cache_delta to 10 bytes so the expected numbers stay
// stable when the production default changes; curve ticks are expressed
// in trading units.

use hopperkv::alloc::{AllocPolicy, Allocator, MissRatioCurve, ResrcVec, StatelessResrcVec};

fn tick_unit(x: u64, a: &Allocator) -> u64 {
    x * a.cache_delta()
}

fn configured() -> Allocator {
    let mut a = Allocator::new(AllocPolicy::default());
    a.set_alloc_total_net_bw(false);
    a.set_cache_delta(10);
    a.set_min_cache_size(10);
    a.set_min_db_rcu(10.0);
    a.set_min_db_wcu(10.0);
    a.set_min_net_bw(10.0);
    a
}

fn assert_resrc_similar(expected: ResrcVec, actual: ResrcVec, epsilon: f64) {
    assert_eq!(
        expected.cache_size, actual.cache_size,
        "cache mismatch: expected {expected}, actual {actual}"
    );
    assert!(
        (expected.stateless.db_rcu - actual.stateless.db_rcu).abs() < epsilon
            && (expected.stateless.db_wcu - actual.stateless.db_wcu).abs() < epsilon
            && (expected.stateless.net_bw - actual.stateless.net_bw).abs() < epsilon,
        "stateless mismatch: expected {expected}, actual {actual}"
    );
}

fn check_tenant_resrc(expected: ResrcVec, a: &Allocator, t_idx: usize) {
    assert_resrc_similar(expected, a.get_tenant(t_idx).resrc(), 0.01);
}

fn stateless_total(a: &Allocator) -> StatelessResrcVec {
    a.get_alloc_result()
        .into_iter()
        .fold(StatelessResrcVec::default(), |acc, r| acc + r.stateless)
}

#[test]
fn trivial_single_tenant_is_fixed_point() {
    let mut a = configured();
    let ticks: Vec<u64> = [1, 2, 4, 8, 10].iter().map(|&x| tick_unit(x, &a)).collect();
    let miss_ratios = vec![0.9, 0.8, 0.7, 0.6, 0.4];
    let base_resrc = ResrcVec::new(20, 2.0, 1.2, 6.0);

    a.add_tenant(
        StatelessResrcVec::new(0.5, 0.5, 4.0),
        base_resrc,
        MissRatioCurve::new(ticks, miss_ratios),
        0.0,
    )
    .unwrap();

    a.do_alloc();

    check_tenant_resrc(base_resrc, &a, 0);
}

#[test]
fn symmetric_tenants_are_a_fixed_point() {
    let mut a = configured();
    let ticks: Vec<u64> = [1, 2, 4, 8, 10].iter().map(|&x| tick_unit(x, &a)).collect();
    let miss_ratios = vec![0.9, 0.8, 0.7, 0.6, 0.4];
    let demand = StatelessResrcVec::new(0.5, 0.5, 4.0);
    let base_resrc = ResrcVec::new(tick_unit(2, &a), 2.0, 2.0, 16.0);

    for _ in 0..4 {
        a.add_tenant(
            demand,
            base_resrc,
            MissRatioCurve::new(ticks.clone(), miss_ratios.clone()),
            0.0,
        )
        .unwrap();
    }

    let improve_ratio = a.do_alloc();

    assert_eq!(improve_ratio, 0.0);
    for t_idx in 0..4 {
        check_tenant_resrc(base_resrc, &a, t_idx);
    }
}

#[test]
fn read_write_skew_splits_by_dominant_resource() {
    let mut a = configured();
    let ticks: Vec<u64> = [1, 2, 4, 8, 10].iter().map(|&x| tick_unit(x, &a)).collect();
    // saturated curves: cache contributes nothing, pure DRF
    let miss_ratios = vec![1.0, 1.0, 1.0, 1.0, 1.0];
    let base_resrc = ResrcVec::new(tick_unit(2, &a), 2.0, 2.0, 16.0);

    a.add_tenant(
        StatelessResrcVec::new(0.8, 0.2, 4.0),
        base_resrc,
        MissRatioCurve::new(ticks.clone(), miss_ratios.clone()),
        0.0,
    )
    .unwrap();
    a.add_tenant(
        StatelessResrcVec::new(0.2, 0.8, 4.0),
        base_resrc,
        MissRatioCurve::new(ticks, miss_ratios),
        0.0,
    )
    .unwrap();

    a.do_alloc();

    check_tenant_resrc(ResrcVec::new(tick_unit(2, &a), 3.2, 0.8, 16.0), &a, 0);
    check_tenant_resrc(ResrcVec::new(tick_unit(2, &a), 0.8, 3.2, 16.0), &a, 1);
}

#[test]
fn trade_basic_moves_cache_toward_the_steeper_curve() {
    let mut a = configured();
    let ticks: Vec<u64> = [2, 4, 6, 8, 10].iter().map(|&x| tick_unit(x, &a)).collect();
    let miss_ratios_1 = vec![0.9, 0.85, 0.8, 0.7, 0.5];
    let miss_ratios_2 = vec![0.8, 0.6, 0.3, 0.2, 0.15];
    let demand = StatelessResrcVec::new(0.8, 0.2, 4.0);
    let base_resrc = ResrcVec::new(tick_unit(4, &a), 2.0, 2.0, 16.0);

    a.add_tenant(
        demand,
        base_resrc,
        MissRatioCurve::new(ticks.clone(), miss_ratios_1),
        0.0,
    )
    .unwrap();
    a.add_tenant(
        demand,
        base_resrc,
        MissRatioCurve::new(ticks, miss_ratios_2),
        0.0,
    )
    .unwrap();

    a.do_alloc();

    check_tenant_resrc(ResrcVec::new(tick_unit(2, &a), 2.75, 1.69, 13.56), &a, 0);
    check_tenant_resrc(ResrcVec::new(tick_unit(6, &a), 1.25, 2.31, 18.44), &a, 1);
}

// ==============================================
// Invariants
// ==============================================

#[test]
fn conserving_redistribution_preserves_the_stateless_total() {
    let mut a = configured();
    let ticks: Vec<u64> = [2, 4, 6, 8, 10].iter().map(|&x| tick_unit(x, &a)).collect();
    let base_resrc = ResrcVec::new(tick_unit(4, &a), 2.0, 2.0, 16.0);

    a.add_tenant(
        StatelessResrcVec::new(0.8, 0.2, 4.0),
        base_resrc,
        MissRatioCurve::new(ticks.clone(), vec![0.9, 0.85, 0.8, 0.7, 0.5]),
        0.0,
    )
    .unwrap();
    a.add_tenant(
        StatelessResrcVec::new(0.4, 0.5, 2.0),
        base_resrc,
        MissRatioCurve::new(ticks, vec![0.8, 0.6, 0.3, 0.2, 0.15]),
        0.0,
    )
    .unwrap();

    let before = stateless_total(&a);
    a.do_alloc();
    let after = stateless_total(&a);

    assert!(
        before.is_almost_equal(&after),
        "total drifted: {before} -> {after}"
    );
}

#[test]
fn cache_total_is_preserved_and_floors_hold() {
    let mut a = configured();
    let ticks: Vec<u64> = [2, 4, 6, 8, 10].iter().map(|&x| tick_unit(x, &a)).collect();
    let base_resrc = ResrcVec::new(tick_unit(4, &a), 2.0, 2.0, 16.0);

    a.add_tenant(
        StatelessResrcVec::new(0.8, 0.2, 4.0),
        base_resrc,
        MissRatioCurve::new(ticks.clone(), vec![0.9, 0.85, 0.8, 0.7, 0.5]),
        0.0,
    )
    .unwrap();
    a.add_tenant(
        StatelessResrcVec::new(0.8, 0.2, 4.0),
        base_resrc,
        MissRatioCurve::new(ticks, vec![0.8, 0.6, 0.3, 0.2, 0.15]),
        0.0,
    )
    .unwrap();

    a.do_alloc();

    let result = a.get_alloc_result();
    let cache_total: u64 = result.iter().map(|r| r.cache_size).sum();
    assert_eq!(cache_total, 2 * base_resrc.cache_size);
    for (t_idx, r) in result.iter().enumerate() {
        assert!(
            r.cache_size >= a.get_tenant(t_idx).reserved_cache_size(),
            "tenant {t_idx} fell below its reserved floor"
        );
    }
}

#[test]
fn repeated_rounds_converge_to_a_fixed_point() {
    let mut a = configured();
    let ticks: Vec<u64> = [2, 4, 6, 8, 10].iter().map(|&x| tick_unit(x, &a)).collect();
    let base_resrc = ResrcVec::new(tick_unit(4, &a), 2.0, 2.0, 16.0);

    a.add_tenant(
        StatelessResrcVec::new(0.8, 0.2, 4.0),
        base_resrc,
        MissRatioCurve::new(ticks.clone(), vec![0.9, 0.85, 0.8, 0.7, 0.5]),
        0.0,
    )
    .unwrap();
    a.add_tenant(
        StatelessResrcVec::new(0.8, 0.2, 4.0),
        base_resrc,
        MissRatioCurve::new(ticks, vec![0.8, 0.6, 0.3, 0.2, 0.15]),
        0.0,
    )
    .unwrap();

    a.do_alloc();
    let first = a.get_alloc_result();
    a.do_alloc();
    let second = a.get_alloc_result();

    for (x, y) in first.iter().zip(&second) {
        assert_resrc_similar(*x, *y, 0.05);
    }
}
