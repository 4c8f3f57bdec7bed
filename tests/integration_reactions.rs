//! Integration tests for reaction kinetics
//!
//! Compilation into groups, mass-action equilibria, multi-compartment exchange and membrane
//! currents from the host.

use rxd_rs::kinetics::{GroupKey, SpeciesRef};
use rxd_rs::prelude::*;

mod common;
use common::{branched_cell, init_logging, relative_error, rod};

fn run_fixed(scenario: &mut Scenario, total_time: f64, steps: usize) {
    FixedStepSolver::new()
        .solve(scenario, &SolverConfiguration::fixed_step(total_time, steps))
        .unwrap();
}

fn mean_concentration(context: &ReactionDiffusionContext, species: SpeciesId, region: rxd_rs::region::RegionId) -> f64 {
    let nodes: Vec<_> = context
        .nodes(species)
        .unwrap()
        .into_iter()
        .filter(|node| node.region == region && node.volume > 0.0)
        .collect();
    let volume: f64 = nodes.iter().map(|n| n.volume).sum();
    nodes.iter().map(|n| n.volume * context.concentration(n.index).unwrap()).sum::<f64>() / volume
}

// =================================================================================================
// Grouping
// =================================================================================================

#[test]
fn test_groups_follow_region_sets() {
    init_logging();
    let (morphology, sections) = branched_cell();
    let host = StaticHost::new(morphology);

    let mut context = ReactionDiffusionContext::new();
    let cyt = context
        .add_region(Region::new("cyt", sections.to_vec(), Geometry::fractional_volume(0.83, 1.0, None).unwrap()).unwrap())
        .unwrap();
    let er = context
        .add_region(Region::new("er", sections.to_vec(), Geometry::fractional_volume(0.17, 0.0, None).unwrap()).unwrap())
        .unwrap();
    let er_mem = context
        .add_region(Region::new("er_mem", sections.to_vec(), Geometry::distributed_boundary(1.0, 1.0).unwrap()).unwrap())
        .unwrap();

    let ca = context.add_species(Species::new(vec![cyt, er]).with_diffusion(0.2)).unwrap();
    let buf = context.add_species(Species::new(vec![cyt])).unwrap();
    let cabuf = context.add_species(Species::new(vec![cyt])).unwrap();
    let ip3 = context.add_species(Species::new(vec![cyt])).unwrap();
    let store = context.add_species(Species::new(vec![er])).unwrap();

    // both on cyt alone
    context
        .add_reaction(Reaction::new(vec![(ca, 1), (buf, 1)], vec![(cabuf, 1)], 1.0).on_regions(vec![cyt]))
        .unwrap();
    context.add_reaction(Rate::new(ip3, Expr::species(ip3) * -0.1)).unwrap();
    // er alone
    context.add_reaction(Rate::new(store, Expr::species(store) * -0.2)).unwrap();
    // cyt + er across the membrane
    context
        .add_reaction(
            MultiCompartmentReaction::new(
                vec![(SpeciesRef::on(ca, er), 1)],
                vec![(SpeciesRef::on(ca, cyt), 1)],
                1.0,
                er_mem,
            )
            .with_backward(1.0),
        )
        .unwrap();

    let system = context.reaction_system(&host).unwrap();
    assert_eq!(system.groups().len(), 3);

    let mut seen = Vec::new();
    for group in system.groups() {
        let GroupKey::Regions { regions, anchor } = group.key() else {
            panic!("no extracellular groups expected");
        };
        assert!(regions.contains(anchor));
        // every slot lives on one of the group's regions
        assert!(group.slots().iter().all(|(_, region)| regions.contains(region)));
        seen.push((regions.clone(), group.kernels().len()));
    }

    let mut cyt_only = vec![cyt];
    cyt_only.sort();
    assert!(seen.contains(&(cyt_only, 2)), "{seen:?}");
    assert!(seen.contains(&(vec![er], 1)));
    let mut across = vec![cyt, er, er_mem];
    across.sort();
    assert!(seen.contains(&(across, 1)));
}

#[test]
fn test_reaction_spanning_two_pinned_regions_is_rejected() {
    let (morphology, dend) = rod(10.0, 1.0, 2);
    let host = StaticHost::new(morphology);
    let mut context = ReactionDiffusionContext::new();
    let cyt = context.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
    let er = context
        .add_region(Region::new("er", vec![dend], Geometry::fractional_volume(0.1, 0.0, None).unwrap()).unwrap())
        .unwrap();
    let ca = context.add_species(Species::new(vec![cyt, er])).unwrap();

    let err = context
        .add_reaction(Reaction::new(vec![(SpeciesRef::on(ca, er), 1)], vec![(SpeciesRef::on(ca, cyt), 1)], 1.0))
        .unwrap_err();
    assert!(matches!(err, RxdError::InvalidReaction(_)), "{err}");

    // the registry is untouched and still compiles
    assert!(context.reaction_system(&host).unwrap().groups().is_empty());
}

// =================================================================================================
// Dynamics
// =================================================================================================

#[test]
fn test_reversible_reaction_reaches_equilibrium() {
    let (morphology, dend) = rod(20.0, 1.0, 4);
    let mut context = ReactionDiffusionContext::new();
    let cyt = context.add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap()).unwrap();
    let a = context
        .add_species(Species::new(vec![cyt]).with_diffusion(1.0).with_initial(InitialValue::Constant(3.0)))
        .unwrap();
    let b = context.add_species(Species::new(vec![cyt]).with_diffusion(1.0)).unwrap();
    context
        .add_reaction(Reaction::new(vec![(a, 1)], vec![(b, 1)], 2.0).with_backward(1.0))
        .unwrap();

    let mut scenario = Scenario::new(context, Box::new(StaticHost::new(morphology))).unwrap();
    scenario.initialize().unwrap();
    let total = scenario.context.total_amount(a).unwrap() + scenario.context.total_amount(b).unwrap();

    run_fixed(&mut scenario, 20.0, 2000);

    let amount_a = scenario.context.total_amount(a).unwrap();
    let amount_b = scenario.context.total_amount(b).unwrap();
    assert!(relative_error(amount_a + amount_b, total) < 1e-10);
    assert!(relative_error(amount_b / amount_a, 2.0) < 1e-6);
}

#[test]
fn test_multi_compartment_exchange_conserves_molecules() {
    let (morphology, sections) = branched_cell();
    let mut context = ReactionDiffusionContext::new();
    let cyt = context
        .add_region(Region::new("cyt", sections.to_vec(), Geometry::fractional_volume(0.83, 1.0, None).unwrap()).unwrap())
        .unwrap();
    let er = context
        .add_region(Region::new("er", sections.to_vec(), Geometry::fractional_volume(0.17, 0.0, None).unwrap()).unwrap())
        .unwrap();
    let er_mem = context
        .add_region(Region::new("er_mem", sections.to_vec(), Geometry::distributed_boundary(1.0, 1.0).unwrap()).unwrap())
        .unwrap();
    let ca = context.add_species(Species::new(vec![cyt, er])).unwrap();
    context
        .add_reaction(
            MultiCompartmentReaction::new(
                vec![(SpeciesRef::on(ca, er), 1)],
                vec![(SpeciesRef::on(ca, cyt), 1)],
                1e5,
                er_mem,
            )
            .with_backward(1e5),
        )
        .unwrap();

    let mut scenario = Scenario::new(context, Box::new(StaticHost::new(morphology))).unwrap();
    scenario.initialize().unwrap();
    let store: Vec<usize> = scenario
        .context
        .nodes(ca)
        .unwrap()
        .iter()
        .filter(|n| n.region == er && n.volume > 0.0)
        .map(|n| n.index)
        .collect();
    for node in store {
        scenario.context.set_concentration(node, 1.0).unwrap();
    }
    let before = scenario.context.total_amount(ca).unwrap();

    run_fixed(&mut scenario, 50.0, 1000);

    let after = scenario.context.total_amount(ca).unwrap();
    assert!(relative_error(after, before) < 1e-10, "amount {before} -> {after}");

    let in_cyt = mean_concentration(&scenario.context, ca, cyt);
    let in_er = mean_concentration(&scenario.context, ca, er);
    assert!(in_cyt > 0.0);
    assert!((in_cyt - in_er).abs() < 1e-6, "cyt {in_cyt} vs er {in_er}");
}

#[test]
fn test_host_ion_current_drives_concentration() {
    let (morphology, dend) = rod(10.0, 1.0, 1);
    let segment = SegmentRef::new(dend, 0);
    let mut host = StaticHost::new(morphology);
    host.set_ion_current("ca", segment, -0.01);

    let mut context = ReactionDiffusionContext::new();
    let cyt = context
        .add_region(Region::new("cyt", vec![dend], Geometry::Inside).unwrap().with_tag(IonSide::Inside))
        .unwrap();
    let ca = context
        .add_species(
            Species::new(vec![cyt])
                .named("ca")
                .with_charge(2)
                .with_initial(InitialValue::Constant(1e-4)),
        )
        .unwrap();

    let mut scenario = Scenario::new(context, Box::new(host)).unwrap();
    scenario.initialize().unwrap();
    run_fixed(&mut scenario, 1.0, 10);

    // 1e4/(z·F) · |I| · S/V with S/V = 4/d
    let expected = 1e-4 + 1e4 / (2.0 * 96_485.332_12) * 0.01 * 4.0;
    let node = scenario.context.node_by_location(ca, dend, 0.5).unwrap().unwrap();
    let value = scenario.context.concentration(node).unwrap();
    assert!(relative_error(value, expected) < 1e-9, "{value} vs {expected}");

    // transferred back to the host
    let host_value = scenario.host.concentration("ca", IonSide::Inside, segment).unwrap();
    assert_eq!(host_value, value);
}
