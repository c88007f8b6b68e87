use approx::assert_relative_eq;

use sphcore::simulation::dynamics::{
    Dynamics1Level, InteractionDynamics, InteractionFn, InteractionWithUpdate, ReduceDynamics, ReduceFn,
    SimpleDynamics,
};
use sphcore::simulation::models::{
    AcousticTimeStep, ContinuityRate, DensitySummation, KineticEnergy, MinimumDistance, ViscousAcceleration,
};
use sphcore::{
    BodyId, BodyKind, BoundingBox, ConfigurationUpdater, Dimension, DispatchContext, ExecutionPolicy, InnerRelation,
    Instability, Kernel, KernelKind, NVec3, Particle, ParticleSet, RebuildPolicy, Relation, RelationId, Scenario,
    ScenarioConfig, SelfContribution, SimulationError, System,
};

/// n x n x n lattice at cell centers of the cube [0, n dx]^3, cutoff given absolutely
pub fn lattice_system(n: usize, dx: f64, cutoff: f64) -> (System, BodyId) {
    let side = n as f64 * dx;
    let domain = BoundingBox::new(NVec3::zeros(), NVec3::repeat(side));
    let mut sys = System::new(domain, Dimension::Three);

    let mut particles = Vec::new();
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                let x = NVec3::new(i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5) * dx;
                particles.push(Particle::new(x, dx * dx * dx, 1.0));
            }
        }
    }
    let kernel = Kernel::from_cutoff(KernelKind::WendlandC2, cutoff, Dimension::Three);
    let body = sys
        .add_body("Lattice", BodyKind::Fluid, dx, kernel, ParticleSet::new(particles))
        .unwrap();
    (sys, body)
}

/// Index of lattice point (i, j, k) in an n^3 lattice
pub fn lattice_index(n: usize, i: usize, j: usize, k: usize) -> usize {
    i + n * (j + n * k)
}

/// 2D body from explicit positions
pub fn add_points(sys: &mut System, name: &str, points: &[NVec3], dx: f64, cutoff: f64) -> BodyId {
    let particles = points.iter().map(|x| Particle::new(*x, dx * dx, 1.0)).collect();
    let kernel = Kernel::from_cutoff(KernelKind::WendlandC2, cutoff, sys.dimension);
    sys.add_body(name, BodyKind::Fluid, dx, kernel, ParticleSet::new(particles)).unwrap()
}

/// Line of 10 source particles half a spacing below a 20 x 5 target plane
pub fn line_and_plane(dp: f64) -> (System, BodyId, BodyId) {
    let domain = BoundingBox::new(NVec3::new(-dp, -dp, 0.0), NVec3::new(21.0 * dp, 6.0 * dp, 0.0));
    let mut sys = System::new(domain, Dimension::Two);

    let plane: Vec<NVec3> = (0..5)
        .flat_map(|j| (0..20).map(move |i| NVec3::new(i as f64 * dp, j as f64 * dp, 0.0)))
        .collect();
    let line: Vec<NVec3> = (0..10).map(|i| NVec3::new((i + 5) as f64 * dp, -0.5 * dp, 0.0)).collect();

    let source = add_points(&mut sys, "Line", &line, dp, 1.2 * dp);
    let target = add_points(&mut sys, "Plane", &plane, dp, 1.2 * dp);
    (sys, source, target)
}

fn inner_counts(sys: &System, relation: RelationId) -> Vec<usize> {
    let inner = sys.relation(relation).unwrap().inner().unwrap();
    inner.neighborhoods().iter().map(|n| n.len()).collect()
}

/// Neighbor count of each particle as an interaction
fn neighbor_count() -> impl sphcore::LocalInteraction<Value = f64> {
    InteractionFn::new(
        |i: usize, _dt: f64, ctx: &DispatchContext| ctx.inner(i).len() as f64,
        |_i: usize, _dt: f64, count: f64, p: &mut Particle| p.p = count,
    )
}

// ==================================================================================
// Cell-linked list tests
// ==================================================================================

#[test]
fn grid_holds_every_particle_once() {
    let (sys, body) = lattice_system(5, 0.2, 0.35);
    let grid = sys.body(body).unwrap().cell_linked_list();

    let mut all: Vec<usize> = grid.buckets().flat_map(|b| b.iter().copied()).collect();
    all.sort_unstable();
    assert_eq!(all, (0..125).collect::<Vec<_>>());
}

#[test]
fn particles_outside_domain_are_clamped() {
    let domain = BoundingBox::new(NVec3::zeros(), NVec3::new(1.0, 1.0, 0.0));
    let mut sys = System::new(domain, Dimension::Two);
    let body = add_points(
        &mut sys,
        "Spill",
        &[NVec3::new(0.5, 0.5, 0.0), NVec3::new(1.3, 0.5, 0.0), NVec3::new(0.5, -0.2, 0.0)],
        0.1,
        0.3,
    );
    let grid = sys.body(body).unwrap().cell_linked_list();
    assert_eq!(grid.num_particles(), 3);
    assert_eq!(grid.cell_of_particle(1)[0] as usize, grid.dims()[0] - 1);
    assert_eq!(grid.cell_of_particle(2)[1], 0);
}

// ==================================================================================
// Relation tests
// ==================================================================================

#[test]
fn moore_neighborhood_at_one_and_three_quarter_spacing() {
    let n = 4;
    let (mut sys, body) = lattice_system(n, 1.0, 1.75);
    let relation = sys.add_inner_relation(body).unwrap();

    let counts = inner_counts(&sys, relation);
    let interior = [(1, 1, 1), (1, 2, 1), (2, 2, 2), (2, 1, 2)];
    for (i, j, k) in interior {
        assert_eq!(counts[lattice_index(n, i, j, k)], 26);
    }
    let corners = [(0, 0, 0), (3, 0, 0), (0, 3, 3), (3, 3, 3)];
    for (i, j, k) in corners {
        assert_eq!(counts[lattice_index(n, i, j, k)], 7);
    }

    // zero displacement: counts are stable through the incremental path too
    let mut updater = ConfigurationUpdater::new(RebuildPolicy::Interval { steps: 100 });
    updater.initialize(&mut sys).unwrap();
    sys.body_mut(body).unwrap().particles.mark_moved();
    let report = updater.update(&mut sys).unwrap();
    assert!(report.rebuilt.is_empty());
    assert_eq!(report.migrated, 0);
    assert_eq!(inner_counts(&sys, relation), counts);
}

#[test]
fn one_and_a_half_spacing_reaches_faces_and_edges_only() {
    let n = 4;
    let (mut sys, body) = lattice_system(n, 1.0, 1.5);
    let relation = sys.add_inner_relation(body).unwrap();

    let counts = inner_counts(&sys, relation);
    assert_eq!(counts[lattice_index(n, 1, 1, 1)], 18);
    assert_eq!(counts[lattice_index(n, 0, 0, 0)], 6);
}

#[test]
fn inner_neighbors_within_cutoff_and_self_excluded() {
    let (mut sys, body) = lattice_system(6, 0.1, 0.26);
    let relation = sys.add_inner_relation(body).unwrap();
    let positions = sys.body(body).unwrap().particles.positions();
    let inner = sys.relation(relation).unwrap().inner().unwrap();

    assert_eq!(inner.neighborhoods().len(), positions.len());
    for (i, neighborhood) in inner.neighborhoods().iter().enumerate() {
        assert!(!neighborhood.contains(i));
        let mut seen: Vec<usize> = neighborhood.indices().collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), neighborhood.len(), "duplicate neighbor of {i}");
        for rec in neighborhood {
            assert!((positions[i] - positions[rec.j]).norm() <= 0.26);
        }
    }
}

#[test]
fn inner_update_is_idempotent_and_policy_independent() {
    let (mut sys, body) = lattice_system(5, 0.1, 0.25);
    let mut a = Relation::Inner(InnerRelation::new(body));
    a.update(&sys.bodies, ExecutionPolicy::Sequential).unwrap();
    let first = a.inner().unwrap().neighborhoods().to_vec();
    a.update(&sys.bodies, ExecutionPolicy::Sequential).unwrap();
    assert_eq!(a.inner().unwrap().neighborhoods(), first.as_slice());

    a.update(&sys.bodies, ExecutionPolicy::Parallel).unwrap();
    assert_eq!(a.inner().unwrap().neighborhoods(), first.as_slice());

    // registering through the system gives the same tables
    let id = sys.add_relation(a).unwrap();
    assert_eq!(sys.relation(id).unwrap().inner().unwrap().neighborhoods(), first.as_slice());
}

#[test]
fn contact_line_sees_three_plane_particles() {
    let (mut sys, source, target) = line_and_plane(0.1);
    let relation = sys.add_contact_relation(source, &[target]).unwrap();
    let contact = sys.relation(relation).unwrap().contact().unwrap();

    for i in 0..10 {
        let neighborhood = contact.neighborhood(0, i);
        assert_eq!(neighborhood.len(), 3, "source particle {i}");
        for rec in neighborhood {
            assert!(rec.j < 100);
            assert!(rec.distance <= 0.12 + 1e-12);
        }
    }
}

#[test]
fn contact_sublist_ignores_other_targets() {
    let dp = 0.1;
    let (mut alone, source, t1) = line_and_plane(dp);
    let r_alone = alone.add_contact_relation(source, &[t1]).unwrap();

    let (mut both, source2, t1b) = line_and_plane(dp);
    let crowd: Vec<NVec3> = (0..30).map(|i| NVec3::new(0.5 + 0.01 * i as f64, -0.05, 0.0)).collect();
    let t2 = add_points(&mut both, "Crowd", &crowd, dp, 1.2 * dp);
    let r_both = both.add_contact_relation(source2, &[t1b, t2]).unwrap();

    let c_alone = alone.relation(r_alone).unwrap().contact().unwrap();
    let c_both = both.relation(r_both).unwrap().contact().unwrap();
    for i in 0..10 {
        let mut a: Vec<usize> = c_alone.neighborhood(0, i).indices().collect();
        let mut b: Vec<usize> = c_both.neighborhood(0, i).indices().collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
        assert!(c_both.neighborhood(1, i).indices().all(|j| j < 30));
    }
    assert!((0..10).any(|i| !c_both.neighborhood(1, i).is_empty()));
}

/// Deterministic low-discrepancy points in the unit square
fn scattered_points(n: usize, offset: f64) -> Vec<NVec3> {
    (0..n)
        .map(|k| {
            let k = k as f64 + offset;
            NVec3::new((0.5 + k * 0.754_877_666_246_692_7).fract(), (0.5 + k * 0.569_840_290_998_053_2).fract(), 0.0)
        })
        .collect()
}

#[test]
fn contact_with_larger_source_cutoff_searches_several_rings() {
    let domain = BoundingBox::new(NVec3::zeros(), NVec3::new(1.0, 1.0, 0.0));
    let mut sys = System::new(domain, Dimension::Two);
    let sources = scattered_points(20, 0.0);
    let targets = scattered_points(200, 1000.0);
    let source = add_points(&mut sys, "Coarse", &sources, 0.1, 0.3);
    let target = add_points(&mut sys, "Fine", &targets, 0.01, 0.1);
    assert_eq!(sys.body(target).unwrap().cell_linked_list().search_depth(0.3), 3);

    let relation = sys.add_contact_relation(source, &[target]).unwrap();
    let contact = sys.relation(relation).unwrap().contact().unwrap();
    for (i, xi) in sources.iter().enumerate() {
        let mut found: Vec<usize> = contact.neighborhood(0, i).indices().collect();
        found.sort_unstable();
        let expected: Vec<usize> = (0..targets.len()).filter(|&j| (xi - targets[j]).norm() <= 0.3).collect();
        assert_eq!(found, expected, "source particle {i}");
    }
}

#[test]
fn contact_wiring_errors() {
    let (mut sys, source, target) = line_and_plane(0.1);
    assert!(matches!(
        sys.add_contact_relation(source, &[source]),
        Err(SimulationError::RelationMismatch(_))
    ));
    assert!(matches!(
        sys.add_complex_relation(source, &[target, target]),
        Err(SimulationError::RelationMismatch(_))
    ));
    assert_eq!(sys.add_inner_relation(BodyId(7)), Err(SimulationError::BodyOutOfRange(7)));
    assert_eq!(sys.body_id("Nope"), Err(SimulationError::UnknownBody("Nope".into())));
}

#[test]
fn isolated_particle_has_empty_neighborhood() {
    let domain = BoundingBox::new(NVec3::zeros(), NVec3::new(1.0, 1.0, 0.0));
    let mut sys = System::new(domain, Dimension::Two);
    let body = add_points(&mut sys, "Sparse", &[NVec3::new(0.1, 0.1, 0.0), NVec3::new(0.9, 0.9, 0.0)], 0.1, 0.2);
    let relation = sys.add_inner_relation(body).unwrap();
    assert_eq!(inner_counts(&sys, relation), vec![0, 0]);
}

// ==================================================================================
// Configuration updater tests
// ==================================================================================

#[test]
fn displacement_policy_rebuilds_after_large_motion() {
    let (mut sys, body) = lattice_system(4, 0.25, 0.3);
    sys.add_inner_relation(body).unwrap();
    let mut updater = ConfigurationUpdater::new(RebuildPolicy::Displacement { fraction: 0.5 });
    updater.initialize(&mut sys).unwrap();

    let x0 = sys.body(body).unwrap().particles.particles()[0].x;
    sys.body_mut(body).unwrap().particles.set_position(0, x0 + NVec3::new(0.01, 0.0, 0.0));
    let report = updater.update(&mut sys).unwrap();
    assert!(report.rebuilt.is_empty());

    sys.body_mut(body).unwrap().particles.set_position(0, x0 + NVec3::new(0.2, 0.0, 0.0));
    let report = updater.update(&mut sys).unwrap();
    assert_eq!(report.rebuilt, vec![body]);
    assert!(sys.relations[0].is_current(&sys.bodies));
}

#[test]
fn interval_policy_counts_updates() {
    let (mut sys, body) = lattice_system(3, 0.25, 0.3);
    let mut updater = ConfigurationUpdater::new(RebuildPolicy::Interval { steps: 3 });
    updater.initialize(&mut sys).unwrap();

    let mut rebuilt_at = Vec::new();
    for step in 1..=6 {
        sys.body_mut(body).unwrap().particles.mark_moved();
        if !updater.update(&mut sys).unwrap().rebuilt.is_empty() {
            rebuilt_at.push(step);
        }
    }
    assert_eq!(rebuilt_at, vec![3, 6]);
}

#[test]
fn particle_landing_on_cell_face_finds_new_neighbors() {
    let domain = BoundingBox::new(NVec3::zeros(), NVec3::new(1.0, 1.0, 0.0));
    let mut sys = System::new(domain, Dimension::Two);
    let points = [NVec3::new(0.125, 0.625, 0.0), NVec3::new(0.5, 0.625, 0.0), NVec3::new(0.875, 0.125, 0.0)];
    let body = add_points(&mut sys, "Row", &points, 0.05, 0.25);
    let relation = sys.add_inner_relation(body).unwrap();
    let mut updater = ConfigurationUpdater::new(RebuildPolicy::Interval { steps: 100 });
    updater.initialize(&mut sys).unwrap();
    assert_eq!(inner_counts(&sys, relation), vec![0, 0, 0]);

    // lands exactly on the face between cells 0 and 1, at cutoff distance from particle 1
    sys.body_mut(body).unwrap().particles.set_position(0, NVec3::new(0.25, 0.625, 0.0));
    let report = updater.update(&mut sys).unwrap();
    assert!(report.rebuilt.is_empty());
    assert_eq!(report.migrated, 1);

    let inner = sys.relation(relation).unwrap().inner().unwrap();
    assert!(inner.neighborhoods()[0].contains(1));
    assert!(inner.neighborhoods()[1].contains(0));
    assert!(inner.neighborhoods()[2].is_empty());
}

#[test]
fn clustering_is_reported_not_fatal() {
    let domain = BoundingBox::new(NVec3::zeros(), NVec3::new(1.0, 1.0, 0.0));
    let mut sys = System::new(domain, Dimension::Two);
    let cluster: Vec<NVec3> = (0..10).map(|i| NVec3::new(0.5 + 1e-3 * i as f64, 0.5, 0.0)).collect();
    let body = add_points(&mut sys, "Cluster", &cluster, 0.1, 0.2);
    let relation = sys.add_inner_relation(body).unwrap();

    let mut updater = ConfigurationUpdater::new(RebuildPolicy::EveryStep).with_limits(4, 3);
    let report = updater.initialize(&mut sys).unwrap();
    assert!(!report.is_stable());
    assert!(report
        .instabilities
        .contains(&Instability::CellOverflow { body, occupancy: 10, limit: 4 }));
    assert!(report
        .instabilities
        .contains(&Instability::NeighborOverflow { relation, count: 9, limit: 3 }));
}

// ==================================================================================
// Dispatch tests
// ==================================================================================

#[test]
fn interaction_on_stale_relation_is_refused() {
    let (mut sys, body) = lattice_system(3, 0.25, 0.3);
    let relation = sys.add_inner_relation(body).unwrap();
    let count = InteractionDynamics::new(relation, neighbor_count());
    count.exec(&mut sys, 0.0).unwrap();

    let x = sys.body(body).unwrap().particles.particles()[4].x;
    sys.body_mut(body).unwrap().particles.set_position(4, x + NVec3::new(0.01, 0.0, 0.0));
    assert_eq!(
        count.exec(&mut sys, 0.0),
        Err(SimulationError::StaleRelation { relation: relation.0, body: "Lattice".into() })
    );

    let mut updater = ConfigurationUpdater::default();
    updater.update(&mut sys).unwrap();
    assert!(count.exec(&mut sys, 0.0).is_ok());
}

#[test]
fn kinematic_update_marks_relations_stale() {
    let (mut sys, body) = lattice_system(3, 0.25, 0.3);
    let relation = sys.add_inner_relation(body).unwrap();

    let recolor = SimpleDynamics::new(body, |_i: usize, _dt: f64, p: &mut Particle| p.species[0] = 1.0);
    recolor.exec(&mut sys, 0.1).unwrap();
    assert!(sys.relation(relation).unwrap().is_current(&sys.bodies));

    let shift = SimpleDynamics::new(body, |_i: usize, dt: f64, p: &mut Particle| p.x.x += dt).kinematic();
    shift.exec(&mut sys, 0.01).unwrap();
    assert!(!sys.relation(relation).unwrap().is_current(&sys.bodies));
    assert!(sys.body(body).unwrap().particles.particles().iter().all(|p| p.species[0] == 1.0));
}

#[test]
fn interaction_writes_only_own_particle() {
    let n = 4;
    let (mut sys, body) = lattice_system(n, 1.0, 1.75);
    let relation = sys.add_inner_relation(body).unwrap();
    InteractionDynamics::new(relation, neighbor_count())
        .with_execution(ExecutionPolicy::Sequential)
        .exec(&mut sys, 0.0)
        .unwrap();

    let particles = sys.body(body).unwrap().particles.particles();
    assert_eq!(particles[lattice_index(n, 1, 1, 1)].p, 26.0);
    assert_eq!(particles[lattice_index(n, 0, 0, 0)].p, 7.0);
}

#[test]
fn interaction_with_update_and_one_level_dynamics() {
    let n = 4;
    let (mut sys, body) = lattice_system(n, 1.0, 1.75);
    let relation = sys.add_inner_relation(body).unwrap();

    InteractionWithUpdate::new(relation, neighbor_count(), |_i: usize, _dt: f64, p: &mut Particle| p.rho = 2.0 * p.p)
        .exec(&mut sys, 0.0)
        .unwrap();
    assert_eq!(sys.body(body).unwrap().particles.particles()[0].rho, 14.0);

    let one_level = Dynamics1Level::new(
        relation,
        |_i: usize, _dt: f64, p: &mut Particle| p.p = -1.0,
        neighbor_count(),
        |_i: usize, dt: f64, p: &mut Particle| p.x.z += dt * p.p,
    )
    .kinematic();
    one_level.exec(&mut sys, 1e-3).unwrap();

    let p0 = sys.body(body).unwrap().particles.particles()[0];
    assert_eq!(p0.p, 7.0);
    assert_relative_eq!(p0.x.z, 0.5 + 7e-3, epsilon = 1e-12);
    assert!(!sys.relation(relation).unwrap().is_current(&sys.bodies));
}

#[test]
fn reduce_is_policy_independent() {
    let (mut sys, body) = lattice_system(8, 0.1, 0.25);
    for (i, p) in sys.body_mut(body).unwrap().particles.particles_mut().iter_mut().enumerate() {
        let f = i as f64;
        p.v = NVec3::new((f * 0.37).sin(), (f * 0.13).cos(), (f * 0.71).sin());
    }
    let relation = sys.add_inner_relation(body).unwrap();

    let seq = ReduceDynamics::over_body(body, KineticEnergy)
        .with_execution(ExecutionPolicy::Sequential)
        .exec(&sys, 0.0)
        .unwrap();
    let par = ReduceDynamics::over_body(body, KineticEnergy).exec(&sys, 0.0).unwrap();
    assert_relative_eq!(seq, par, max_relative = 1e-12);

    let max_speed = ReduceFn::new(0.0, |i: usize, _dt: f64, ctx: &DispatchContext| ctx.particle(i).v.norm(), f64::max);
    let a = ReduceDynamics::over_relation(relation, max_speed).exec(&sys, 0.0).unwrap();
    let b = sys.body(body).unwrap().particles.particles().iter().map(|p| p.v.norm()).fold(0.0, f64::max);
    assert_eq!(a, b);

    let d_seq = ReduceDynamics::over_relation(relation, MinimumDistance)
        .with_execution(ExecutionPolicy::Sequential)
        .exec(&sys, 0.0)
        .unwrap();
    let d_par = ReduceDynamics::over_relation(relation, MinimumDistance).exec(&sys, 0.0).unwrap();
    assert_eq!(d_seq, d_par);
    assert_relative_eq!(d_seq, 0.1, epsilon = 1e-12);
}

#[test]
fn coincident_pair_gives_zero_minimum_distance() {
    let domain = BoundingBox::new(NVec3::zeros(), NVec3::new(1.0, 1.0, 0.0));
    let mut sys = System::new(domain, Dimension::Two);
    let points = [NVec3::new(0.4, 0.5, 0.0), NVec3::new(0.5, 0.5, 0.0), NVec3::new(0.5, 0.5, 0.0)];
    let body = add_points(&mut sys, "Pair", &points, 0.1, 0.25);
    let relation = sys.add_inner_relation(body).unwrap();

    let d = ReduceDynamics::over_relation(relation, MinimumDistance).exec(&sys, 0.0).unwrap();
    assert_eq!(d, 0.0);

    InteractionDynamics::new(relation, DensitySummation { rho0: 1.0, free_surface: false })
        .exec(&mut sys, 0.0)
        .unwrap();
    assert!(sys.body(body).unwrap().particles.particles().iter().all(|p| p.rho.is_finite()));
}

#[test]
fn minimum_distance_ignores_own_record() {
    let domain = BoundingBox::new(NVec3::zeros(), NVec3::new(1.0, 1.0, 0.0));
    let mut sys = System::new(domain, Dimension::Two);
    let body = add_points(&mut sys, "Pair", &[NVec3::new(0.4, 0.5, 0.0), NVec3::new(0.5, 0.5, 0.0)], 0.1, 0.25);
    let relation = sys
        .add_relation(Relation::Inner(
            InnerRelation::new(body).with_self_contribution(SelfContribution::Include),
        ))
        .unwrap();
    assert!(sys.relation(relation).unwrap().inner().unwrap().neighborhoods()[0].contains(0));

    let d = ReduceDynamics::over_relation(relation, MinimumDistance).exec(&sys, 0.0).unwrap();
    assert_relative_eq!(d, 0.1, max_relative = 1e-12);
}

#[test]
fn density_summation_self_term_counted_once() {
    let (mut sys, body) = lattice_system(5, 0.1, 0.26);
    let excluded = sys.add_inner_relation(body).unwrap();
    let included = sys
        .add_relation(Relation::Inner(
            InnerRelation::new(body).with_self_contribution(SelfContribution::Include),
        ))
        .unwrap();

    let model = || DensitySummation { rho0: 1.0, free_surface: false };
    InteractionDynamics::new(excluded, model()).exec(&mut sys, 0.0).unwrap();
    let rho_excluded: Vec<f64> = sys.body(body).unwrap().particles.particles().iter().map(|p| p.rho).collect();
    InteractionDynamics::new(included, model()).exec(&mut sys, 0.0).unwrap();
    let rho_included: Vec<f64> = sys.body(body).unwrap().particles.particles().iter().map(|p| p.rho).collect();

    for (a, b) in rho_excluded.iter().zip(&rho_included) {
        assert_relative_eq!(*a, *b, max_relative = 1e-12);
    }
}

// ==================================================================================
// Fluid model tests
// ==================================================================================

#[test]
fn acoustic_step_uses_sound_speed_plus_fastest_particle() {
    let (mut sys, body) = lattice_system(3, 0.25, 0.3);
    sys.body_mut(body).unwrap().particles.particles_mut()[5].v = NVec3::new(0.0, -2.0, 0.0);

    let model = AcousticTimeStep { cfl: 0.6, h: 0.1, c0: 10.0 };
    let dt = ReduceDynamics::over_body(body, model).exec(&sys, 0.0).unwrap();
    assert_relative_eq!(dt, 0.005, max_relative = 1e-12);
}

#[test]
fn continuity_rate_vanishes_for_rigid_translation() {
    let (mut sys, body) = lattice_system(4, 0.1, 0.25);
    let relation = sys.add_inner_relation(body).unwrap();
    for p in sys.body_mut(body).unwrap().particles.particles_mut() {
        p.v = NVec3::new(1.0, 0.5, -0.25);
        p.drho_dt = 7.0;
    }
    InteractionDynamics::new(relation, ContinuityRate).exec(&mut sys, 1e-3).unwrap();
    assert!(sys.body(body).unwrap().particles.particles().iter().all(|p| p.drho_dt == 0.0));

    // converging flow compresses every particle
    let center = NVec3::repeat(0.2);
    for p in sys.body_mut(body).unwrap().particles.particles_mut() {
        p.v = center - p.x;
    }
    InteractionDynamics::new(relation, ContinuityRate).exec(&mut sys, 1e-3).unwrap();
    assert!(sys.body(body).unwrap().particles.particles().iter().all(|p| p.drho_dt > 0.0));
}

#[test]
fn viscous_acceleration_opposes_relative_motion() {
    let domain = BoundingBox::new(NVec3::zeros(), NVec3::new(1.0, 1.0, 0.0));
    let mut sys = System::new(domain, Dimension::Two);
    let body = add_points(&mut sys, "Pair", &[NVec3::new(0.4, 0.5, 0.0), NVec3::new(0.5, 0.5, 0.0)], 0.1, 0.25);
    let relation = sys.add_inner_relation(body).unwrap();
    sys.body_mut(body).unwrap().particles.particles_mut()[0].v = NVec3::new(1.0, 0.0, 0.0);

    InteractionDynamics::new(relation, ViscousAcceleration { mu: 1.0e-3 }).exec(&mut sys, 1e-3).unwrap();
    let particles = sys.body(body).unwrap().particles.particles();
    assert!(particles[0].a.x < 0.0);
    assert!(particles[1].a.x > 0.0);
    assert_relative_eq!(particles[0].a.x, -particles[1].a.x, max_relative = 1e-12);
    assert_eq!(particles[0].a.y, 0.0);
}

// ==================================================================================
// Scenario tests
// ==================================================================================

const SMALL_TANK: &str = r#"
engine:
  dimension: 2d
  kernel: wendland_c2
  execution: sequential
  rebuild: { policy: displacement, fraction: 0.25 }
parameters:
  t_end: 2.0e-3
  spacing: 0.025
  cfl: 0.25
  max_dt: 5.0e-4
  output_interval: 2
  gravity: [0.0, -9.81]
  rho0: 1000.0
  sound_speed: 30.0
domain: { lower: [-0.1, -0.1], upper: [0.3, 0.3] }
bodies:
  - name: Water
    kind: fluid
    shape: { lower: [0.0, 0.0], upper: [0.1, 0.1] }
  - name: Wall
    kind: solid
    shape: { lower: [-0.05, -0.05], upper: [0.25, 0.25] }
    cavity: { lower: [0.0, 0.0], upper: [0.2, 0.2] }
relations:
  - kind: complex
    source: Water
    targets: [Wall]
"#;

#[test]
fn small_tank_scenario_runs() {
    let cfg = ScenarioConfig::from_yaml(SMALL_TANK).unwrap();
    let mut scenario = Scenario::build_scenario(cfg).unwrap();
    assert_eq!(scenario.system.body(BodyId(0)).unwrap().particles.len(), 16);
    assert_eq!(scenario.system.body(BodyId(1)).unwrap().particles.len(), 80);

    let summary = scenario.run().unwrap();
    assert!((4..=5).contains(&summary.steps));
    assert!(summary.t >= 2.0e-3 - 1e-12);
    assert!(summary.min_dt > 0.0 && summary.min_dt <= 5.0e-4);

    let water = scenario.system.body(BodyId(0)).unwrap().particles.particles();
    assert!(water.iter().all(|p| p.x.iter().all(|c| c.is_finite())));
    assert!(water.iter().all(|p| p.x.y > -0.05 && p.rho >= 1000.0));
}

#[test]
fn fluid_without_relation_is_rejected() {
    let text = SMALL_TANK.replace("relations:\n  - kind: complex\n    source: Water\n    targets: [Wall]\n", "");
    let cfg = ScenarioConfig::from_yaml(&text).unwrap();
    assert!(matches!(Scenario::build_scenario(cfg), Err(SimulationError::InvalidConfig(_))));
}

#[test]
fn acoustic_sub_steps_cover_each_advection_step() {
    let text = SMALL_TANK
        .replace("  t_end: 2.0e-3\n", "  t_end: 3.0e-3\n")
        .replace("  max_dt: 5.0e-4\n", "  acoustic_cfl: 0.6\n  max_dt: 1.0e-3\n  viscosity: 1.0e-3\n");
    let cfg = ScenarioConfig::from_yaml(&text).unwrap();
    let mut scenario = Scenario::build_scenario(cfg).unwrap();
    assert_eq!(scenario.parameters.acoustic_cfl, Some(0.6));

    let summary = scenario.run().unwrap();
    assert!(summary.t >= 3.0e-3 - 1e-12);
    assert!(summary.acoustic_steps > summary.steps);

    let water = scenario.system.body(BodyId(0)).unwrap().particles.particles();
    assert!(water.iter().all(|p| p.x.iter().all(|c| c.is_finite())));
    assert!(water.iter().all(|p| p.x.y > -0.05 && p.rho > 900.0));
    assert!(water.iter().all(|p| p.drift == NVec3::zeros()));
}

#[test]
fn single_pressure_update_without_acoustic_cfl() {
    let cfg = ScenarioConfig::from_yaml(SMALL_TANK).unwrap();
    let mut scenario = Scenario::build_scenario(cfg).unwrap();
    assert_eq!(scenario.run().unwrap().acoustic_steps, 0);
}

#[test]
fn invalid_fluid_parameters_are_rejected() {
    for (from, to) in [
        ("  max_dt: 5.0e-4\n", "  max_dt: 5.0e-4\n  acoustic_cfl: 0.0\n"),
        ("  max_dt: 5.0e-4\n", "  max_dt: 5.0e-4\n  viscosity: -1.0\n"),
    ] {
        let cfg = ScenarioConfig::from_yaml(&SMALL_TANK.replace(from, to)).unwrap();
        assert!(matches!(Scenario::build_scenario(cfg), Err(SimulationError::InvalidConfig(_))), "{to}");
    }
}

#[test]
fn diffusion_spreads_from_constrained_region() {
    let text = r#"
engine:
  dimension: 3d
  kernel: cubic_spline
parameters:
  t_end: 0.5
  spacing: 0.1
  cfl: 0.25
  max_dt: 0.05
  diffusivity: 1.0e-3
domain: { lower: [0, 0, 0], upper: [1, 1, 1] }
bodies:
  - name: Block
    kind: diffusion
    shape: { lower: [0, 0, 0], upper: [1, 1, 1] }
    species: [Phi]
    constraints:
      - species: Phi
        value: 1.0
        region: { lower: [0, 0, 0], upper: [0.2, 1, 1] }
relations:
  - kind: inner
    body: Block
"#;
    let cfg = ScenarioConfig::from_yaml(text).unwrap();
    let mut scenario = Scenario::build_scenario(cfg).unwrap();
    scenario.run().unwrap();

    let block = scenario.system.body(BodyId(0)).unwrap();
    assert_eq!(block.particles.species_index("Phi"), Some(0));
    let particles = block.particles.particles();
    assert_eq!(particles.len(), 1000);
    for p in particles {
        assert!((0.0..=1.0).contains(&p.species[0]));
        if p.x.x < 0.2 {
            assert_eq!(p.species[0], 1.0);
        }
        if p.x.x > 0.9 {
            assert!(p.species[0] < 1e-3);
        }
    }
    assert!(particles.iter().any(|p| p.x.x > 0.2 && p.x.x < 0.3 && p.species[0] > 0.0));
}
