use std::time::Instant;

use crate::error::Result;
use crate::simulation::dynamics::{InteractionDynamics, ReduceDynamics};
use crate::simulation::engine::ExecutionPolicy;
use crate::simulation::geometry::BoundingBox;
use crate::simulation::kernel::{Kernel, KernelKind};
use crate::simulation::models::{DensitySummation, MinimumDistance};
use crate::simulation::relation::{InnerRelation, Relation};
use crate::simulation::states::{BodyId, BodyKind, Dimension, NVec3, Particle, ParticleSet, RelationId, System};

/// Helper to build a system with one body of `n` scattered particles in the unit cube.
/// The cutoff shrinks with n so every particle keeps roughly the same number of neighbors.
fn make_system(n: usize) -> Result<(System, f64)> {
    let spacing = (n as f64).cbrt().recip();
    let mut particles = Vec::with_capacity(n);

    for i in 0..n {
        let i_f = i as f64;
        // deterministic positions, no rand needed
        let x = NVec3::new(
            0.5 + 0.5 * (i_f * 0.37).sin(),
            0.5 + 0.5 * (i_f * 0.13).cos(),
            0.5 + 0.5 * (i_f * 0.07).sin(),
        );
        particles.push(Particle::new(x, spacing.powi(3), 1.0));
    }

    let domain = BoundingBox::new(NVec3::zeros(), NVec3::repeat(1.0));
    let mut sys = System::new(domain, Dimension::Three);
    let kernel = Kernel::new(KernelKind::WendlandC2, 1.3 * spacing, Dimension::Three);
    sys.add_body("Cloud", BodyKind::Fluid, spacing, kernel, ParticleSet::new(particles))?;
    Ok((sys, kernel.cutoff_radius()))
}

/// O(N^2) reference neighbor count
fn brute_force_pairs(positions: &[NVec3], cutoff: f64) -> usize {
    let mut pairs = 0;
    for i in 0..positions.len() {
        for j in 0..positions.len() {
            if i != j && (positions[i] - positions[j]).norm() <= cutoff {
                pairs += 1;
            }
        }
    }
    pairs
}

/// Cell-linked list neighbor search vs brute force over increasing N
pub fn bench_neighbor_search() -> Result<()> {
    // Different system sizes to test
    let ns = [1000, 2000, 4000, 8000, 16000, 32000];

    for n in ns {
        let (mut sys, cutoff) = make_system(n)?;
        let positions = sys.bodies[0].particles.positions();

        // Warm up
        let mut relation = Relation::Inner(InnerRelation::new(BodyId(0)));
        relation.update(&sys.bodies, ExecutionPolicy::Sequential)?;

        // Time grid rebuild + sequential relation update
        let t0 = Instant::now();
        sys.bodies[0].rebuild_cell_linked_list();
        relation.update(&sys.bodies, ExecutionPolicy::Sequential)?;
        let dt_seq = t0.elapsed().as_secs_f64();

        // Time parallel relation update
        let t1 = Instant::now();
        relation.update(&sys.bodies, ExecutionPolicy::Parallel)?;
        let dt_par = t1.elapsed().as_secs_f64();

        let found: usize = relation.inner().map_or(0, |r| r.neighborhoods().iter().map(|nb| nb.len()).sum());

        // Brute force gets slow fast, stop past 8000
        if n <= 8000 {
            let t2 = Instant::now();
            let expected = brute_force_pairs(&positions, cutoff);
            let dt_brute = t2.elapsed().as_secs_f64();
            println!(
                "N = {n:6}, cell list = {:8.6} s, parallel = {:8.6} s, brute force = {:8.6} s, pairs {found}/{expected}",
                dt_seq, dt_par, dt_brute
            );
        } else {
            println!("N = {n:6}, cell list = {:8.6} s, parallel = {:8.6} s, pairs {found}", dt_seq, dt_par);
        }
    }
    Ok(())
}

/// Sequential vs parallel dispatch of an interaction and a reduce
pub fn bench_dispatch() -> Result<()> {
    let ns = [4000, 16000, 64000];
    let steps = 5;

    for n in ns {
        let (mut sys, _) = make_system(n)?;
        let relation: RelationId = sys.add_inner_relation(BodyId(0))?;

        let mut times = Vec::new();
        for execution in [ExecutionPolicy::Sequential, ExecutionPolicy::Parallel] {
            let density = InteractionDynamics::new(relation, DensitySummation { rho0: 1.0, free_surface: false })
                .with_execution(execution);
            let min_distance = ReduceDynamics::over_relation(relation, MinimumDistance).with_execution(execution);

            // Warm up
            density.exec(&mut sys, 0.0)?;

            let t0 = Instant::now();
            let mut d_min = f64::INFINITY;
            for _ in 0..steps {
                density.exec(&mut sys, 0.0)?;
                d_min = min_distance.exec(&sys, 0.0)?;
            }
            times.push((t0.elapsed().as_secs_f64() / steps as f64, d_min));
        }

        println!(
            "N = {n:6}, sequential = {:8.6} s, parallel = {:8.6} s, min distance {:.3e}",
            times[0].0, times[1].0, times[1].1
        );
    }
    Ok(())
}
