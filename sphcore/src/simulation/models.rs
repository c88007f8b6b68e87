//! Physical modules driven through the dynamics dispatch
//!
//! Each model implements one of `LocalUpdate`, `LocalInteraction` or
//! `LocalReduce` and only sees particles through a `DispatchContext`.
//! Weakly compressible fluid (with optional acoustic sub-steps), species
//! diffusion, and the time-step reductions used by the run loop.

use crate::simulation::dynamics::{DispatchContext, LocalInteraction, LocalReduce, LocalUpdate};
use crate::simulation::geometry::Shape;
use crate::simulation::kernel::COINCIDENT_DISTANCE;
use crate::simulation::relation::SelfContribution;
use crate::simulation::states::{BodyKind, NVec3, Particle};

/// Reset acceleration to the body force. Runs first in a step, before
/// interactions accumulate into `a`.
pub struct GravityInitialization {
    pub g: NVec3, // gravitational acceleration
}

impl LocalUpdate for GravityInitialization {
    fn update(&self, _i: usize, _dt: f64, p: &mut Particle) {
        p.a = self.g;
    }
}

/// rho_i = sum_j m_j W_ij over inner and contact neighbors plus the self term m_i W(0)
pub struct DensitySummation {
    pub rho0: f64,          // reference density
    pub free_surface: bool, // never drop below rho0 (particles near a free surface miss neighbors)
}

impl LocalInteraction for DensitySummation {
    type Value = f64;

    fn interaction(&self, i: usize, _dt: f64, ctx: &DispatchContext) -> f64 {
        let particles = ctx.particles();
        let pi = &particles[i];

        // the self term is added here unless the inner relation already lists i
        let self_listed = ctx
            .relation()
            .and_then(|r| r.inner())
            .is_some_and(|r| r.self_contribution() == SelfContribution::Include);
        let mut rho = if self_listed { 0.0 } else { pi.m * ctx.body().kernel.w0() };

        for nb in ctx.inner(i) {
            rho += particles[nb.j].m * nb.weight;
        }
        for (body, neighborhood) in ctx.contacts(i) {
            let others = body.particles.particles();
            for nb in neighborhood {
                rho += others[nb.j].m * nb.weight;
            }
        }
        rho
    }

    fn commit(&self, _i: usize, _dt: f64, rho: f64, p: &mut Particle) {
        p.rho = if self.free_surface { rho.max(self.rho0) } else { rho };
        p.drho_dt = 0.0;
    }
}

/// Weakly compressible linear equation of state, p = c0^2 (rho - rho0)
pub struct LinearEos {
    pub rho0: f64, // reference density
    pub c0: f64,   // artificial sound speed
}

impl LocalUpdate for LinearEos {
    fn update(&self, _i: usize, _dt: f64, p: &mut Particle) {
        p.p = self.c0 * self.c0 * (p.rho - self.rho0);
    }
}

/// a_i += -sum_j m_j (p_i / rho_i^2 + p_j / rho_j^2) grad_i W_ij
///
/// Solid contact neighbors mirror the fluid particle's pressure and density.
pub struct PressureAcceleration;

impl LocalInteraction for PressureAcceleration {
    type Value = NVec3;

    fn interaction(&self, i: usize, _dt: f64, ctx: &DispatchContext) -> NVec3 {
        let particles = ctx.particles();
        let pi = &particles[i];
        let own = pi.p / (pi.rho * pi.rho);

        let mut acc = NVec3::zeros();
        for nb in ctx.inner(i) {
            let pj = &particles[nb.j];
            acc -= nb.gradient * (pj.m * (own + pj.p / (pj.rho * pj.rho)));
        }
        for (body, neighborhood) in ctx.contacts(i) {
            let others = body.particles.particles();
            for nb in neighborhood {
                let pj = &others[nb.j];
                let theirs = match body.kind {
                    BodyKind::Solid => own,
                    _ => pj.p / (pj.rho * pj.rho),
                };
                acc -= nb.gradient * (pj.m * (own + theirs));
            }
        }
        acc
    }

    fn commit(&self, _i: usize, _dt: f64, acc: NVec3, p: &mut Particle) {
        p.a += acc;
    }
}

/// a_i += sum_j 2 mu m_j / (rho_i rho_j) (v_i - v_j) (dW/dr) / r_ij
///
/// Solid contact neighbors are at rest (no slip).
pub struct ViscousAcceleration {
    pub mu: f64, // dynamic viscosity
}

impl LocalInteraction for ViscousAcceleration {
    type Value = NVec3;

    fn interaction(&self, i: usize, _dt: f64, ctx: &DispatchContext) -> NVec3 {
        let particles = ctx.particles();
        let pi = &particles[i];

        let mut acc = NVec3::zeros();
        for nb in ctx.inner(i) {
            if nb.distance < COINCIDENT_DISTANCE {
                continue;
            }
            let pj = &particles[nb.j];
            acc += (pi.v - pj.v) * (2.0 * self.mu * pj.m / (pi.rho * pj.rho) * nb.dw_dr / nb.distance);
        }
        for (body, neighborhood) in ctx.contacts(i) {
            let others = body.particles.particles();
            for nb in neighborhood {
                if nb.distance < COINCIDENT_DISTANCE {
                    continue;
                }
                let pj = &others[nb.j];
                let vj = match body.kind {
                    BodyKind::Solid => NVec3::zeros(),
                    _ => pj.v,
                };
                acc += (pi.v - vj) * (2.0 * self.mu * pj.m / (pi.rho * pj.rho) * nb.dw_dr / nb.distance);
            }
        }
        acc
    }

    fn commit(&self, _i: usize, _dt: f64, acc: NVec3, p: &mut Particle) {
        p.a += acc;
    }
}

/// Symplectic Euler: v += a dt, then x += v dt. Moves particles.
pub struct KickDrift;

impl LocalUpdate for KickDrift {
    fn update(&self, _i: usize, dt: f64, p: &mut Particle) {
        p.v += p.a * dt;
        p.x += p.v * dt;
    }
}

// acoustic sub-steps =================================================================
//
// Within one advection step the neighbor tables stay fixed, so the sub-steps
// integrate velocity and density only and collect the displacement in `drift`.
// `ApplyDrift` moves the particles once the sub-steps cover the advection step.

/// First stage of the pressure relaxation: half density step, then the EOS
pub struct PressureRelaxationInit {
    pub eos: LinearEos,
}

impl LocalUpdate for PressureRelaxationInit {
    fn update(&self, i: usize, dt: f64, p: &mut Particle) {
        p.rho += 0.5 * dt * p.drho_dt;
        self.eos.update(i, dt, p);
    }
}

/// Pressure acceleration committed as a velocity kick on top of the
/// step's prior acceleration (gravity, viscosity) held in `a`
pub struct PressureRelaxation;

impl LocalInteraction for PressureRelaxation {
    type Value = NVec3;

    fn interaction(&self, i: usize, dt: f64, ctx: &DispatchContext) -> NVec3 {
        PressureAcceleration.interaction(i, dt, ctx)
    }

    fn commit(&self, _i: usize, dt: f64, acc: NVec3, p: &mut Particle) {
        p.v += (acc + p.a) * dt;
    }
}

/// drift += v dt
pub struct DriftAccumulation;

impl LocalUpdate for DriftAccumulation {
    fn update(&self, _i: usize, dt: f64, p: &mut Particle) {
        p.drift += p.v * dt;
    }
}

/// Continuity equation, drho_i/dt = sum_j m_j (v_i - v_j) . grad_i W_ij.
/// Solid contact neighbors are at rest.
pub struct ContinuityRate;

impl LocalInteraction for ContinuityRate {
    type Value = f64;

    fn interaction(&self, i: usize, _dt: f64, ctx: &DispatchContext) -> f64 {
        let particles = ctx.particles();
        let vi = particles[i].v;

        let mut rate = 0.0;
        for nb in ctx.inner(i) {
            let pj = &particles[nb.j];
            rate += pj.m * (vi - pj.v).dot(&nb.gradient);
        }
        for (body, neighborhood) in ctx.contacts(i) {
            let others = body.particles.particles();
            for nb in neighborhood {
                let pj = &others[nb.j];
                let vj = match body.kind {
                    BodyKind::Solid => NVec3::zeros(),
                    _ => pj.v,
                };
                rate += pj.m * (vi - vj).dot(&nb.gradient);
            }
        }
        rate
    }

    fn commit(&self, _i: usize, _dt: f64, rate: f64, p: &mut Particle) {
        p.drho_dt = rate;
    }
}

/// rho += drho_dt dt / 2
pub struct DensityHalfStep;

impl LocalUpdate for DensityHalfStep {
    fn update(&self, _i: usize, dt: f64, p: &mut Particle) {
        p.rho += 0.5 * dt * p.drho_dt;
    }
}

/// x += drift, then clear it. Moves particles.
pub struct ApplyDrift;

impl LocalUpdate for ApplyDrift {
    fn update(&self, _i: usize, _dt: f64, p: &mut Particle) {
        p.x += p.drift;
        p.drift = NVec3::zeros();
    }
}

/// Isotropic diffusion of one species slot over an inner relation,
/// d(phi_i)/dt = sum_j 2 D V_j (phi_i - phi_j) (dW/dr) / r_ij
pub struct SpeciesDiffusion {
    pub slot: usize,        // species slot on the particles
    pub diffusivity: f64,   // D
}

impl LocalInteraction for SpeciesDiffusion {
    type Value = f64;

    fn interaction(&self, i: usize, _dt: f64, ctx: &DispatchContext) -> f64 {
        let particles = ctx.particles();
        let phi_i = particles[i].species[self.slot];

        let mut rate = 0.0;
        for nb in ctx.inner(i) {
            if nb.distance < COINCIDENT_DISTANCE {
                continue;
            }
            let pj = &particles[nb.j];
            rate += 2.0 * self.diffusivity * pj.vol * (phi_i - pj.species[self.slot]) * nb.dw_dr / nb.distance;
        }
        rate
    }

    fn commit(&self, _i: usize, dt: f64, rate: f64, p: &mut Particle) {
        p.species[self.slot] += rate * dt;
    }
}

/// Fix a species value inside a shape, optionally scaled by how much the
/// outward normal of the nearest surface faces `direction`.
pub struct SpeciesConstraint {
    pub slot: usize,
    pub value: f64,
    pub shape: Box<dyn Shape>,
    pub direction: Option<NVec3>, // unit vector; None applies `value` uniformly
}

impl LocalUpdate for SpeciesConstraint {
    fn update(&self, _i: usize, _dt: f64, p: &mut Particle) {
        let (distance, normal) = self.shape.signed_distance_and_normal(&p.x);
        if distance > 0.0 {
            return;
        }
        p.species[self.slot] = match self.direction {
            Some(d) => self.value * normal.dot(&d).max(0.0),
            None => self.value,
        };
    }
}

/// Advective time step, dt = cfl h / max(|v|_max, u_ref). Folds |v|^2 and
/// converts in `finish`.
pub struct AdvectionTimeStep {
    pub cfl: f64,
    pub h: f64,     // smoothing length
    pub u_ref: f64, // reference speed, keeps dt finite for a fluid at rest
}

impl LocalReduce for AdvectionTimeStep {
    type Value = f64;

    fn identity(&self) -> f64 {
        0.0
    }

    fn reduce(&self, a: f64, b: f64) -> f64 {
        a.max(b)
    }

    fn local(&self, i: usize, _dt: f64, ctx: &DispatchContext) -> f64 {
        ctx.particle(i).v.norm_squared()
    }

    fn finish(&self, v2_max: f64) -> f64 {
        self.cfl * self.h / v2_max.sqrt().max(self.u_ref)
    }
}

/// Acoustic time step, dt = cfl h / (c0 + |v|_max)
pub struct AcousticTimeStep {
    pub cfl: f64,
    pub h: f64,  // smoothing length
    pub c0: f64, // artificial sound speed
}

impl LocalReduce for AcousticTimeStep {
    type Value = f64;

    fn identity(&self) -> f64 {
        0.0
    }

    fn reduce(&self, a: f64, b: f64) -> f64 {
        a.max(b)
    }

    fn local(&self, i: usize, _dt: f64, ctx: &DispatchContext) -> f64 {
        ctx.particle(i).v.norm_squared()
    }

    fn finish(&self, v2_max: f64) -> f64 {
        self.cfl * self.h / (self.c0 + v2_max.sqrt())
    }
}

/// Smallest pairwise distance over the inner and contact lists of a relation.
/// A particle's own record (self-inclusive inner relations) is not a pair.
pub struct MinimumDistance;

impl LocalReduce for MinimumDistance {
    type Value = f64;

    fn identity(&self) -> f64 {
        f64::INFINITY
    }

    fn reduce(&self, a: f64, b: f64) -> f64 {
        a.min(b)
    }

    fn local(&self, i: usize, _dt: f64, ctx: &DispatchContext) -> f64 {
        let inner = ctx.inner(i).iter().filter(|nb| nb.j != i).map(|nb| nb.distance);
        let contact = ctx.contacts(i).flat_map(|(_, n)| n.iter().map(|nb| nb.distance));
        inner.chain(contact).fold(f64::INFINITY, f64::min)
    }
}

/// Total kinetic energy 1/2 sum m |v|^2
pub struct KineticEnergy;

impl LocalReduce for KineticEnergy {
    type Value = f64;

    fn identity(&self) -> f64 {
        0.0
    }

    fn reduce(&self, a: f64, b: f64) -> f64 {
        a + b
    }

    fn local(&self, i: usize, _dt: f64, ctx: &DispatchContext) -> f64 {
        let p = ctx.particle(i);
        0.5 * p.m * p.v.norm_squared()
    }
}
