//! Time stepping for the particle system
//!
//! One step is strictly ordered:
//! 1. configuration update (cell-linked lists, then relations)
//! 2. step size from the advection reduction, capped by `max_dt`, the diffusion limit and `t_end`
//! 3. fluid forces (gravity reset, density summation with the EOS, viscous acceleration)
//! 4. species diffusion, then the species constraints
//! 5. pressure and motion of every fluid, which moves particles and leaves their relations
//!    stale until the next configuration update
//!
//! Step 5 is either one pressure acceleration and kick/drift over the whole step, or,
//! with an acoustic CFL number, a loop of pressure/density relaxation sub-steps of
//! acoustic size that together cover the step. Sub-steps accumulate the displacement
//! and the particles move once at the end, so the neighbor tables of the step stay valid.

use crate::error::{Result, SimulationError};
use crate::simulation::dynamics::{
    Dynamics1Level, InteractionDynamics, InteractionWithUpdate, ReduceDynamics, SimpleDynamics,
};
use crate::simulation::engine::ExecutionPolicy;
use crate::simulation::models::{
    AcousticTimeStep, AdvectionTimeStep, ApplyDrift, ContinuityRate, DensityHalfStep, DensitySummation,
    DriftAccumulation, GravityInitialization, KickDrift, KineticEnergy, LinearEos, PressureAcceleration,
    PressureRelaxation, PressureRelaxationInit, SpeciesConstraint, SpeciesDiffusion, ViscousAcceleration,
};
use crate::simulation::params::Parameters;
use crate::simulation::states::{BodyId, RelationId, System};
use crate::simulation::updater::{ConfigurationReport, ConfigurationUpdater};

/// Pressure/density relaxation of one fluid in acoustic sub-steps
struct AcousticSteps {
    pressure: Dynamics1Level<PressureRelaxationInit, PressureRelaxation, DriftAccumulation>,
    density: InteractionWithUpdate<ContinuityRate, DensityHalfStep>,
    time_step: ReduceDynamics<AcousticTimeStep>,
    drift: SimpleDynamics<ApplyDrift>,
}

impl AcousticSteps {
    fn with_execution(self, execution: ExecutionPolicy) -> Self {
        Self {
            pressure: self.pressure.with_execution(execution),
            density: self.density.with_execution(execution),
            time_step: self.time_step.with_execution(execution),
            drift: self.drift.with_execution(execution),
        }
    }
}

/// Dispatch objects advancing one weakly compressible fluid body
pub struct FluidSteps {
    body: BodyId,
    gravity: SimpleDynamics<GravityInitialization>,
    density: InteractionWithUpdate<DensitySummation, LinearEos>,
    viscous: Option<InteractionDynamics<ViscousAcceleration>>,
    pressure: InteractionDynamics<PressureAcceleration>,
    kick_drift: SimpleDynamics<KickDrift>,
    acoustic: Option<AcousticSteps>,
    time_step: ReduceDynamics<AdvectionTimeStep>,
}

impl FluidSteps {
    /// `relation` must be an inner or complex relation with `body` as source
    pub fn new(body: BodyId, relation: RelationId, h: f64, params: &Parameters) -> Self {
        let eos = LinearEos { rho0: params.rho0, c0: params.sound_speed };
        let acoustic = params.acoustic_cfl.map(|cfl| AcousticSteps {
            pressure: Dynamics1Level::new(
                relation,
                PressureRelaxationInit { eos: LinearEos { rho0: params.rho0, c0: params.sound_speed } },
                PressureRelaxation,
                DriftAccumulation,
            ),
            density: InteractionWithUpdate::new(relation, ContinuityRate, DensityHalfStep),
            time_step: ReduceDynamics::over_body(body, AcousticTimeStep { cfl, h, c0: params.sound_speed }),
            drift: SimpleDynamics::new(body, ApplyDrift).kinematic(),
        });
        Self {
            body,
            gravity: SimpleDynamics::new(body, GravityInitialization { g: params.gravity }),
            density: InteractionWithUpdate::new(relation, DensitySummation { rho0: params.rho0, free_surface: true }, eos),
            viscous: (params.viscosity > 0.0)
                .then(|| InteractionDynamics::new(relation, ViscousAcceleration { mu: params.viscosity })),
            pressure: InteractionDynamics::new(relation, PressureAcceleration),
            kick_drift: SimpleDynamics::new(body, KickDrift).kinematic(),
            acoustic,
            // c0 is chosen as ten times the expected flow speed
            time_step: ReduceDynamics::over_body(
                body,
                AdvectionTimeStep { cfl: params.cfl, h, u_ref: 0.1 * params.sound_speed },
            ),
        }
    }

    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn with_execution(self, execution: ExecutionPolicy) -> Self {
        Self {
            body: self.body,
            gravity: self.gravity.with_execution(execution),
            density: self.density.with_execution(execution),
            viscous: self.viscous.map(|v| v.with_execution(execution)),
            pressure: self.pressure.with_execution(execution),
            kick_drift: self.kick_drift.with_execution(execution),
            acoustic: self.acoustic.map(|a| a.with_execution(execution)),
            time_step: self.time_step.with_execution(execution),
        }
    }
}

/// Per-step outcome
#[derive(Debug, Clone)]
pub struct StepReport {
    pub dt: f64,
    pub acoustic_steps: usize, // pressure/density sub-steps, 0 without an acoustic CFL number
    pub configuration: ConfigurationReport,
}

/// Outcome of a complete run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub steps: usize,
    pub t: f64,
    pub min_dt: f64,
    pub acoustic_steps: usize,
    pub unstable_steps: usize, // steps whose configuration update reported instabilities
}

pub struct Integrator {
    updater: ConfigurationUpdater,
    fluids: Vec<FluidSteps>,
    diffusion: Vec<InteractionDynamics<SpeciesDiffusion>>,
    constraints: Vec<SimpleDynamics<SpeciesConstraint>>,
    diffusion_dt: f64, // explicit diffusion stability limit, infinite without diffusion
    execution: ExecutionPolicy, // applied to dispatch objects added afterwards
}

impl Integrator {
    pub fn new(updater: ConfigurationUpdater) -> Self {
        Self {
            updater,
            fluids: Vec::new(),
            diffusion: Vec::new(),
            constraints: Vec::new(),
            diffusion_dt: f64::INFINITY,
            execution: ExecutionPolicy::Parallel,
        }
    }

    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_fluid(mut self, fluid: FluidSteps) -> Self {
        self.fluids.push(fluid.with_execution(self.execution));
        self
    }

    /// Diffuse `slot` over the inner relation `relation` with smoothing length `h`
    pub fn with_diffusion(mut self, relation: RelationId, slot: usize, diffusivity: f64, h: f64) -> Self {
        if diffusivity > 0.0 {
            self.diffusion_dt = self.diffusion_dt.min(0.5 * h * h / diffusivity);
        }
        self.diffusion.push(
            InteractionDynamics::new(relation, SpeciesDiffusion { slot, diffusivity }).with_execution(self.execution),
        );
        self
    }

    pub fn with_constraint(mut self, body: BodyId, constraint: SpeciesConstraint) -> Self {
        self.constraints.push(SimpleDynamics::new(body, constraint).with_execution(self.execution));
        self
    }

    pub fn updater(&self) -> &ConfigurationUpdater {
        &self.updater
    }

    /// Step size for the current state
    pub fn time_step(&self, sys: &System, params: &Parameters) -> Result<f64> {
        let mut dt = params.max_dt.min(self.diffusion_dt);
        for fluid in &self.fluids {
            dt = dt.min(fluid.time_step.exec(sys, 0.0)?);
        }
        let remaining = params.t_end - sys.t;
        if remaining > 0.0 {
            dt = dt.min(remaining);
        }
        Ok(dt)
    }

    /// Advance the system by one step
    pub fn step(&mut self, sys: &mut System, params: &Parameters) -> Result<StepReport> {
        let configuration = self.updater.update(sys)?;
        let dt = self.time_step(sys, params)?;
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(SimulationError::InvalidConfig(format!("time step {dt} at t = {}", sys.t)));
        }

        for fluid in &self.fluids {
            fluid.gravity.exec(sys, dt)?;
            fluid.density.exec(sys, dt)?;
        }
        for fluid in &self.fluids {
            if let Some(viscous) = &fluid.viscous {
                viscous.exec(sys, dt)?;
            }
        }
        for diffusion in &self.diffusion {
            diffusion.exec(sys, dt)?;
        }
        for constraint in &self.constraints {
            constraint.exec(sys, dt)?;
        }

        for fluid in self.fluids.iter().filter(|f| f.acoustic.is_none()) {
            fluid.pressure.exec(sys, dt)?;
        }
        for fluid in self.fluids.iter().filter(|f| f.acoustic.is_none()) {
            fluid.kick_drift.exec(sys, dt)?;
        }
        let acoustic_steps = self.relax(sys, dt)?;

        sys.t += dt;
        Ok(StepReport { dt, acoustic_steps, configuration })
    }

    /// Acoustic sub-steps of every fluid that has them, covering exactly `dt`
    fn relax(&self, sys: &mut System, dt: f64) -> Result<usize> {
        let acoustic: Vec<&AcousticSteps> = self.fluids.iter().filter_map(|f| f.acoustic.as_ref()).collect();
        if acoustic.is_empty() {
            return Ok(0);
        }

        let mut steps = 0;
        let mut relaxation_time = 0.0;
        while relaxation_time < dt {
            let remaining = dt - relaxation_time;
            let mut sub_dt = remaining;
            for a in &acoustic {
                sub_dt = sub_dt.min(a.time_step.exec(sys, 0.0)?);
            }
            if !(sub_dt > 0.0 && sub_dt.is_finite()) {
                return Err(SimulationError::InvalidConfig(format!("acoustic time step {sub_dt} at t = {}", sys.t)));
            }
            for a in &acoustic {
                a.pressure.exec(sys, sub_dt)?;
            }
            for a in &acoustic {
                a.density.exec(sys, sub_dt)?;
            }
            relaxation_time = if sub_dt < remaining { relaxation_time + sub_dt } else { dt };
            steps += 1;
        }
        for a in &acoustic {
            a.drift.exec(sys, dt)?;
        }
        log::trace!("{steps} acoustic sub-steps for dt = {dt:.3e}");
        Ok(steps)
    }

    /// Step until `params.t_end`, logging a body summary every `output_interval` steps
    pub fn run(&mut self, sys: &mut System, params: &Parameters) -> Result<RunSummary> {
        let initial = self.updater.initialize(sys)?;
        if initial.clamped > 0 {
            log::warn!("{} particles start outside the domain", initial.clamped);
        }
        log::info!(
            "running {} bodies, {} particles, {} relations to t = {}",
            sys.bodies.len(),
            sys.total_particles(),
            sys.relations.len(),
            params.t_end
        );

        let mut summary = RunSummary { min_dt: f64::INFINITY, ..Default::default() };
        let output_interval = params.output_interval.max(1);
        while sys.t < params.t_end {
            let report = self.step(sys, params)?;
            summary.steps += 1;
            summary.min_dt = summary.min_dt.min(report.dt);
            summary.acoustic_steps += report.acoustic_steps;
            if !report.configuration.is_stable() {
                summary.unstable_steps += 1;
            }
            if summary.steps % output_interval == 0 {
                log::info!("step {:6}  t = {:.6}  dt = {:.3e}", summary.steps, sys.t, report.dt);
                self.log_bodies(sys)?;
            }
        }
        summary.t = sys.t;
        log::info!("finished after {} steps at t = {:.6}", summary.steps, summary.t);
        Ok(summary)
    }

    fn log_bodies(&self, sys: &System) -> Result<()> {
        for fluid in &self.fluids {
            let ke = ReduceDynamics::over_body(fluid.body, KineticEnergy).exec(sys, 0.0)?;
            let body = sys.body(fluid.body)?;
            log::info!("  {:<12} kinetic energy = {:.6e}", body.name, ke);
        }
        for body in &sys.bodies {
            let particles = body.particles.particles();
            if particles.is_empty() {
                continue;
            }
            for (slot, name) in body.particles.species_names().iter().enumerate() {
                let mean = particles.iter().map(|p| p.species[slot]).sum::<f64>() / particles.len() as f64;
                log::info!("  {:<12} mean {} = {:.6}", body.name, name, mean);
            }
        }
        Ok(())
    }
}
