//! Build fully-initialized simulation scenarios from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces a runtime `Scenario`
//! containing:
//! - engine settings (`Engine`)
//! - numerical parameters (`Parameters`)
//! - system state (`System` with lattice-generated bodies and registered relations at t = 0)
//! - the `Integrator` holding the dispatch objects of every body

use crate::configuration::config::{vec3, BodyConfig, RelationConfig, ScenarioConfig};
use crate::error::{Result, SimulationError};
use crate::simulation::engine::Engine;
use crate::simulation::geometry::{lattice_particles, BoxShell, Shape};
use crate::simulation::integrator::{FluidSteps, Integrator, RunSummary};
use crate::simulation::kernel::{Kernel, KernelKind};
use crate::simulation::models::SpeciesConstraint;
use crate::simulation::params::Parameters;
use crate::simulation::relation::{InnerRelation, Relation, SelfContribution};
use crate::simulation::states::{BodyId, BodyKind, NVec3, ParticleSet, RelationId, System};
use crate::simulation::updater::{ConfigurationUpdater, RebuildPolicy};

/// Runtime bundle constructed from a [`ScenarioConfig`]
pub struct Scenario {
    pub engine: Engine,
    pub parameters: Parameters,
    pub system: System,
    pub integrator: Integrator,
}

impl Scenario {
    pub fn build_scenario(cfg: ScenarioConfig) -> Result<Self> {
        // Engine (runtime) from EngineConfig
        let e_cfg = cfg.engine;
        let engine = Engine {
            dimension: e_cfg.dimension,
            kernel: e_cfg.kernel.unwrap_or(KernelKind::WendlandC2),
            execution: e_cfg.execution.unwrap_or_default(),
            rebuild: e_cfg.rebuild.unwrap_or_default(),
            tolerance: e_cfg.tolerance.unwrap_or(0.0),
            max_particles_per_cell: e_cfg.max_particles_per_cell.unwrap_or(usize::MAX),
            max_neighbors: e_cfg.max_neighbors.unwrap_or(usize::MAX),
        };
        match engine.rebuild {
            RebuildPolicy::Interval { steps: 0 } => {
                return Err(SimulationError::InvalidConfig("rebuild interval must be at least 1 step".into()));
            }
            RebuildPolicy::Displacement { fraction } if !(fraction > 0.0 && fraction.is_finite()) => {
                return Err(SimulationError::InvalidConfig(format!(
                    "rebuild displacement fraction must be positive, got {fraction}"
                )));
            }
            _ => {}
        }

        // Parameters (runtime) from ParametersConfig
        let p_cfg = cfg.parameters;
        let parameters = Parameters {
            t_end: p_cfg.t_end,
            spacing: p_cfg.spacing,
            smoothing_length_ratio: p_cfg.smoothing_length_ratio.unwrap_or(1.3),
            cfl: p_cfg.cfl,
            acoustic_cfl: p_cfg.acoustic_cfl,
            max_dt: p_cfg.max_dt,
            output_interval: p_cfg.output_interval.unwrap_or(100),
            gravity: match &p_cfg.gravity {
                Some(g) => vec3(g, "gravity")?,
                None => NVec3::zeros(),
            },
            rho0: p_cfg.rho0.unwrap_or(1.0),
            sound_speed: p_cfg.sound_speed.unwrap_or(10.0),
            viscosity: p_cfg.viscosity.unwrap_or(0.0),
            diffusivity: p_cfg.diffusivity.unwrap_or(0.0),
        };
        validate_parameters(&parameters)?;

        // System: bodies on lattices, then relations in file order
        let domain = cfg.domain.to_box("domain")?;
        let mut system = System::new(domain, engine.dimension);
        for bc in &cfg.bodies {
            add_body(&mut system, bc, &engine, &parameters)?;
        }
        for rc in &cfg.relations {
            add_relation(&mut system, rc)?;
        }

        // Integrator: one set of dispatch objects per body according to its kind
        let updater = ConfigurationUpdater::from_engine(&engine);
        let mut integrator = Integrator::new(updater).with_execution(engine.execution);
        for (k, bc) in cfg.bodies.iter().enumerate() {
            let id = BodyId(k);
            let h = system.body(id)?.kernel.smoothing_length();
            match bc.kind {
                BodyKind::Fluid => {
                    let relation = relation_with_inner(&system, id).ok_or_else(|| {
                        SimulationError::InvalidConfig(format!(
                            "fluid body `{}` needs an inner or complex relation",
                            bc.name
                        ))
                    })?;
                    integrator = integrator.with_fluid(FluidSteps::new(id, relation, h, &parameters));
                }
                BodyKind::Diffusion | BodyKind::Electrophysiology => {
                    if !bc.species.is_empty() {
                        let relation = relation_with_inner(&system, id).ok_or_else(|| {
                            SimulationError::InvalidConfig(format!(
                                "body `{}` diffuses species and needs an inner relation",
                                bc.name
                            ))
                        })?;
                        for slot in 0..bc.species.len() {
                            integrator = integrator.with_diffusion(relation, slot, parameters.diffusivity, h);
                        }
                    }
                }
                BodyKind::Solid => {}
            }
            for c in &bc.constraints {
                let slot = system.body(id)?.particles.species_index(&c.species).ok_or_else(|| {
                    SimulationError::InvalidConfig(format!("body `{}` has no species `{}`", bc.name, c.species))
                })?;
                let direction = match &c.direction {
                    Some(d) => Some(vec3(d, "constraint direction")?.normalize()),
                    None => None,
                };
                integrator = integrator.with_constraint(
                    id,
                    SpeciesConstraint {
                        slot,
                        value: c.value,
                        shape: Box::new(c.region.to_box("constraint region")?),
                        direction,
                    },
                );
            }
        }

        log::info!(
            "built scenario: {:?}, {} bodies, {} particles, {} relations",
            engine.dimension,
            system.bodies.len(),
            system.total_particles(),
            system.relations.len()
        );

        Ok(Self { engine, parameters, system, integrator })
    }

    /// Run to `t_end`
    pub fn run(&mut self) -> Result<RunSummary> {
        self.integrator.run(&mut self.system, &self.parameters)
    }
}

fn validate_parameters(p: &Parameters) -> Result<()> {
    let positive = [
        ("spacing", p.spacing),
        ("smoothing_length_ratio", p.smoothing_length_ratio),
        ("cfl", p.cfl),
        ("max_dt", p.max_dt),
        ("sound_speed", p.sound_speed),
        ("rho0", p.rho0),
    ];
    for (name, value) in positive {
        if !(value > 0.0 && value.is_finite()) {
            return Err(SimulationError::InvalidConfig(format!("{name} must be positive, got {value}")));
        }
    }
    if let Some(cfl) = p.acoustic_cfl {
        if !(cfl > 0.0 && cfl.is_finite()) {
            return Err(SimulationError::InvalidConfig(format!("acoustic_cfl must be positive, got {cfl}")));
        }
    }
    if !(p.diffusivity >= 0.0) || !(p.viscosity >= 0.0 && p.viscosity.is_finite()) || !p.t_end.is_finite() {
        return Err(SimulationError::InvalidConfig(
            "diffusivity, viscosity and t_end must be finite and non-negative".into(),
        ));
    }
    Ok(())
}

fn add_body(system: &mut System, bc: &BodyConfig, engine: &Engine, params: &Parameters) -> Result<BodyId> {
    let spacing = bc.spacing.unwrap_or(params.spacing);
    let density = bc.density.unwrap_or(params.rho0);
    let outer = bc.shape.to_box(&format!("shape of `{}`", bc.name))?;
    let shape: Box<dyn Shape> = match &bc.cavity {
        Some(cavity) => Box::new(BoxShell { outer, inner: cavity.to_box(&format!("cavity of `{}`", bc.name))? }),
        None => Box::new(outer),
    };

    let mut particles = lattice_particles(shape.as_ref(), spacing, engine.dimension, density);
    if let Some(v) = &bc.velocity {
        let v = vec3(v, "velocity")?;
        particles.iter_mut().for_each(|p| p.v = v);
    }
    if bc.initial_species.len() > bc.species.len() {
        return Err(SimulationError::InvalidConfig(format!(
            "body `{}` has {} initial species values for {} species",
            bc.name,
            bc.initial_species.len(),
            bc.species.len()
        )));
    }
    for p in particles.iter_mut() {
        for (slot, value) in bc.initial_species.iter().enumerate() {
            p.species[slot] = *value;
        }
    }
    if particles.is_empty() {
        log::warn!("body `{}` generated no particles", bc.name);
    }

    let names: Vec<&str> = bc.species.iter().map(String::as_str).collect();
    let particles = ParticleSet::new(particles).with_species(&names)?;
    let kernel = Kernel::new(engine.kernel, params.smoothing_length_ratio * spacing, engine.dimension);
    system.add_body(&bc.name, bc.kind, spacing, kernel, particles)
}

fn add_relation(system: &mut System, rc: &RelationConfig) -> Result<RelationId> {
    match rc {
        RelationConfig::Inner { body, include_self } => {
            let id = system.body_id(body)?;
            let policy = if *include_self { SelfContribution::Include } else { SelfContribution::Exclude };
            system.add_relation(Relation::Inner(InnerRelation::new(id).with_self_contribution(policy)))
        }
        RelationConfig::Contact { source, targets } => {
            let source = system.body_id(source)?;
            let targets = targets.iter().map(|t| system.body_id(t)).collect::<Result<Vec<_>>>()?;
            system.add_contact_relation(source, &targets)
        }
        RelationConfig::Complex { source, targets } => {
            let source = system.body_id(source)?;
            let targets = targets.iter().map(|t| system.body_id(t)).collect::<Result<Vec<_>>>()?;
            system.add_complex_relation(source, &targets)
        }
    }
}

/// Last registered relation of `body` with an inner part, complex relations preferred
fn relation_with_inner(system: &System, body: BodyId) -> Option<RelationId> {
    let candidates = || {
        system
            .relations
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.source() == body && r.inner().is_some())
    };
    candidates()
        .filter(|(_, r)| matches!(r, Relation::Complex(_)))
        .last()
        .or_else(|| candidates().last())
        .map(|(k, _)| RelationId(k))
}
