//! Configuration types for loading simulation scenarios from YAML.
//!
//! This module defines a thin, `serde`-deserializable representation of a
//! simulation scenario. A scenario consists of:
//!
//! - [`EngineConfig`]     – dimension, kernel, execution policy and cell-linked list maintenance
//! - [`ParametersConfig`] – time stepping and physical constants
//! - [`DomainConfig`]     – bounds every cell-linked list is built over
//! - [`BodyConfig`]       – one particle body generated on a lattice
//! - [`RelationConfig`]   – inner / contact / complex relations between named bodies
//! - [`ScenarioConfig`]   – top-level wrapper used to load a scenario from YAML
//!
//! # YAML format
//! An example 2D scenario matching these types:
//!
//! ```yaml
//! engine:
//!   dimension: 2d
//!   kernel: wendland_c2
//!   execution: parallel            # or sequential
//!   rebuild: { policy: interval, steps: 100 }
//!   max_particles_per_cell: 32
//!   max_neighbors: 80
//!
//! parameters:
//!   t_end: 0.2
//!   spacing: 0.02
//!   cfl: 0.25
//!   acoustic_cfl: 0.6              # omit for one pressure update per step
//!   max_dt: 1.0e-3
//!   output_interval: 50
//!   gravity: [0.0, -9.81]
//!   rho0: 1000.0
//!   sound_speed: 20.0
//!
//! domain:
//!   lower: [-0.1, -0.1]
//!   upper: [1.1, 1.1]
//!
//! bodies:
//!   - name: Water
//!     kind: fluid
//!     shape: { lower: [0.0, 0.0], upper: [0.4, 0.4] }
//!   - name: Wall
//!     kind: solid
//!     shape: { lower: [-0.08, -0.08], upper: [1.08, 1.08] }
//!     cavity: { lower: [0.0, 0.0], upper: [1.0, 1.0] }
//!
//! relations:
//!   - kind: complex
//!     source: Water
//!     targets: [Wall]
//! ```
//!
//! Two-component vectors are read as `[x, y]` with `z = 0`.
//! The scenario builder maps this configuration into runtime types and
//! validates it with typed errors.

use serde::Deserialize;

use crate::error::{Result, SimulationError};
use crate::simulation::engine::ExecutionPolicy;
use crate::simulation::geometry::BoundingBox;
use crate::simulation::kernel::KernelKind;
use crate::simulation::states::{BodyKind, Dimension, NVec3};
use crate::simulation::updater::RebuildPolicy;

/// High-level engine configuration
#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    pub dimension: Dimension, // `2d` or `3d`
    pub kernel: Option<KernelKind>, // smoothing kernel of every body, default wendland_c2
    pub execution: Option<ExecutionPolicy>, // default parallel
    pub rebuild: Option<RebuildPolicy>, // when to rebuild cell-linked lists, default every 100 updates
    pub tolerance: Option<f64>, // slack for incremental cell-linked list updates
    pub max_particles_per_cell: Option<usize>, // occupancy reported as unstable above this
    pub max_neighbors: Option<usize>, // neighbor count reported as unstable above this
}

/// Global numerical and physical parameters for a scenario
#[derive(Deserialize, Debug, Clone)]
pub struct ParametersConfig {
    pub t_end: f64,                          // time end
    pub spacing: f64,                        // reference particle spacing
    pub smoothing_length_ratio: Option<f64>, // h / spacing, default 1.3
    pub cfl: f64,                            // advection CFL number
    pub acoustic_cfl: Option<f64>,           // acoustic sub-steps per advection step when set
    pub max_dt: f64,                         // step size cap
    pub output_interval: Option<usize>,      // steps between log summaries, default 100
    pub gravity: Option<Vec<f64>>,           // body force on fluids, default zero
    pub rho0: Option<f64>,                   // reference fluid density, default 1
    pub sound_speed: Option<f64>,            // artificial sound speed, default 10
    pub viscosity: Option<f64>,              // dynamic viscosity of fluids, default 0
    pub diffusivity: Option<f64>,            // species diffusion coefficient, default 0
}

/// Axis-aligned box, `[x, y]` or `[x, y, z]` corners
#[derive(Deserialize, Debug, Clone)]
pub struct BoxConfig {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

pub type DomainConfig = BoxConfig;

/// Species value fixed inside a region at every step
#[derive(Deserialize, Debug, Clone)]
pub struct ConstraintConfig {
    pub species: String,             // species name on the body
    pub value: f64,
    pub region: BoxConfig,
    pub direction: Option<Vec<f64>>, // scale `value` by how much the region's surface normal faces this way
}

/// Configuration for a single body generated on a lattice
#[derive(Deserialize, Debug, Clone)]
pub struct BodyConfig {
    pub name: String,
    pub kind: BodyKind,
    pub shape: BoxConfig,              // filled region
    pub cavity: Option<BoxConfig>,     // region left empty, turns the shape into a shell
    pub spacing: Option<f64>,          // default parameters.spacing
    pub density: Option<f64>,          // default parameters.rho0
    pub velocity: Option<Vec<f64>>,    // initial velocity, default zero
    #[serde(default)]
    pub species: Vec<String>,          // names of the species slots
    #[serde(default)]
    pub initial_species: Vec<f64>,     // initial value per species slot
    #[serde(default)]
    pub constraints: Vec<ConstraintConfig>,
}

/// Relation between named bodies
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationConfig {
    Inner {
        body: String,
        #[serde(default)]
        include_self: bool,
    },
    Contact {
        source: String,
        targets: Vec<String>,
    },
    Complex {
        source: String,
        targets: Vec<String>,
    },
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioConfig {
    pub engine: EngineConfig,         // Engine-level configuration
    pub parameters: ParametersConfig, // Global numerical and physical parameters
    pub domain: DomainConfig,         // Bounds of every cell-linked list
    pub bodies: Vec<BodyConfig>,      // Bodies, registered in order
    #[serde(default)]
    pub relations: Vec<RelationConfig>, // Relations, updated in order every step
}

impl ScenarioConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| SimulationError::InvalidConfig(e.to_string()))
    }
}

/// `[x, y]` or `[x, y, z]` into a vector, `what` names the field in errors
pub fn vec3(values: &[f64], what: &str) -> Result<NVec3> {
    match values {
        [x, y] => Ok(NVec3::new(*x, *y, 0.0)),
        [x, y, z] => Ok(NVec3::new(*x, *y, *z)),
        _ => Err(SimulationError::InvalidConfig(format!(
            "{what} needs 2 or 3 components, got {}",
            values.len()
        ))),
    }
}

impl BoxConfig {
    pub fn to_box(&self, what: &str) -> Result<BoundingBox> {
        let b = BoundingBox::new(vec3(&self.lower, what)?, vec3(&self.upper, what)?);
        if !b.is_valid() {
            return Err(SimulationError::InvalidConfig(format!(
                "{what}: lower {:?} must not exceed upper {:?}",
                self.lower, self.upper
            )));
        }
        Ok(b)
    }
}
