//! Core state types for the particle simulation.
//!
//! - `Particle` / `ParticleSet` : per-particle records of one body, indexed `0..N-1`
//! - `Body`                     : particle set + its own cell-linked list and kernel
//! - `System`                   : arena of bodies and relations plus the physical time `t`
//!
//! Relations refer to bodies through `BodyId` (an index into `System::bodies`),
//! never by ownership.

use nalgebra::Vector3;
use serde::Deserialize;

use crate::error::{Result, SimulationError};
use crate::simulation::cell_linked_list::{CellLinkedList, GridReport};
use crate::simulation::geometry::BoundingBox;
use crate::simulation::kernel::Kernel;
use crate::simulation::relation::{ComplexRelation, ContactRelation, InnerRelation, Relation};
use crate::simulation::engine::ExecutionPolicy;

pub type NVec3 = Vector3<f64>;

/// Number of species values each particle carries.
pub const SPECIES_SLOTS: usize = 2;

/// Spatial dimension of a system. 2D systems live in the z = const plane.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    #[serde(rename = "2d")]
    Two,
    #[serde(rename = "3d")]
    Three,
}

impl Dimension {
    /// Number of active axes
    pub fn axes(self) -> usize {
        match self {
            Dimension::Two => 2,
            Dimension::Three => 3,
        }
    }
}

/// Tag for the physical role of a body.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    Fluid,
    Solid,
    Diffusion,
    Electrophysiology,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub x: NVec3,   // position
    pub v: NVec3,   // velocity
    pub a: NVec3,   // acceleration, accumulated by interactions
    pub m: f64,     // mass
    pub vol: f64,   // volume
    pub rho: f64,   // density
    pub p: f64,     // pressure
    pub drho_dt: f64,  // density rate from the continuity equation
    pub drift: NVec3,  // displacement accumulated over acoustic sub-steps, applied once per step
    pub species: [f64; SPECIES_SLOTS], // species values, slot names live on the ParticleSet
}

impl Particle {
    /// Particle at rest at `x` with volume `vol` and density `rho`
    pub fn new(x: NVec3, vol: f64, rho: f64) -> Self {
        Self {
            x,
            v: NVec3::zeros(),
            a: NVec3::zeros(),
            m: rho * vol,
            vol,
            rho,
            p: 0.0,
            drho_dt: 0.0,
            drift: NVec3::zeros(),
            species: [0.0; SPECIES_SLOTS],
        }
    }
}

/// Ordered particles of one body.
///
/// `epoch` counts position changes. Relations and the cell-linked list record
/// the epoch they were built against, which is how staleness is detected.
#[derive(Debug, Clone, Default)]
pub struct ParticleSet {
    particles: Vec<Particle>,
    species_names: Vec<String>,
    epoch: u64,
}

impl ParticleSet {
    pub fn new(particles: Vec<Particle>) -> Self {
        Self {
            particles,
            species_names: Vec::new(),
            epoch: 0,
        }
    }

    /// Name the species slots, in slot order
    pub fn with_species(mut self, names: &[&str]) -> Result<Self> {
        if names.len() > SPECIES_SLOTS {
            return Err(SimulationError::InvalidConfig(format!(
                "{} species requested, particles carry {SPECIES_SLOTS} slots",
                names.len()
            )));
        }
        self.species_names = names.iter().map(|s| s.to_string()).collect();
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable access to particle state.
    /// Callers that change positions through this must call [`ParticleSet::mark_moved`].
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn positions(&self) -> Vec<NVec3> {
        self.particles.iter().map(|p| p.x).collect()
    }

    /// Append a particle (generation phase)
    pub fn push(&mut self, particle: Particle) {
        self.particles.push(particle);
        self.epoch += 1;
    }

    pub fn set_position(&mut self, i: usize, x: NVec3) {
        self.particles[i].x = x;
        self.epoch += 1;
    }

    /// Overwrite all positions at once
    pub fn set_positions(&mut self, positions: &[NVec3]) -> Result<()> {
        if positions.len() != self.particles.len() {
            return Err(SimulationError::ParticleCountMismatch {
                expected: self.particles.len(),
                actual: positions.len(),
            });
        }
        for (p, x) in self.particles.iter_mut().zip(positions) {
            p.x = *x;
        }
        self.epoch += 1;
        Ok(())
    }

    pub fn mark_moved(&mut self) {
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn species_names(&self) -> &[String] {
        &self.species_names
    }

    /// Slot of a named species
    pub fn species_index(&self, name: &str) -> Option<usize> {
        self.species_names.iter().position(|s| s == name)
    }
}

/// One body: its particles, the cell-linked list keyed to its own cutoff, and its kernel.
#[derive(Debug, Clone)]
pub struct Body {
    pub name: String,
    pub kind: BodyKind,
    pub spacing: f64, // reference particle spacing
    pub kernel: Kernel,
    pub particles: ParticleSet,
    cell_linked_list: CellLinkedList,
    grid_epoch: u64, // particle epoch the cell-linked list reflects
}

impl Body {
    /// Create a body and build its cell-linked list over `domain`
    pub fn new(
        name: &str,
        kind: BodyKind,
        spacing: f64,
        kernel: Kernel,
        particles: ParticleSet,
        domain: &BoundingBox,
    ) -> Result<Self> {
        if !(spacing > 0.0 && spacing.is_finite()) {
            return Err(SimulationError::InvalidConfig(format!(
                "body `{name}` has non-positive spacing {spacing}"
            )));
        }
        let positions = particles.positions();
        let (cell_linked_list, report) =
            CellLinkedList::build(&positions, kernel.cutoff_radius(), domain, kernel.dimension())?;
        if report.clamped > 0 {
            log::warn!("body `{name}`: {} particles generated outside the domain", report.clamped);
        }
        let grid_epoch = particles.epoch();

        Ok(Self {
            name: name.to_string(),
            kind,
            spacing,
            kernel,
            particles,
            cell_linked_list,
            grid_epoch,
        })
    }

    pub fn cutoff(&self) -> f64 {
        self.kernel.cutoff_radius()
    }

    pub fn cell_linked_list(&self) -> &CellLinkedList {
        &self.cell_linked_list
    }

    pub fn cell_linked_list_is_current(&self) -> bool {
        self.grid_epoch == self.particles.epoch()
    }

    /// Full rebuild from current positions
    pub fn rebuild_cell_linked_list(&mut self) -> GridReport {
        let positions = self.particles.positions();
        let report = self.cell_linked_list.rebuild(&positions);
        self.grid_epoch = self.particles.epoch();
        report
    }

    /// Incremental migration of moved particles
    pub fn update_cell_linked_list(&mut self, tolerance: f64) -> GridReport {
        let positions = self.particles.positions();
        let report = self.cell_linked_list.update_after_motion(&positions, tolerance);
        self.grid_epoch = self.particles.epoch();
        report
    }

    /// Largest displacement of any particle since the last full rebuild
    pub fn max_displacement_since_rebuild(&self) -> f64 {
        let positions = self.particles.positions();
        self.cell_linked_list.max_displacement_since_rebuild(&positions)
    }
}

/// Arena of bodies and relations making up one simulation instance.
#[derive(Debug, Clone)]
pub struct System {
    pub bodies: Vec<Body>,         // indexed by BodyId
    pub relations: Vec<Relation>,  // indexed by RelationId, in registration order
    pub domain: BoundingBox,       // bounds every cell-linked list is built over
    pub dimension: Dimension,
    pub t: f64,                    // physical time
}

impl System {
    pub fn new(domain: BoundingBox, dimension: Dimension) -> Self {
        Self {
            bodies: Vec::new(),
            relations: Vec::new(),
            domain,
            dimension,
            t: 0.0,
        }
    }

    /// Register a body; its cell-linked list is built immediately
    pub fn add_body(
        &mut self,
        name: &str,
        kind: BodyKind,
        spacing: f64,
        kernel: Kernel,
        particles: ParticleSet,
    ) -> Result<BodyId> {
        if self.bodies.iter().any(|b| b.name == name) {
            return Err(SimulationError::InvalidConfig(format!("duplicate body name `{name}`")));
        }
        if kernel.dimension() != self.dimension {
            return Err(SimulationError::InvalidConfig(format!(
                "kernel of body `{name}` is {:?}, system is {:?}",
                kernel.dimension(),
                self.dimension
            )));
        }
        let body = Body::new(name, kind, spacing, kernel, particles, &self.domain)?;
        self.bodies.push(body);
        Ok(BodyId(self.bodies.len() - 1))
    }

    pub fn body(&self, id: BodyId) -> Result<&Body> {
        self.bodies.get(id.0).ok_or(SimulationError::BodyOutOfRange(id.0))
    }

    pub fn body_mut(&mut self, id: BodyId) -> Result<&mut Body> {
        self.bodies.get_mut(id.0).ok_or(SimulationError::BodyOutOfRange(id.0))
    }

    pub fn body_id(&self, name: &str) -> Result<BodyId> {
        self.bodies
            .iter()
            .position(|b| b.name == name)
            .map(BodyId)
            .ok_or_else(|| SimulationError::UnknownBody(name.to_string()))
    }

    pub fn relation(&self, id: RelationId) -> Result<&Relation> {
        self.relations.get(id.0).ok_or(SimulationError::RelationOutOfRange(id.0))
    }

    /// Register a relation and bring it up to date with current positions
    pub fn add_relation(&mut self, mut relation: Relation) -> Result<RelationId> {
        for id in relation.body_ids() {
            self.body(id)?;
        }
        relation.update(&self.bodies, ExecutionPolicy::Parallel)?;
        self.relations.push(relation);
        Ok(RelationId(self.relations.len() - 1))
    }

    pub fn add_inner_relation(&mut self, body: BodyId) -> Result<RelationId> {
        self.add_relation(Relation::Inner(InnerRelation::new(body)))
    }

    pub fn add_contact_relation(&mut self, source: BodyId, targets: &[BodyId]) -> Result<RelationId> {
        self.add_relation(Relation::Contact(ContactRelation::new(source, targets)?))
    }

    pub fn add_complex_relation(&mut self, source: BodyId, targets: &[BodyId]) -> Result<RelationId> {
        self.add_relation(Relation::Complex(ComplexRelation::new(source, targets)?))
    }

    pub fn total_particles(&self) -> usize {
        self.bodies.iter().map(|b| b.particles.len()).sum()
    }
}
