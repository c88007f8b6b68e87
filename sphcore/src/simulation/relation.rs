//! # Relations
//!
//! Neighbor tables derived from the cell-linked lists of the bodies involved.
//!
//! - `InnerRelation`   : neighbors of every particle within its own body
//! - `ContactRelation` : neighbors of every source particle in each target body,
//!                       one sub-list per target
//! - `ComplexRelation` : an inner and a contact relation sharing the same source
//!
//! Tables are rebuilt from scratch on every `update`. Each relation records the
//! particle epochs of the bodies it read, so a dispatch against a relation whose
//! bodies moved afterwards is refused with `SimulationError::StaleRelation`.

use rayon::prelude::*;

use crate::error::{Result, SimulationError};
use crate::simulation::engine::ExecutionPolicy;
use crate::simulation::kernel::Kernel;
use crate::simulation::states::{Body, BodyId, NVec3};

/// One neighbor of a particle `i`, with kernel data precomputed at update time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeighborRecord {
    pub j: usize,             // neighbor index in its own particle set
    pub displacement: NVec3,  // x_i - x_j
    pub distance: f64,        // |x_i - x_j|
    pub weight: f64,          // W_ij
    pub dw_dr: f64,           // dW/dr at r_ij
    pub gradient: NVec3,      // grad_i W_ij, zero for coincident pairs
}

impl NeighborRecord {
    fn new(j: usize, displacement: NVec3, kernel: &Kernel) -> Self {
        let distance = displacement.norm();
        Self {
            j,
            displacement,
            distance,
            weight: kernel.w(distance),
            dw_dr: kernel.dw(distance),
            gradient: kernel.gradient(&displacement),
        }
    }
}

/// Neighbors of one particle, in cell traversal order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighborhood {
    records: Vec<NeighborRecord>,
}

/// Shared empty neighborhood, handed out when a dispatch has no relation of the requested kind
pub(crate) static EMPTY_NEIGHBORHOOD: Neighborhood = Neighborhood { records: Vec::new() };

impl Neighborhood {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NeighborRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[NeighborRecord] {
        &self.records
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.records.iter().map(|r| r.j)
    }

    pub fn contains(&self, j: usize) -> bool {
        self.records.iter().any(|r| r.j == j)
    }
}

impl<'a> IntoIterator for &'a Neighborhood {
    type Item = &'a NeighborRecord;
    type IntoIter = std::slice::Iter<'a, NeighborRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Whether a particle appears in its own inner neighborhood.
/// Summation models that need W(0) either include it here or add it themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfContribution {
    #[default]
    Exclude,
    Include,
}

/// Particles of `source` within the cutoff of `x_i`, found through the cell-linked list of `source`
fn search(
    x_i: &NVec3,
    skip: Option<usize>,
    source: &Body,
    kernel: &Kernel,
) -> Neighborhood {
    let grid = source.cell_linked_list();
    let cutoff = kernel.cutoff_radius();
    let radius = grid.search_depth(cutoff);
    let (cell, _) = grid.cell_of(x_i);
    let particles = source.particles.particles();

    let mut records = Vec::new();
    grid.for_each_neighbor_cell(cell, radius, |j| {
        if Some(j) == skip {
            return;
        }
        let displacement = x_i - particles[j].x;
        if displacement.norm() <= cutoff {
            records.push(NeighborRecord::new(j, displacement, kernel));
        }
    });
    Neighborhood { records }
}

fn build_table<F>(n: usize, execution: ExecutionPolicy, f: F) -> Vec<Neighborhood>
where
    F: Fn(usize) -> Neighborhood + Send + Sync,
{
    match execution {
        ExecutionPolicy::Sequential => (0..n).map(f).collect(),
        ExecutionPolicy::Parallel => (0..n).into_par_iter().map(f).collect(),
    }
}

fn fetch(bodies: &[Body], id: BodyId) -> Result<&Body> {
    bodies.get(id.0).ok_or(SimulationError::BodyOutOfRange(id.0))
}

fn require_current_grid(body: &Body) -> Result<()> {
    if body.cell_linked_list_is_current() {
        Ok(())
    } else {
        Err(SimulationError::StaleCellLinkedList { body: body.name.clone() })
    }
}

// ======================================================================================
// Inner

#[derive(Debug, Clone)]
pub struct InnerRelation {
    body: BodyId,
    self_contribution: SelfContribution,
    neighborhoods: Vec<Neighborhood>,
    epoch: Option<u64>, // particle epoch of `body` at the last update
}

impl InnerRelation {
    pub fn new(body: BodyId) -> Self {
        Self {
            body,
            self_contribution: SelfContribution::Exclude,
            neighborhoods: Vec::new(),
            epoch: None,
        }
    }

    pub fn with_self_contribution(mut self, policy: SelfContribution) -> Self {
        self.self_contribution = policy;
        self
    }

    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn self_contribution(&self) -> SelfContribution {
        self.self_contribution
    }

    pub fn update(&mut self, bodies: &[Body], execution: ExecutionPolicy) -> Result<()> {
        let body = fetch(bodies, self.body)?;
        require_current_grid(body)?;

        let particles = body.particles.particles();
        let kernel = &body.kernel;
        let include_self = self.self_contribution == SelfContribution::Include;
        self.neighborhoods = build_table(particles.len(), execution, |i| {
            let skip = if include_self { None } else { Some(i) };
            search(&particles[i].x, skip, body, kernel)
        });
        self.epoch = Some(body.particles.epoch());
        Ok(())
    }

    pub fn is_current(&self, bodies: &[Body]) -> bool {
        self.stale_body(bodies).is_none()
    }

    pub fn neighborhood(&self, i: usize) -> &Neighborhood {
        &self.neighborhoods[i]
    }

    pub fn neighborhoods(&self) -> &[Neighborhood] {
        &self.neighborhoods
    }

    fn stale_body(&self, bodies: &[Body]) -> Option<BodyId> {
        let current = bodies.get(self.body.0).map(|b| b.particles.epoch());
        match (self.epoch, current) {
            (Some(e), Some(c)) if e == c => None,
            _ => Some(self.body),
        }
    }
}

// ======================================================================================
// Contact

#[derive(Debug, Clone)]
pub struct ContactRelation {
    source: BodyId,
    targets: Vec<BodyId>,
    neighborhoods: Vec<Vec<Neighborhood>>, // [target k][source particle i]
    epochs: Vec<u64>,                      // source first, then targets
}

impl ContactRelation {
    pub fn new(source: BodyId, targets: &[BodyId]) -> Result<Self> {
        if targets.is_empty() {
            return Err(SimulationError::RelationMismatch(format!(
                "contact relation of body {} has no target bodies",
                source.0
            )));
        }
        if targets.contains(&source) {
            return Err(SimulationError::RelationMismatch(format!(
                "body {} cannot be its own contact target",
                source.0
            )));
        }
        for (k, t) in targets.iter().enumerate() {
            if targets[..k].contains(t) {
                return Err(SimulationError::RelationMismatch(format!(
                    "body {} listed twice as contact target",
                    t.0
                )));
            }
        }
        Ok(Self {
            source,
            targets: targets.to_vec(),
            neighborhoods: Vec::new(),
            epochs: Vec::new(),
        })
    }

    pub fn source(&self) -> BodyId {
        self.source
    }

    pub fn targets(&self) -> &[BodyId] {
        &self.targets
    }

    /// Position of `body` in the target list
    pub fn target_index(&self, body: BodyId) -> Option<usize> {
        self.targets.iter().position(|&t| t == body)
    }

    /// Cutoff and weights come from the source kernel; candidates from each target's grid.
    pub fn update(&mut self, bodies: &[Body], execution: ExecutionPolicy) -> Result<()> {
        let source = fetch(bodies, self.source)?;
        let particles = source.particles.particles();
        let kernel = &source.kernel;

        let mut tables = Vec::with_capacity(self.targets.len());
        let mut epochs = Vec::with_capacity(self.targets.len() + 1);
        epochs.push(source.particles.epoch());
        for &t in &self.targets {
            let target = fetch(bodies, t)?;
            require_current_grid(target)?;
            tables.push(build_table(particles.len(), execution, |i| {
                search(&particles[i].x, None, target, kernel)
            }));
            epochs.push(target.particles.epoch());
        }
        self.neighborhoods = tables;
        self.epochs = epochs;
        Ok(())
    }

    pub fn is_current(&self, bodies: &[Body]) -> bool {
        self.stale_body(bodies).is_none()
    }

    /// Neighbors of source particle `i` in target `k`
    pub fn neighborhood(&self, k: usize, i: usize) -> &Neighborhood {
        &self.neighborhoods[k][i]
    }

    /// Per-target sub-lists of source particle `i`
    pub fn neighborhoods_of(&self, i: usize) -> impl Iterator<Item = (BodyId, &Neighborhood)> + '_ {
        self.targets.iter().zip(&self.neighborhoods).map(move |(&t, table)| (t, &table[i]))
    }

    fn body_ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        std::iter::once(self.source).chain(self.targets.iter().copied())
    }

    fn stale_body(&self, bodies: &[Body]) -> Option<BodyId> {
        if self.epochs.len() != self.targets.len() + 1 {
            return Some(self.source);
        }
        self.body_ids().zip(&self.epochs).find_map(|(id, &e)| {
            match bodies.get(id.0) {
                Some(b) if b.particles.epoch() == e => None,
                _ => Some(id),
            }
        })
    }
}

// ======================================================================================
// Complex

#[derive(Debug, Clone)]
pub struct ComplexRelation {
    inner: InnerRelation,
    contact: ContactRelation,
}

impl ComplexRelation {
    pub fn new(source: BodyId, targets: &[BodyId]) -> Result<Self> {
        Ok(Self {
            inner: InnerRelation::new(source),
            contact: ContactRelation::new(source, targets)?,
        })
    }

    pub fn from_parts(inner: InnerRelation, contact: ContactRelation) -> Result<Self> {
        if inner.body() != contact.source() {
            return Err(SimulationError::RelationMismatch(format!(
                "inner relation of body {} combined with contact relation of body {}",
                inner.body().0,
                contact.source().0
            )));
        }
        Ok(Self { inner, contact })
    }

    pub fn update(&mut self, bodies: &[Body], execution: ExecutionPolicy) -> Result<()> {
        self.inner.update(bodies, execution)?;
        self.contact.update(bodies, execution)
    }

    pub fn inner(&self) -> &InnerRelation {
        &self.inner
    }

    pub fn contact(&self) -> &ContactRelation {
        &self.contact
    }
}

// ======================================================================================
// Relation

/// A registered relation of a `System`
#[derive(Debug, Clone)]
pub enum Relation {
    Inner(InnerRelation),
    Contact(ContactRelation),
    Complex(ComplexRelation),
}

impl Relation {
    /// Body whose particles own the neighbor tables
    pub fn source(&self) -> BodyId {
        match self {
            Relation::Inner(r) => r.body(),
            Relation::Contact(r) => r.source(),
            Relation::Complex(r) => r.inner().body(),
        }
    }

    /// Every body the relation reads
    pub fn body_ids(&self) -> Vec<BodyId> {
        match self {
            Relation::Inner(r) => vec![r.body()],
            Relation::Contact(r) => r.body_ids().collect(),
            Relation::Complex(r) => r.contact().body_ids().collect(),
        }
    }

    pub fn update(&mut self, bodies: &[Body], execution: ExecutionPolicy) -> Result<()> {
        match self {
            Relation::Inner(r) => r.update(bodies, execution),
            Relation::Contact(r) => r.update(bodies, execution),
            Relation::Complex(r) => r.update(bodies, execution),
        }
    }

    pub fn is_current(&self, bodies: &[Body]) -> bool {
        self.stale_body(bodies).is_none()
    }

    /// Precondition check made by every dispatch that reads this relation
    pub fn ensure_current(&self, id: usize, bodies: &[Body]) -> Result<()> {
        match self.stale_body(bodies) {
            None => Ok(()),
            Some(b) => Err(SimulationError::StaleRelation {
                relation: id,
                body: bodies.get(b.0).map(|b| b.name.clone()).unwrap_or_else(|| b.0.to_string()),
            }),
        }
    }

    pub fn inner(&self) -> Option<&InnerRelation> {
        match self {
            Relation::Inner(r) => Some(r),
            Relation::Complex(r) => Some(r.inner()),
            Relation::Contact(_) => None,
        }
    }

    pub fn contact(&self) -> Option<&ContactRelation> {
        match self {
            Relation::Contact(r) => Some(r),
            Relation::Complex(r) => Some(r.contact()),
            Relation::Inner(_) => None,
        }
    }

    /// Neighbor count of source particle `i` over all sub-lists
    pub fn neighbor_count(&self, i: usize) -> usize {
        let inner = self.inner().map_or(0, |r| r.neighborhood(i).len());
        let contact = self
            .contact()
            .map_or(0, |r| r.neighborhoods_of(i).map(|(_, n)| n.len()).sum());
        inner + contact
    }

    /// Largest neighbor count of any source particle
    pub fn max_neighbor_count(&self) -> usize {
        let n = match self {
            Relation::Inner(r) => r.neighborhoods().len(),
            Relation::Contact(r) => r.neighborhoods.first().map_or(0, |t| t.len()),
            Relation::Complex(r) => r.inner().neighborhoods().len(),
        };
        (0..n).map(|i| self.neighbor_count(i)).max().unwrap_or(0)
    }

    fn stale_body(&self, bodies: &[Body]) -> Option<BodyId> {
        match self {
            Relation::Inner(r) => r.stale_body(bodies),
            Relation::Contact(r) => r.stale_body(bodies),
            Relation::Complex(r) => r.inner().stale_body(bodies).or_else(|| r.contact().stale_body(bodies)),
        }
    }
}
