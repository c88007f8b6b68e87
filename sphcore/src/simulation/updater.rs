//! Per-step configuration update: cell-linked lists first, then relations.
//!
//! One call to [`ConfigurationUpdater::update`] is the whole unit of work of a
//! step. It takes `&mut System`, so no dispatch can observe a half-updated
//! grid or relation.

use serde::Deserialize;

use crate::error::Result;
use crate::simulation::engine::{Engine, ExecutionPolicy};
use crate::simulation::states::{Body, BodyId, RelationId, System};

/// When a moved body gets a full cell-linked list rebuild instead of an incremental update
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RebuildPolicy {
    EveryStep,
    Interval { steps: usize },      // rebuild every `steps` updates of the body
    Displacement { fraction: f64 }, // rebuild once any particle moved `fraction` cell sizes since the last rebuild
}

impl Default for RebuildPolicy {
    fn default() -> Self {
        RebuildPolicy::Interval { steps: 100 }
    }
}

/// Resource exhaustion reported to the outer loop. The updater never aborts on these.
#[derive(Debug, Clone, PartialEq)]
pub enum Instability {
    CellOverflow { body: BodyId, occupancy: usize, limit: usize },
    NeighborOverflow { relation: RelationId, count: usize, limit: usize },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationReport {
    pub rebuilt: Vec<BodyId>,          // bodies that got a full rebuild
    pub clamped: usize,                // particles clamped into the domain, all bodies
    pub migrated: usize,               // particles that changed cell incrementally, all bodies
    pub instabilities: Vec<Instability>,
}

impl ConfigurationReport {
    pub fn is_stable(&self) -> bool {
        self.instabilities.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ConfigurationUpdater {
    policy: RebuildPolicy,
    tolerance: f64,
    execution: ExecutionPolicy,
    max_particles_per_cell: usize,
    max_neighbors: usize,
    counters: Vec<usize>, // updates since the last rebuild, per body
}

impl Default for ConfigurationUpdater {
    fn default() -> Self {
        Self::new(RebuildPolicy::default())
    }
}

impl ConfigurationUpdater {
    pub fn new(policy: RebuildPolicy) -> Self {
        Self {
            policy,
            tolerance: 0.0,
            execution: ExecutionPolicy::Parallel,
            max_particles_per_cell: usize::MAX,
            max_neighbors: usize::MAX,
            counters: Vec::new(),
        }
    }

    pub fn from_engine(engine: &Engine) -> Self {
        Self::new(engine.rebuild)
            .with_tolerance(engine.tolerance)
            .with_execution(engine.execution)
            .with_limits(engine.max_particles_per_cell, engine.max_neighbors)
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionPolicy) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_limits(mut self, max_particles_per_cell: usize, max_neighbors: usize) -> Self {
        self.max_particles_per_cell = max_particles_per_cell;
        self.max_neighbors = max_neighbors;
        self
    }

    pub fn policy(&self) -> RebuildPolicy {
        self.policy
    }

    /// Rebuild every cell-linked list and relation from scratch
    pub fn initialize(&mut self, sys: &mut System) -> Result<ConfigurationReport> {
        self.counters = vec![0; sys.bodies.len()];
        let mut report = ConfigurationReport::default();
        for (k, body) in sys.bodies.iter_mut().enumerate() {
            let grid = body.rebuild_cell_linked_list();
            report.rebuilt.push(BodyId(k));
            report.clamped += grid.clamped;
            self.check_occupancy(BodyId(k), grid.max_occupancy, &mut report);
        }
        self.update_relations(sys, &mut report)?;
        Ok(report)
    }

    /// Bring every cell-linked list and then every relation up to date with current positions
    pub fn update(&mut self, sys: &mut System) -> Result<ConfigurationReport> {
        self.counters.resize(sys.bodies.len(), 0);
        let mut report = ConfigurationReport::default();

        for (k, body) in sys.bodies.iter_mut().enumerate() {
            if body.cell_linked_list_is_current() {
                continue;
            }
            let grid = if self.wants_rebuild(k, body) {
                log::debug!("body `{}`: full cell-linked list rebuild", body.name);
                self.counters[k] = 0;
                report.rebuilt.push(BodyId(k));
                body.rebuild_cell_linked_list()
            } else {
                let grid = body.update_cell_linked_list(self.tolerance);
                if grid.rebuilt {
                    self.counters[k] = 0;
                    report.rebuilt.push(BodyId(k));
                }
                grid
            };
            report.clamped += grid.clamped;
            report.migrated += grid.migrated;
            self.check_occupancy(BodyId(k), grid.max_occupancy, &mut report);
        }

        self.update_relations(sys, &mut report)?;

        for instability in &report.instabilities {
            log::warn!("configuration update: {instability:?}");
        }
        Ok(report)
    }

    fn wants_rebuild(&mut self, k: usize, body: &Body) -> bool {
        match self.policy {
            RebuildPolicy::EveryStep => true,
            RebuildPolicy::Interval { steps } => {
                self.counters[k] += 1;
                self.counters[k] >= steps.max(1)
            }
            RebuildPolicy::Displacement { fraction } => {
                body.max_displacement_since_rebuild() > fraction * body.cell_linked_list().cell_size()
            }
        }
    }

    fn update_relations(&self, sys: &mut System, report: &mut ConfigurationReport) -> Result<()> {
        let bodies = &sys.bodies;
        for (k, relation) in sys.relations.iter_mut().enumerate() {
            relation.update(bodies, self.execution)?;
            let count = relation.max_neighbor_count();
            if count > self.max_neighbors {
                report.instabilities.push(Instability::NeighborOverflow {
                    relation: RelationId(k),
                    count,
                    limit: self.max_neighbors,
                });
            }
        }
        Ok(())
    }

    fn check_occupancy(&self, body: BodyId, occupancy: usize, report: &mut ConfigurationReport) {
        if occupancy > self.max_particles_per_cell {
            report.instabilities.push(Instability::CellOverflow {
                body,
                occupancy,
                limit: self.max_particles_per_cell,
            });
        }
    }
}
