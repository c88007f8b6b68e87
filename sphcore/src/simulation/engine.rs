//! High-level runtime engine settings
//!
//! Selects dimension (2D/3D), kernel family, execution policy and the
//! cell-linked list maintenance options used when building and running a `Scenario`

use serde::Deserialize;

use crate::simulation::kernel::KernelKind;
use crate::simulation::states::Dimension;
use crate::simulation::updater::RebuildPolicy;

/// How a dispatch or relation update walks particle indices.
/// Both policies produce the same values for the same input state.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    Sequential,
    #[default]
    Parallel,
}

#[derive(Debug, Clone)]
pub struct Engine {
    pub dimension: Dimension,
    pub kernel: KernelKind,
    pub execution: ExecutionPolicy,
    pub rebuild: RebuildPolicy,         // when to rebuild cell-linked lists from scratch
    pub tolerance: f64,                 // slack added to displacements in incremental updates
    pub max_particles_per_cell: usize,  // occupancy above this is reported as unstable
    pub max_neighbors: usize,           // neighborhood size above this is reported as unstable
}
