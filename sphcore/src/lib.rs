pub mod error;
pub mod simulation;
pub mod configuration;
pub mod benchmark;

pub use error::{Result, SimulationError};

pub use simulation::states::{Body, BodyId, BodyKind, Dimension, NVec3, Particle, ParticleSet, RelationId, System};
pub use simulation::kernel::{Kernel, KernelKind};
pub use simulation::geometry::{lattice_particles, BoundingBox, BoxShell, Shape};
pub use simulation::cell_linked_list::{CellLinkedList, GridReport};
pub use simulation::relation::{ComplexRelation, ContactRelation, InnerRelation, NeighborRecord, Neighborhood, Relation, SelfContribution};
pub use simulation::updater::{ConfigurationReport, ConfigurationUpdater, Instability, RebuildPolicy};
pub use simulation::dynamics::{
    DispatchContext, Dynamics1Level, InteractionDynamics, InteractionFn, InteractionWithUpdate, LocalInteraction,
    LocalReduce, LocalUpdate, Motion, ReduceDynamics, ReduceFn, SimpleDynamics, Target,
};
pub use simulation::engine::{Engine, ExecutionPolicy};
pub use simulation::integrator::{Integrator, RunSummary};
pub use simulation::scenario::Scenario;

pub use configuration::config::{BodyConfig, EngineConfig, ParametersConfig, RelationConfig, ScenarioConfig};

pub use benchmark::benchmark::{bench_dispatch, bench_neighbor_search};
