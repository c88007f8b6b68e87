//! Typed errors for building and stepping a particle system.
//!
//! Domain violations and sparse neighborhoods are not errors: they are
//! reported through `GridReport` / `ConfigurationReport` and the log.
//! Everything here is a caller-side precondition or configuration failure.

use thiserror::Error;

/// Errors raised by scenario setup, relation maintenance and dispatch.
#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    /// Scenario or runtime parameters that cannot describe a valid system.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A body name that is not registered in the system.
    #[error("unknown body `{0}`")]
    UnknownBody(String),

    #[error("body index {0} is out of range")]
    BodyOutOfRange(usize),

    #[error("relation index {0} is out of range")]
    RelationOutOfRange(usize),

    /// Cell size or domain that cannot back a cell-linked list.
    #[error("invalid cell-linked list: {0}")]
    InvalidGrid(String),

    /// Particles of `body` moved after its cell-linked list was last updated.
    #[error("cell-linked list of body `{body}` is out of date with its particles")]
    StaleCellLinkedList { body: String },

    /// Dispatch against a relation whose bodies moved since its last update.
    #[error("relation {relation} is stale: body `{body}` moved since the relation was last updated")]
    StaleRelation { relation: usize, body: String },

    /// Relation wiring that cannot work (self contact, mixed sources, ...).
    #[error("relation mismatch: {0}")]
    RelationMismatch(String),

    #[error("expected {expected} particle values, got {actual}")]
    ParticleCountMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, SimulationError>;
