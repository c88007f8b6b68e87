pub mod states;
pub mod params;
pub mod engine;
pub mod kernel;
pub mod geometry;
pub mod cell_linked_list;
pub mod relation;
pub mod updater;
pub mod dynamics;
pub mod models;
pub mod integrator;
pub mod scenario;
