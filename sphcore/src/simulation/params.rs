//! Numerical and physical parameters for the simulation
//!
//! `Parameters` holds runtime settings:
//! - end time, CFL number and step cap of the adaptive advection step,
//! - the acoustic CFL number of the pressure/density relaxation sub-steps, if any,
//! - particle spacing and the smoothing length ratio `h / spacing`,
//! - logging cadence (`output_interval` steps),
//! - fluid constants (`gravity`, `rho0`, `sound_speed`, `viscosity`) and the species diffusivity

use crate::simulation::states::NVec3;

#[derive(Debug, Clone)]
pub struct Parameters {
    pub t_end: f64,                  // time end
    pub spacing: f64,                // reference particle spacing
    pub smoothing_length_ratio: f64, // h = ratio * body spacing
    pub cfl: f64,                    // advection CFL number
    pub acoustic_cfl: Option<f64>,   // Some: relax pressure and density in acoustic sub-steps
    pub max_dt: f64,                 // upper bound on the advection step size
    pub output_interval: usize,      // steps between body summaries in the log
    pub gravity: NVec3,              // body force on fluids
    pub rho0: f64,                   // reference fluid density
    pub sound_speed: f64,            // artificial sound speed of the EOS
    pub viscosity: f64,              // dynamic viscosity of fluids, 0 for inviscid
    pub diffusivity: f64,            // species diffusion coefficient
}
