//! Smoothing kernels.
//!
//! Both kernels have compact support `2h` (the cutoff radius), are written in
//! terms of `q = r / h`, and carry the 2D or 3D normalization of their body.

use serde::Deserialize;
use std::f64::consts::PI;

use crate::simulation::states::{Dimension, NVec3};

/// Below this distance a pair is treated as coincident (no direction)
pub const COINCIDENT_DISTANCE: f64 = 1.0e-12;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelKind {
    #[serde(rename = "wendland_c2")]
    WendlandC2,
    #[serde(rename = "cubic_spline")]
    CubicSpline,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kernel {
    kind: KernelKind,
    h: f64,      // smoothing length
    norm: f64,   // dimensional normalization, includes 1/h^d
    dimension: Dimension,
}

impl Kernel {
    pub fn new(kind: KernelKind, smoothing_length: f64, dimension: Dimension) -> Self {
        let h = smoothing_length;
        let norm = match (kind, dimension) {
            (KernelKind::WendlandC2, Dimension::Two) => 7.0 / (4.0 * PI * h * h),
            (KernelKind::WendlandC2, Dimension::Three) => 21.0 / (16.0 * PI * h * h * h),
            (KernelKind::CubicSpline, Dimension::Two) => 10.0 / (7.0 * PI * h * h),
            (KernelKind::CubicSpline, Dimension::Three) => 1.0 / (PI * h * h * h),
        };
        Self { kind, h, norm, dimension }
    }

    /// Kernel whose support ends at `cutoff`
    pub fn from_cutoff(kind: KernelKind, cutoff: f64, dimension: Dimension) -> Self {
        Self::new(kind, 0.5 * cutoff, dimension)
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    pub fn smoothing_length(&self) -> f64 {
        self.h
    }

    pub fn cutoff_radius(&self) -> f64 {
        2.0 * self.h
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// W(r)
    pub fn w(&self, r: f64) -> f64 {
        let q = r / self.h;
        if q >= 2.0 {
            return 0.0;
        }
        let f = match self.kind {
            KernelKind::WendlandC2 => {
                let s = 1.0 - 0.5 * q;
                s.powi(4) * (1.0 + 2.0 * q)
            }
            KernelKind::CubicSpline => {
                if q < 1.0 {
                    1.0 - 1.5 * q * q + 0.75 * q * q * q
                } else {
                    0.25 * (2.0 - q).powi(3)
                }
            }
        };
        self.norm * f
    }

    /// Self contribution W(0)
    pub fn w0(&self) -> f64 {
        self.w(0.0)
    }

    /// dW/dr, non-positive on the whole support
    pub fn dw(&self, r: f64) -> f64 {
        let q = r / self.h;
        if q >= 2.0 {
            return 0.0;
        }
        let df = match self.kind {
            KernelKind::WendlandC2 => -5.0 * q * (1.0 - 0.5 * q).powi(3),
            KernelKind::CubicSpline => {
                if q < 1.0 {
                    -3.0 * q + 2.25 * q * q
                } else {
                    -0.75 * (2.0 - q).powi(2)
                }
            }
        };
        self.norm * df / self.h
    }

    /// Gradient of W_ij with respect to x_i, `displacement = x_i - x_j`.
    /// Zero for coincident particles.
    pub fn gradient(&self, displacement: &NVec3) -> NVec3 {
        let r = displacement.norm();
        if r < COINCIDENT_DISTANCE {
            return NVec3::zeros();
        }
        displacement * (self.dw(r) / r)
    }
}
