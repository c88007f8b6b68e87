//! Geometry collaborators: shape queries and lattice particle generation.
//!
//! Shapes are only consulted while generating particles and inside
//! boundary-condition updates; the cell-linked list and relations never see them.

use crate::simulation::states::{Dimension, NVec3, Particle};

/// Queries a body shape answers
pub trait Shape: Send + Sync {
    fn contains_point(&self, p: &NVec3) -> bool;

    fn closest_point_on_surface(&self, p: &NVec3) -> NVec3;

    /// Signed distance (negative inside) and outward unit normal at the closest surface point
    fn signed_distance_and_normal(&self, p: &NVec3) -> (f64, NVec3);

    /// Axis-aligned bounds enclosing the shape
    fn bounds(&self) -> BoundingBox;
}

/// Axis-aligned box. Also used as the system domain.
/// Axes with zero extent (the z axis of a 2D system) are ignored by the surface queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lower: NVec3,
    pub upper: NVec3,
}

impl BoundingBox {
    pub fn new(lower: NVec3, upper: NVec3) -> Self {
        Self { lower, upper }
    }

    pub fn extent(&self) -> NVec3 {
        self.upper - self.lower
    }

    pub fn is_valid(&self) -> bool {
        (0..3).all(|k| self.lower[k].is_finite() && self.upper[k].is_finite() && self.upper[k] >= self.lower[k])
    }

    /// Closed containment test
    pub fn contains(&self, p: &NVec3) -> bool {
        (0..3).all(|k| p[k] >= self.lower[k] && p[k] <= self.upper[k])
    }

    pub fn clamp(&self, p: &NVec3) -> NVec3 {
        NVec3::new(
            p.x.clamp(self.lower.x, self.upper.x),
            p.y.clamp(self.lower.y, self.upper.y),
            p.z.clamp(self.lower.z, self.upper.z),
        )
    }

    /// Axis and outward sign of the face nearest to an interior point, with its distance
    fn nearest_face(&self, p: &NVec3) -> (usize, f64, f64) {
        let mut best = (0, 1.0, f64::INFINITY);
        for k in 0..3 {
            if self.upper[k] <= self.lower[k] {
                continue; // flat axis
            }
            let to_lower = p[k] - self.lower[k];
            let to_upper = self.upper[k] - p[k];
            if to_lower < best.2 {
                best = (k, -1.0, to_lower);
            }
            if to_upper < best.2 {
                best = (k, 1.0, to_upper);
            }
        }
        best
    }
}

impl Shape for BoundingBox {
    fn contains_point(&self, p: &NVec3) -> bool {
        self.contains(p)
    }

    fn closest_point_on_surface(&self, p: &NVec3) -> NVec3 {
        if !self.contains(p) {
            return self.clamp(p);
        }
        let (axis, sign, _) = self.nearest_face(p);
        let mut q = *p;
        q[axis] = if sign > 0.0 { self.upper[axis] } else { self.lower[axis] };
        q
    }

    fn signed_distance_and_normal(&self, p: &NVec3) -> (f64, NVec3) {
        if !self.contains(p) {
            let offset = p - self.clamp(p);
            let d = offset.norm();
            return (d, offset / d);
        }
        let (axis, sign, d) = self.nearest_face(p);
        let mut n = NVec3::zeros();
        n[axis] = sign;
        (-d, n)
    }

    fn bounds(&self) -> BoundingBox {
        *self
    }
}

/// Region inside `outer` but not strictly inside `inner`, e.g. the walls of a tank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxShell {
    pub outer: BoundingBox,
    pub inner: BoundingBox,
}

impl BoxShell {
    fn strictly_inside_inner(&self, p: &NVec3) -> bool {
        (0..3).all(|k| {
            let flat = self.inner.upper[k] <= self.inner.lower[k];
            flat || (p[k] > self.inner.lower[k] && p[k] < self.inner.upper[k])
        })
    }
}

impl Shape for BoxShell {
    fn contains_point(&self, p: &NVec3) -> bool {
        self.outer.contains(p) && !self.strictly_inside_inner(p)
    }

    fn closest_point_on_surface(&self, p: &NVec3) -> NVec3 {
        let (d_outer, _) = self.outer.signed_distance_and_normal(p);
        let (d_inner, _) = self.inner.signed_distance_and_normal(p);
        // the shell surface is the outer surface or the cavity surface, whichever is closer
        if d_outer.abs() <= d_inner.abs() {
            self.outer.closest_point_on_surface(p)
        } else {
            self.inner.closest_point_on_surface(p)
        }
    }

    fn signed_distance_and_normal(&self, p: &NVec3) -> (f64, NVec3) {
        let (d_outer, n_outer) = self.outer.signed_distance_and_normal(p);
        let (d_inner, n_inner) = self.inner.signed_distance_and_normal(p);
        // subtraction: max(d_outer, -d_inner)
        if d_outer >= -d_inner {
            (d_outer, n_outer)
        } else {
            (-d_inner, -n_inner)
        }
    }

    fn bounds(&self) -> BoundingBox {
        self.outer
    }
}

/// Fill a shape with particles on a regular lattice of `spacing`,
/// sampled at cell centers of the shape bounds.
/// In 2D the lattice lies in the mid plane of the bounds' z range.
pub fn lattice_particles(shape: &dyn Shape, spacing: f64, dimension: Dimension, rho0: f64) -> Vec<Particle> {
    let bounds = shape.bounds();
    let extent = bounds.extent();
    let count = |k: usize| ((extent[k] / spacing).round() as usize).max(1);
    let (nx, ny) = (count(0), count(1));
    let nz = if dimension == Dimension::Three { count(2) } else { 1 };
    let vol = spacing.powi(dimension.axes() as i32);

    let mut particles = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let z = match dimension {
                    Dimension::Three => bounds.lower.z + (k as f64 + 0.5) * spacing,
                    Dimension::Two => 0.5 * (bounds.lower.z + bounds.upper.z),
                };
                let x = NVec3::new(
                    bounds.lower.x + (i as f64 + 0.5) * spacing,
                    bounds.lower.y + (j as f64 + 0.5) * spacing,
                    z,
                );
                if shape.contains_point(&x) {
                    particles.push(Particle::new(x, vol, rho0));
                }
            }
        }
    }
    particles
}
