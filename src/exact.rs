//! Exact rational coordinates used through the boolean corefinement pipeline.
//!
//! Queries on the master mesh run on plain `f64`; every constructed
//! intersection point is kept as a rational so cascaded booleans do not
//! accumulate rounding. The two representations are synchronized only at the
//! start and the end of an integration.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::geometry::Point3;

/// A 3D point with arbitrary-precision rational coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExactPoint3 {
    pub x: BigRational,
    pub y: BigRational,
    pub z: BigRational,
}

fn rational(v: f64) -> BigRational {
    BigRational::from_float(v).unwrap_or_else(|| BigRational::from_integer(BigInt::from(0)))
}

impl ExactPoint3 {
    pub fn new(x: BigRational, y: BigRational, z: BigRational) -> Self {
        Self { x, y, z }
    }

    /// Converts an inexact point, exactly (every finite `f64` is rational).
    pub fn from_point(p: Point3) -> Self {
        Self::new(rational(p.x), rational(p.y), rational(p.z))
    }

    /// Rounds back to the nearest representable inexact point.
    pub fn to_point(&self) -> Point3 {
        Point3::new(
            self.x.to_f64().unwrap_or(0.0),
            self.y.to_f64().unwrap_or(0.0),
            self.z.to_f64().unwrap_or(0.0),
        )
    }

    fn sub(&self, other: &Self) -> Self {
        Self::new(
            &self.x - &other.x,
            &self.y - &other.y,
            &self.z - &other.z,
        )
    }

    /// Linear interpolation `self + t * (other - self)`.
    pub fn lerp(&self, other: &Self, t: &BigRational) -> Self {
        Self::new(
            &self.x + t * (&other.x - &self.x),
            &self.y + t * (&other.y - &self.y),
            &self.z + t * (&other.z - &self.z),
        )
    }
}

fn cross(a: &ExactPoint3, b: &ExactPoint3) -> ExactPoint3 {
    ExactPoint3::new(
        &a.y * &b.z - &a.z * &b.y,
        &a.z * &b.x - &a.x * &b.z,
        &a.x * &b.y - &a.y * &b.x,
    )
}

fn dot(a: &ExactPoint3, b: &ExactPoint3) -> BigRational {
    &a.x * &b.x + &a.y * &b.y + &a.z * &b.z
}

/// Signed volume of the tetrahedron `(a, b, c, p)`; the sign tells on which
/// side of the oriented plane `(a, b, c)` the point `p` lies.
pub fn orient3d(a: &ExactPoint3, b: &ExactPoint3, c: &ExactPoint3, p: &ExactPoint3) -> BigRational {
    let u = b.sub(a);
    let v = c.sub(a);
    let w = p.sub(a);
    dot(&cross(&u, &v), &w)
}

/// Exact 2D orientation of the XY projections.
pub fn orient2d_xy(a: &ExactPoint3, b: &ExactPoint3, c: &ExactPoint3) -> BigRational {
    (&b.x - &a.x) * (&c.y - &a.y) - (&b.y - &a.y) * (&c.x - &a.x)
}

/// Clips triangle `tri` against the plane of triangle `plane` and returns the
/// segment where `tri` crosses that plane, or `None` when `tri` lies fully on
/// one side (or in the plane itself).
fn plane_crossing(
    tri: &[ExactPoint3; 3],
    plane: &[ExactPoint3; 3],
) -> Option<(ExactPoint3, ExactPoint3)> {
    let d: Vec<BigRational> = tri
        .iter()
        .map(|p| orient3d(&plane[0], &plane[1], &plane[2], p))
        .collect();
    if d.iter().all(|v| !v.is_negative()) || d.iter().all(|v| !v.is_positive()) {
        return None;
    }
    let mut hits: Vec<ExactPoint3> = Vec::with_capacity(2);
    for i in 0..3 {
        let j = (i + 1) % 3;
        let (di, dj) = (&d[i], &d[j]);
        if di.is_zero() {
            hits.push(tri[i].clone());
        } else if (di.is_positive() && dj.is_negative()) || (di.is_negative() && dj.is_positive()) {
            let t = di / (di - dj);
            hits.push(tri[i].lerp(&tri[j], &t));
        }
    }
    hits.dedup();
    if hits.len() < 2 {
        return None;
    }
    Some((hits[0].clone(), hits[1].clone()))
}

fn axis_value(p: &ExactPoint3, axis: usize) -> &BigRational {
    match axis {
        0 => &p.x,
        1 => &p.y,
        _ => &p.z,
    }
}

/// Intersection segment of two non-coplanar triangles, or `None` when they do
/// not intersect in a segment. Coplanar overlaps are reported as `None`; the
/// corefinement treats them as already conforming.
pub fn triangle_intersection(
    a: &[ExactPoint3; 3],
    b: &[ExactPoint3; 3],
) -> Option<(ExactPoint3, ExactPoint3)> {
    let (a0, a1) = plane_crossing(a, b)?;
    let (b0, b1) = plane_crossing(b, a)?;

    // Both segments lie on the intersection line of the two planes. Order
    // them along the dominant axis of that line and keep the overlap.
    let dir = a1.sub(&a0);
    let axis = {
        let ax = dir.x.abs();
        let ay = dir.y.abs();
        let az = dir.z.abs();
        if ax >= ay && ax >= az {
            0
        } else if ay >= az {
            1
        } else {
            2
        }
    };
    let key = |p: &ExactPoint3| axis_value(p, axis).clone();
    let (mut lo_a, mut hi_a) = (a0.clone(), a1.clone());
    if key(&lo_a) > key(&hi_a) {
        std::mem::swap(&mut lo_a, &mut hi_a);
    }
    let (mut lo_b, mut hi_b) = (b0.clone(), b1.clone());
    if key(&lo_b) > key(&hi_b) {
        std::mem::swap(&mut lo_b, &mut hi_b);
    }
    let lo = if key(&lo_a) >= key(&lo_b) { lo_a } else { lo_b };
    let hi = if key(&hi_a) <= key(&hi_b) { hi_a } else { hi_b };
    if key(&lo) >= key(&hi) {
        return None;
    }
    Some((lo, hi))
}

/// Returns `true` when the XY projection of `p` lies inside (or on the
/// boundary of) the XY projection of the triangle.
pub fn triangle_contains_xy(tri: &[ExactPoint3; 3], p: &ExactPoint3) -> bool {
    let d0 = orient2d_xy(&tri[0], &tri[1], p);
    let d1 = orient2d_xy(&tri[1], &tri[2], p);
    let d2 = orient2d_xy(&tri[2], &tri[0], p);
    let has_neg = d0.is_negative() || d1.is_negative() || d2.is_negative();
    let has_pos = d0.is_positive() || d1.is_positive() || d2.is_positive();
    !(has_neg && has_pos)
}

/// Elevation of the supporting plane of `tri` above the XY location of `p`.
/// `None` for a vertical triangle.
pub fn plane_z_at(tri: &[ExactPoint3; 3], p: &ExactPoint3) -> Option<BigRational> {
    let u = tri[1].sub(&tri[0]);
    let v = tri[2].sub(&tri[0]);
    let n = cross(&u, &v);
    if n.z.is_zero() {
        return None;
    }
    // n . (q - tri[0]) = 0 solved for q.z
    let dx = &p.x - &tri[0].x;
    let dy = &p.y - &tri[0].y;
    Some(&tri[0].z - (&n.x * dx + &n.y * dy) / &n.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xp(x: f64, y: f64, z: f64) -> ExactPoint3 {
        ExactPoint3::from_point(Point3::new(x, y, z))
    }

    #[test]
    fn roundtrip_is_exact_for_floats() {
        let p = xp(0.1, -2.5, 1e9);
        let q = p.to_point();
        assert_eq!(q.x, 0.1);
        assert_eq!(q.y, -2.5);
        assert_eq!(q.z, 1e9);
    }

    #[test]
    fn orientation_sign() {
        let a = xp(0.0, 0.0, 0.0);
        let b = xp(1.0, 0.0, 0.0);
        let c = xp(0.0, 1.0, 0.0);
        assert!(orient3d(&a, &b, &c, &xp(0.0, 0.0, 1.0)).is_positive());
        assert!(orient3d(&a, &b, &c, &xp(0.0, 0.0, -1.0)).is_negative());
        assert!(orient3d(&a, &b, &c, &xp(0.5, 0.5, 0.0)).is_zero());
    }

    #[test]
    fn crossing_triangles_intersect_in_segment() {
        // Horizontal triangle crossed by a vertical one.
        let a = [xp(0.0, 0.0, 0.0), xp(4.0, 0.0, 0.0), xp(0.0, 4.0, 0.0)];
        let b = [xp(1.0, -1.0, -1.0), xp(1.0, 3.0, -1.0), xp(1.0, 1.0, 2.0)];
        let (p, q) = triangle_intersection(&a, &b).unwrap();
        assert!(p.z.is_zero() && q.z.is_zero());
        assert_eq!(p.x.to_f64().unwrap(), 1.0);
        assert_eq!(q.x.to_f64().unwrap(), 1.0);
    }

    #[test]
    fn disjoint_triangles_do_not_intersect() {
        let a = [xp(0.0, 0.0, 0.0), xp(1.0, 0.0, 0.0), xp(0.0, 1.0, 0.0)];
        let b = [xp(0.0, 0.0, 5.0), xp(1.0, 0.0, 5.0), xp(0.0, 1.0, 5.0)];
        assert!(triangle_intersection(&a, &b).is_none());
    }

    #[test]
    fn containment_and_plane_height() {
        let tri = [xp(0.0, 0.0, 1.0), xp(2.0, 0.0, 1.0), xp(0.0, 2.0, 3.0)];
        let inside = xp(0.5, 0.5, 0.0);
        assert!(triangle_contains_xy(&tri, &inside));
        let z = plane_z_at(&tri, &inside).unwrap();
        assert_eq!(z.to_f64().unwrap(), 1.5);
        let outside = xp(3.0, 3.0, 0.0);
        assert!(!triangle_contains_xy(&tri, &outside));
    }
}
