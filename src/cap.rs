//! Closes an open surface into a volume-bounding mesh.
//!
//! The open border of a terrain tile is a single cycle. The utility drops a
//! skirt below it: one auxiliary ring on the bottom plane, a second one ten
//! units further down, side quads between border and skirt, and an
//! ear-clipped bottom polygon. Every added face is marked as not belonging
//! to the true surface.

use log::warn;

use crate::geometry::{orient2d, Point, Point3};
use crate::mesh::{SurfaceMesh, VertexId};

/// Ear-clips a simple polygon given in counter-clockwise order. Returns
/// index triples in counter-clockwise winding.
fn ear_clip(points: &[Point]) -> Vec<[usize; 3]> {
    let n = points.len();
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::with_capacity(n.saturating_sub(2));
    let mut guard = 0usize;
    while remaining.len() > 3 && guard < n * n {
        guard += 1;
        let m = remaining.len();
        let mut clipped = false;
        for k in 0..m {
            let ia = remaining[(k + m - 1) % m];
            let ib = remaining[k];
            let ic = remaining[(k + 1) % m];
            // Convex corner.
            if orient2d(points[ia], points[ib], points[ic]) <= 0.0 {
                continue;
            }
            // No other remaining vertex inside the candidate ear.
            let ear_is_empty = remaining.iter().all(|&j| {
                if j == ia || j == ib || j == ic {
                    return true;
                }
                let p = points[j];
                orient2d(points[ia], points[ib], p) <= 0.0
                    || orient2d(points[ib], points[ic], p) <= 0.0
                    || orient2d(points[ic], points[ia], p) <= 0.0
            });
            if ear_is_empty {
                triangles.push([ia, ib, ic]);
                remaining.remove(k);
                clipped = true;
                break;
            }
        }
        if !clipped {
            // Degenerate remainder; fan it out rather than loop forever.
            break;
        }
    }
    if remaining.len() >= 3 {
        let anchor = remaining[0];
        for w in remaining[1..].windows(2) {
            triangles.push([anchor, w[0], w[1]]);
        }
    }
    triangles
}

/// Closes a mesh with exactly one boundary cycle. Returns `false` (leaving
/// the mesh untouched) when the boundary is not a single cycle.
pub fn close_mesh(mesh: &mut SurfaceMesh) -> bool {
    let cycles = mesh.boundary_cycles();
    if cycles.len() != 1 {
        warn!(
            "close_mesh expects a single boundary cycle, found {}",
            cycles.len()
        );
        return false;
    }
    let ring = &cycles[0];
    if ring.len() < 3 {
        return false;
    }

    let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
    let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
    for v in mesh.vertices() {
        let p = mesh.point(v);
        min = Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
        max = Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
    }
    let center = Point::new((min.x + max.x) / 2.0, (min.y + max.y) / 2.0);
    let z_min = min.z;

    // The walked border runs clockwise about the center when seen from
    // above; keep it that way and wind the skirt outward.
    let mut ordered: Vec<VertexId> = ring.clone();
    let angle = |v: VertexId| {
        let p = mesh.point(v);
        (p.y - center.y).atan2(p.x - center.x)
    };
    // The cycle already sweeps monotonically about the center for a terrain
    // tile; rotate it so the sweep starts at the smallest angle.
    if let Some(start) = (0..ordered.len()).min_by(|&i, &j| {
        angle(ordered[i])
            .partial_cmp(&angle(ordered[j]))
            .unwrap_or(std::cmp::Ordering::Equal)
    }) {
        ordered.rotate_left(start);
    }

    let k = ordered.len();
    // One auxiliary pair per border vertex swept past.
    let mut skirt = Vec::with_capacity(k);
    let mut bottom = Vec::with_capacity(k);
    for &v in &ordered {
        let p = mesh.point(v);
        skirt.push(mesh.add_vertex(Point3::new(p.x, p.y, z_min)));
        bottom.push(mesh.add_vertex(Point3::new(p.x, p.y, z_min - 10.0)));
    }

    let mut added = Vec::new();
    // Side quads from the border down to the bottom plane, stitched in
    // bounded chunks so a huge border never builds one monster strip.
    let chunk = 50usize.min(k);
    let mut i = 0;
    while i < k {
        let end = (i + chunk).min(k);
        for j in i..end {
            let jn = (j + 1) % k;
            added.push(mesh.add_face(ordered[j], ordered[jn], skirt[jn]));
            added.push(mesh.add_face(ordered[j], skirt[jn], skirt[j]));
        }
        i = end;
    }
    // Skirt quads between the two auxiliary rings.
    for j in 0..k {
        let jn = (j + 1) % k;
        added.push(mesh.add_face(skirt[j], skirt[jn], bottom[jn]));
        added.push(mesh.add_face(skirt[j], bottom[jn], bottom[j]));
    }

    // Bottom polygon, ear-clipped. The ring is clockwise from above, so the
    // clipping runs on the reversed ring and the emitted winding is restored
    // to face downward.
    let pts: Vec<Point> = bottom
        .iter()
        .rev()
        .map(|&v| mesh.point(v).xy())
        .collect();
    for [a, b, c] in ear_clip(&pts) {
        let map = |i: usize| bottom[k - 1 - i];
        added.push(mesh.add_face(map(a), map(c), map(b)));
    }

    for f in added {
        mesh.true_face[f.idx()] = false;
    }
    mesh.is_closed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plate() -> SurfaceMesh {
        let mut m = SurfaceMesh::new();
        let a = m.add_vertex(Point3::new(0.0, 0.0, 3.0));
        let b = m.add_vertex(Point3::new(10.0, 0.0, 3.0));
        let c = m.add_vertex(Point3::new(10.0, 10.0, 4.0));
        let d = m.add_vertex(Point3::new(0.0, 10.0, 3.0));
        m.add_face(a, b, c);
        m.add_face(a, c, d);
        m
    }

    #[test]
    fn plate_closes_into_a_volume() {
        let mut m = plate();
        let open_faces = m.n_faces();
        assert!(close_mesh(&mut m));
        assert!(m.is_closed());
        assert!(m.n_faces() > open_faces);
        // Original faces keep their flag, the closure does not.
        for f in m.faces() {
            if f.idx() < open_faces {
                assert!(m.true_face[f.idx()]);
            } else {
                assert!(!m.true_face[f.idx()]);
            }
        }
        // The skirt reaches the bottom plane and ten below it.
        let min_z = m
            .vertices()
            .map(|v| m.point(v).z)
            .fold(f64::INFINITY, f64::min);
        assert!((min_z - (3.0 - 10.0)).abs() < 1e-9);
    }

    #[test]
    fn closed_volume_has_positive_enclosed_volume() {
        let mut m = plate();
        assert!(close_mesh(&mut m));
        let v6 = crate::corefine::signed_volume6(&m);
        assert!(v6 > 0.0, "volume = {}", v6 / 6.0);
    }

    #[test]
    fn refuses_two_boundary_cycles() {
        let mut m = plate();
        // A second, disconnected plate introduces a second border cycle.
        let a = m.add_vertex(Point3::new(50.0, 0.0, 0.0));
        let b = m.add_vertex(Point3::new(51.0, 0.0, 0.0));
        let c = m.add_vertex(Point3::new(51.0, 1.0, 0.0));
        m.add_face(a, b, c);
        let before = m.n_faces();
        assert!(!close_mesh(&mut m));
        assert_eq!(m.n_faces(), before);
    }

    #[test]
    fn ear_clip_convex_and_reflex() {
        // An L-shaped hexagon, counter-clockwise.
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 2.0),
            Point::new(2.0, 2.0),
            Point::new(2.0, 4.0),
            Point::new(0.0, 4.0),
        ];
        let tris = ear_clip(&pts);
        assert_eq!(tris.len(), 4);
        // Every emitted triangle is counter-clockwise.
        for [a, b, c] in tris {
            assert!(orient2d(pts[a], pts[b], pts[c]) > 0.0);
        }
    }
}
