//! Ribbon surface and the closed tube volumes spliced into the master mesh.
//!
//! The support tube extrudes the ribbon downward to make a thin volume for
//! the boolean union; the removal tube extrudes it upward to carve the
//! clearance for the boolean difference. Both are closed, outward-oriented
//! 2-manifolds; the carriageway-side faces carry the bridge label.

use geo_types::Polygon;

use crate::bridge::PathBridge;
use crate::config::ReconstructionConfig;
use crate::geometry::{Point, Point3};
use crate::mesh::{Label, SurfaceMesh, VertexId};

/// Diagnostic strip of the solved ribbon alone, two triangles per segment.
pub fn ribbon_surface(bridge: &PathBridge) -> SurfaceMesh {
    let mut mesh = SurfaceMesh::new();
    let n = bridge.n;
    let mut left = Vec::with_capacity(n + 1);
    let mut right = Vec::with_capacity(n + 1);
    for i in 0..=n {
        left.push(mesh.add_vertex(bridge.left_point(i)));
        right.push(mesh.add_vertex(bridge.right_point(i)));
    }
    for i in 0..n {
        let f0 = mesh.add_face(left[i], right[i], right[i + 1]);
        let f1 = mesh.add_face(left[i], right[i + 1], left[i + 1]);
        mesh.label[f0.idx()] = bridge.label;
        mesh.label[f1.idx()] = bridge.label;
    }
    mesh
}

fn shifted(p: Point3, dz: f64) -> Point3 {
    Point3::new(p.x, p.y, p.z + dz)
}

/// Closed prism between the ribbon and a vertical copy of it. `dz` is the
/// signed offset of the second sheet; the ribbon sheet gets the bridge
/// label regardless of which side of the prism it ends up on, because the
/// ribbon is the carriageway surface a boolean copies into the mesh. For
/// the support tube that sheet is the literal top; for the removal tube it
/// is the bottom, and the raised clearance ceiling stays unlabelled.
/// Orientation keeps every normal outward for either sign of `dz`.
fn extruded_tube(bridge: &PathBridge, dz: f64) -> SurfaceMesh {
    let mut mesh = SurfaceMesh::new();
    let n = bridge.n;
    let mut rib_l: Vec<VertexId> = Vec::with_capacity(n + 1);
    let mut rib_r: Vec<VertexId> = Vec::with_capacity(n + 1);
    let mut off_l: Vec<VertexId> = Vec::with_capacity(n + 1);
    let mut off_r: Vec<VertexId> = Vec::with_capacity(n + 1);
    for i in 0..=n {
        rib_l.push(mesh.add_vertex(bridge.left_point(i)));
        rib_r.push(mesh.add_vertex(bridge.right_point(i)));
        off_l.push(mesh.add_vertex(shifted(bridge.left_point(i), dz)));
        off_r.push(mesh.add_vertex(shifted(bridge.right_point(i), dz)));
    }

    // With dz < 0 the ribbon is the upper sheet, with dz > 0 the lower one.
    let (up_l, up_r, dn_l, dn_r, ribbon_on_top) = if dz < 0.0 {
        (&rib_l, &rib_r, &off_l, &off_r, true)
    } else {
        (&off_l, &off_r, &rib_l, &rib_r, false)
    };

    for i in 0..n {
        // Upper sheet, normals up.
        let t0 = mesh.add_face(up_l[i], up_r[i + 1], up_r[i]);
        let t1 = mesh.add_face(up_l[i], up_l[i + 1], up_r[i + 1]);
        // Lower sheet, normals down.
        let b0 = mesh.add_face(dn_l[i], dn_r[i], dn_r[i + 1]);
        let b1 = mesh.add_face(dn_l[i], dn_r[i + 1], dn_l[i + 1]);
        let (ribbon_faces, other_faces) = if ribbon_on_top {
            ([t0, t1], [b0, b1])
        } else {
            ([b0, b1], [t0, t1])
        };
        for f in ribbon_faces {
            mesh.label[f.idx()] = bridge.label;
        }
        for f in other_faces {
            mesh.label[f.idx()] = Label::Other;
        }
        // Left wall, outward along -normal.
        mesh.add_face(up_l[i], dn_l[i], dn_l[i + 1]);
        mesh.add_face(up_l[i], dn_l[i + 1], up_l[i + 1]);
        // Right wall, outward along +normal.
        mesh.add_face(up_r[i], up_r[i + 1], dn_r[i + 1]);
        mesh.add_face(up_r[i], dn_r[i + 1], dn_r[i]);
    }
    // End caps.
    mesh.add_face(up_l[0], up_r[0], dn_r[0]);
    mesh.add_face(up_l[0], dn_r[0], dn_l[0]);
    mesh.add_face(up_l[n], dn_r[n], up_r[n]);
    mesh.add_face(up_l[n], dn_l[n], dn_r[n]);

    mesh.compute_normal_angle_coefs();
    mesh
}

/// Thin closed volume below the ribbon, unioned into the master mesh.
pub fn support_tube(bridge: &PathBridge, config: &ReconstructionConfig) -> SurfaceMesh {
    extruded_tube(bridge, -config.tunnel_height / 6.0)
}

/// Closed clearance volume above (and including) the ribbon, subtracted from
/// the master mesh. Its bottom sheet is the ribbon and carries the bridge
/// label, so the tunnel floor a difference carves out of an obstruction is
/// classified as carriageway, not the clearance ceiling above it.
pub fn removal_tube(bridge: &PathBridge, config: &ReconstructionConfig) -> SurfaceMesh {
    extruded_tube(bridge, config.tunnel_height)
}

fn point_in_rings(p: Point, polygon: &Polygon<f64>) -> bool {
    let mut inside = ring_contains(p, polygon.exterior().0.as_slice());
    if inside {
        for hole in polygon.interiors() {
            if ring_contains(p, hole.0.as_slice()) {
                inside = false;
                break;
            }
        }
    }
    inside
}

fn ring_contains(p: Point, ring: &[geo_types::Coord<f64>]) -> bool {
    let mut inside = false;
    if ring.is_empty() {
        return inside;
    }
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let pi = ring[i];
        let pj = ring[j];
        if ((pi.y > p.y) != (pj.y > p.y))
            && (p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Thin closed extrusion of a path polygon at a fixed elevation, used to
/// corefine the removal tube with the path a bridge crosses. Returns `None`
/// when the polygon cannot be triangulated.
pub fn polygon_tube(polygon: &Polygon<f64>, z: f64, thickness: f64) -> Option<SurfaceMesh> {
    let mut coords: Vec<(f64, f64)> = Vec::new();
    let mut edges: Vec<(usize, usize)> = Vec::new();
    // The wall pairing below needs the solid on the left of every ring edge:
    // exterior counter-clockwise, holes clockwise.
    let mut add_ring = |ring: &[geo_types::Coord<f64>],
                        want_ccw: bool,
                        coords: &mut Vec<(f64, f64)>,
                        edges: &mut Vec<(usize, usize)>| {
        // Rings repeat the first coordinate at the end.
        let open = &ring[..ring.len().saturating_sub(1)];
        if open.len() < 3 {
            return;
        }
        let mut signed = 0.0;
        for k in 0..open.len() {
            let a = open[k];
            let b = open[(k + 1) % open.len()];
            signed += a.x * b.y - b.x * a.y;
        }
        let mut ordered: Vec<geo_types::Coord<f64>> = open.to_vec();
        if (signed > 0.0) != want_ccw {
            ordered.reverse();
        }
        let start = coords.len();
        for c in &ordered {
            coords.push((c.x, c.y));
        }
        for k in 0..ordered.len() {
            edges.push((start + k, start + (k + 1) % ordered.len()));
        }
    };
    add_ring(polygon.exterior().0.as_slice(), true, &mut coords, &mut edges);
    for hole in polygon.interiors() {
        add_ring(hole.0.as_slice(), false, &mut coords, &mut edges);
    }
    if coords.len() < 3 {
        return None;
    }
    let triangles = cdt::triangulate_with_edges(&coords, &edges).ok()?;

    let mut mesh = SurfaceMesh::new();
    let mut top = Vec::with_capacity(coords.len());
    let mut bottom = Vec::with_capacity(coords.len());
    for &(x, y) in &coords {
        top.push(mesh.add_vertex(Point3::new(x, y, z + thickness)));
        bottom.push(mesh.add_vertex(Point3::new(x, y, z)));
    }
    for (a, b, c) in triangles {
        let centroid = Point::new(
            (coords[a].0 + coords[b].0 + coords[c].0) / 3.0,
            (coords[a].1 + coords[b].1 + coords[c].1) / 3.0,
        );
        if !point_in_rings(centroid, polygon) {
            continue;
        }
        mesh.add_face(top[a], top[b], top[c]);
        mesh.add_face(bottom[a], bottom[c], bottom[b]);
    }
    // Side walls along every constrained ring edge.
    for &(a, b) in &edges {
        mesh.add_face(top[a], bottom[b], top[b]);
        mesh.add_face(top[a], bottom[a], bottom[b]);
    }
    mesh.compute_normal_angle_coefs();
    Some(mesh)
}
