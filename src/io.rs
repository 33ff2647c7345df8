//! Diagnostic mesh output.
//!
//! The pipeline's contract is the rewritten mesh and cloud; these writers
//! exist so intermediate results (candidate links, per-bridge ribbons) can
//! be inspected. ASCII PLY keeps them trivially loadable.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::aabb::{vertical_hits, AabbTree};
use crate::bridge::PathBridge;
use crate::geometry::Point3;
use crate::mesh::SurfaceMesh;
use crate::ribbon::ribbon_surface;
use crate::skeleton::PathLink;

/// Writes a surface mesh with its face labels and path ids.
pub fn save_mesh(mesh: &SurfaceMesh, path: &str) -> io::Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "ply")?;
    writeln!(out, "format ascii 1.0")?;
    writeln!(out, "element vertex {}", mesh.n_vertices())?;
    writeln!(out, "property double x")?;
    writeln!(out, "property double y")?;
    writeln!(out, "property double z")?;
    writeln!(out, "element face {}", mesh.n_faces())?;
    writeln!(out, "property list uchar int vertex_indices")?;
    writeln!(out, "property uchar label")?;
    writeln!(out, "property int path")?;
    writeln!(out, "end_header")?;
    for v in mesh.vertices() {
        let p = mesh.point(v);
        writeln!(out, "{} {} {}", p.x, p.y, p.z)?;
    }
    for f in mesh.faces() {
        let [a, b, c] = mesh.face_vertices(f);
        writeln!(
            out,
            "3 {} {} {} {} {}",
            a.0,
            b.0,
            c.0,
            mesh.label[f.idx()] as u8,
            mesh.path[f.idx()]
        )?;
    }
    out.flush()
}

/// Writes a set of 3D segments as a PLY edge mesh, one edge per segment.
pub fn save_segments(segments: &[(Point3, Point3)], path: &str) -> io::Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "ply")?;
    writeln!(out, "format ascii 1.0")?;
    writeln!(out, "element vertex {}", segments.len() * 2)?;
    writeln!(out, "property double x")?;
    writeln!(out, "property double y")?;
    writeln!(out, "property double z")?;
    writeln!(out, "element edge {}", segments.len())?;
    writeln!(out, "property int vertex1")?;
    writeln!(out, "property int vertex2")?;
    writeln!(out, "end_header")?;
    for (a, b) in segments {
        writeln!(out, "{} {} {}", a.x, a.y, a.z)?;
        writeln!(out, "{} {} {}", b.x, b.y, b.z)?;
    }
    for i in 0..segments.len() {
        writeln!(out, "{} {}", 2 * i, 2 * i + 1)?;
    }
    out.flush()
}

/// Writes the candidate link set as one edge per link, with endpoint
/// elevations looked up on the mesh (zero where the lookup misses).
pub fn save_links(
    links: &[PathLink],
    mesh: &SurfaceMesh,
    tree: &AabbTree,
    path: &str,
) -> io::Result<()> {
    let elevation = |p: crate::geometry::Point| {
        vertical_hits(mesh, tree, p).last().map_or(0.0, |h| h.z)
    };
    let segments: Vec<(Point3, Point3)> = links
        .iter()
        .map(|l| {
            let a = l.first.point;
            let b = l.second.point;
            (
                Point3::new(a.x, a.y, elevation(a)),
                Point3::new(b.x, b.y, elevation(b)),
            )
        })
        .collect();
    save_segments(&segments, path)
}

/// File name stem identifying one bridge by label and endpoints.
pub fn bridge_file_stem(prefix: &str, bridge: &PathBridge) -> String {
    format!(
        "{}_{}_{}_{}_{:.1}_{:.1}_{:.1}_{:.1}",
        prefix,
        bridge.label as u8,
        bridge.link.first.path,
        bridge.link.second.path,
        bridge.link.first.point.x,
        bridge.link.first.point.y,
        bridge.link.second.point.x,
        bridge.link.second.point.y,
    )
}

/// Writes the solved ribbon strip of one bridge.
pub fn save_ribbon(bridge: &PathBridge, path: &str) -> io::Result<()> {
    save_mesh(&ribbon_surface(bridge), path)
}

/// Writes the five-segment figure of one bridge: centerline, both border
/// rails and the two end cross-bars.
pub fn save_bridge_figure(bridge: &PathBridge, path: &str) -> io::Result<()> {
    let n = bridge.n;
    let center = |i: usize| {
        let p = bridge.station_base(i);
        Point3::new(p.x, p.y, bridge.z[i])
    };
    let segments = vec![
        (center(0), center(n)),
        (bridge.left_point(0), bridge.left_point(n)),
        (bridge.right_point(0), bridge.right_point(n)),
        (bridge.left_point(0), bridge.right_point(0)),
        (bridge.left_point(n), bridge.right_point(n)),
    ];
    save_segments(&segments, path)
}
