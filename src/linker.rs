//! Candidate bridge enumeration between disconnected path fragments.
//!
//! For every pair of same-label paths (and for each path against itself) the
//! linker tabulates squared distances between skeleton vertices and between
//! vertices and inner-bisector edges, then keeps only the pairs that are
//! local minima: if stepping to any skeleton neighbor of either endpoint
//! shortens the connection, the pair is dominated and dropped. Surviving
//! pairs must leave their polygon the right number of times: once for a
//! cross-path link, twice for a same-path shortcut.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use geo_types::Polygon;
use log::info;

use crate::geometry::{
    polygon_crossing_count, project_on_line, squared_distance, Point,
};
use crate::mesh::{FaceId, Label, SurfaceMesh};
use crate::road_width::road_width;
use crate::skeleton::{PathLink, SkEdgeId, SkVertexId, Skeleton, SkeletonPoint};

type VertexPairTable = BTreeMap<(SkVertexId, SkVertexId), f64>;
type VertexEdgeTable = BTreeMap<(SkVertexId, SkEdgeId), (f64, Point)>;

fn skeleton_vertices(sk: &Skeleton) -> Vec<SkVertexId> {
    sk.vertices().filter(|&v| sk.is_skeleton_vertex(v)).collect()
}

fn inner_edges(sk: &Skeleton) -> Vec<SkEdgeId> {
    sk.edges().filter(|&e| sk.is_inner_bisector(e)).collect()
}

/// Distance table between all skeleton vertices of two (possibly equal)
/// skeletons.
fn vertex_vertex_table(sk1: &Skeleton, sk2: &Skeleton) -> VertexPairTable {
    let mut table = BTreeMap::new();
    for &v1 in &skeleton_vertices(sk1) {
        for &v2 in &skeleton_vertices(sk2) {
            table.insert((v1, v2), squared_distance(sk1.point(v1), sk2.point(v2)));
        }
    }
    table
}

/// Distances from vertices of `sk_v` to inner edges of `sk_e`, kept only
/// when the perpendicular foot lies on the edge itself.
fn vertex_edge_table(sk_v: &Skeleton, sk_e: &Skeleton) -> VertexEdgeTable {
    let mut table = BTreeMap::new();
    for &v in &skeleton_vertices(sk_v) {
        let p = sk_v.point(v);
        for &e in &inner_edges(sk_e) {
            let (a, b) = sk_e.edge_endpoints(e);
            let (foot, t) = project_on_line(sk_e.point(a), sk_e.point(b), p);
            // Strictly interior: a foot at an endpoint is the vertex pair's
            // business, not the edge's.
            if t > 0.0 && t < 1.0 {
                table.insert((v, e), (squared_distance(p, foot), foot));
            }
        }
    }
    table
}

/// Whether any skeleton move away from `v` gets closer to the fixed vertex
/// `other` than `d`. `vv` is keyed `(neighbor, other)`; `ve` is keyed
/// `(other, adjacent edge)`.
fn dominated_at_vertex(
    sk: &Skeleton,
    v: SkVertexId,
    other: SkVertexId,
    d: f64,
    vv: &VertexPairTable,
    ve: &VertexEdgeTable,
) -> bool {
    for (n, h) in sk.skeleton_neighbors(v) {
        if let Some(&dn) = vv.get(&(n, other)) {
            if dn < d {
                return true;
            }
        }
        if let Some(&(de, _)) = ve.get(&(other, h.edge())) {
            if de < d {
                return true;
            }
        }
    }
    false
}

/// Whether any skeleton move away from `v` gets closer to the free point
/// `p` than `d`. A perpendicular foot on an adjacent edge always means a
/// strictly nearer point exists there.
fn dominated_at_point(sk: &Skeleton, v: SkVertexId, p: Point, d: f64) -> bool {
    for (n, h) in sk.skeleton_neighbors(v) {
        if squared_distance(sk.point(n), p) < d {
            return true;
        }
        let (a, b) = sk.edge_endpoints(h.edge());
        let (_, t) = project_on_line(sk.point(a), sk.point(b), p);
        // A foot interior to the adjacent edge is strictly nearer than v.
        if t > 0.0 && t < 1.0 {
            return true;
        }
    }
    false
}

fn crossing_count(a: Point, b: Point, polygon: Option<&Polygon<f64>>) -> Option<usize> {
    polygon.map(|poly| polygon_crossing_count(a, b, poly))
}

/// Exit constraint for a cross-path candidate: exactly one boundary
/// crossing. Without a polygon the constraint cannot be checked and the
/// candidate passes.
fn exits_once(a: Point, b: Point, polygon: Option<&Polygon<f64>>) -> bool {
    crossing_count(a, b, polygon).map_or(true, |c| c == 1)
}

/// Exit constraint for a same-path shortcut: leave and re-enter, exactly two
/// crossings. Without a polygon no shortcut can be justified.
fn exits_twice(a: Point, b: Point, polygon: Option<&Polygon<f64>>) -> bool {
    crossing_count(a, b, polygon) == Some(2)
}

/// Links between two distinct paths. The link must exit the first path's
/// polygon exactly once.
fn link_cross_paths(
    path1: usize,
    path2: usize,
    sk1: &Skeleton,
    sk2: &Skeleton,
    polygon1: Option<&Polygon<f64>>,
    result: &mut BTreeSet<PathLink>,
) {
    let d_vv = vertex_vertex_table(sk1, sk2);
    let d_vv_rev = reversed(&d_vv);
    let d_v1h2 = vertex_edge_table(sk1, sk2);
    let d_v2h1 = vertex_edge_table(sk2, sk1);

    // Vertex-vertex candidates.
    for (&(v1, v2), &d) in &d_vv {
        if dominated_at_vertex(sk1, v1, v2, d, &d_vv, &d_v2h1) {
            continue;
        }
        if dominated_at_vertex(sk2, v2, v1, d, &d_vv_rev, &d_v1h2) {
            continue;
        }
        if !exits_once(sk1.point(v1), sk2.point(v2), polygon1) {
            continue;
        }
        result.insert(PathLink::new(
            SkeletonPoint::at_vertex(path1, sk1, v1),
            SkeletonPoint::at_vertex(path2, sk2, v2),
        ));
    }

    // Vertex on path1 against edge on path2.
    for (&(v1, e2), &(d, p2)) in &d_v1h2 {
        if dominated_at_point(sk1, v1, p2, d) {
            continue;
        }
        if !exits_once(sk1.point(v1), p2, polygon1) {
            continue;
        }
        result.insert(PathLink::new(
            SkeletonPoint::at_vertex(path1, sk1, v1),
            SkeletonPoint::on_edge(path2, e2, p2),
        ));
    }

    // Vertex on path2 against edge on path1.
    for (&(v2, e1), &(d, p1)) in &d_v2h1 {
        if dominated_at_point(sk2, v2, p1, d) {
            continue;
        }
        if !exits_once(sk2.point(v2), p1, polygon1) {
            continue;
        }
        result.insert(PathLink::new(
            SkeletonPoint::at_vertex(path2, sk2, v2),
            SkeletonPoint::on_edge(path1, e1, p1),
        ));
    }
}

/// The vertex-vertex table with its keys swapped, so neighbor lookups around
/// the second endpoint can reuse it.
fn reversed(table: &VertexPairTable) -> VertexPairTable {
    table
        .iter()
        .map(|(&(a, b), &d)| ((b, a), d))
        .collect()
}

/// Shortcut links within one path. The link must leave and re-enter the
/// polygon, crossing its boundary exactly twice. Each unordered pair is
/// emitted once, under the `v1 < v2` convention.
fn link_same_path(
    path: usize,
    sk: &Skeleton,
    polygon: Option<&Polygon<f64>>,
    result: &mut BTreeSet<PathLink>,
) {
    let d_vv = vertex_vertex_table(sk, sk);
    let d_vh = vertex_edge_table(sk, sk);

    for (&(v1, v2), &d) in &d_vv {
        if v1 >= v2 {
            continue;
        }
        if !exits_twice(sk.point(v1), sk.point(v2), polygon) {
            continue;
        }
        // The same-path table holds every ordered pair, so it serves both
        // endpoint neighborhoods directly.
        if dominated_at_vertex(sk, v1, v2, d, &d_vv, &d_vh) {
            continue;
        }
        if dominated_at_vertex(sk, v2, v1, d, &d_vv, &d_vh) {
            continue;
        }
        result.insert(PathLink::new(
            SkeletonPoint::at_vertex(path, sk, v1),
            SkeletonPoint::at_vertex(path, sk, v2),
        ));
    }

    for (&(v1, e2), &(d, p2)) in &d_vh {
        let (a, b) = sk.edge_endpoints(e2);
        if v1 == a || v1 == b {
            continue;
        }
        if !exits_twice(sk.point(v1), p2, polygon) {
            continue;
        }
        if dominated_at_point(sk, v1, p2, d) {
            continue;
        }
        result.insert(PathLink::new(
            SkeletonPoint::at_vertex(path, sk, v1),
            SkeletonPoint::on_edge(path, e2, p2),
        ));
    }
}

/// Enumerates candidate bridges between same-label path fragments.
pub fn link_paths(
    mesh: &SurfaceMesh,
    paths: &[Vec<FaceId>],
    polygons: &HashMap<usize, Polygon<f64>>,
    skeletons: &HashMap<usize, Skeleton>,
) -> BTreeSet<PathLink> {
    let mut result = BTreeSet::new();

    for selected_label in [Label::Road, Label::Rail, Label::Water] {
        let same_label: Vec<usize> = (0..paths.len())
            .filter(|&i| {
                !paths[i].is_empty()
                    && mesh.label[paths[i][0].idx()] == selected_label
                    && skeletons.contains_key(&i)
            })
            .collect();

        for (k, &path1) in same_label.iter().enumerate() {
            link_same_path(
                path1,
                &skeletons[&path1],
                polygons.get(&path1),
                &mut result,
            );
            for &path2 in &same_label[k + 1..] {
                link_cross_paths(
                    path1,
                    path2,
                    &skeletons[&path1],
                    &skeletons[&path2],
                    polygons.get(&path1),
                    &mut result,
                );
            }
        }
    }

    info!("path linker proposed {} candidate links", result.len());
    result
}

/// Drops links whose carriageway is too narrow at either endpoint.
pub fn drop_narrow_links(
    links: BTreeSet<PathLink>,
    skeletons: &HashMap<usize, Skeleton>,
    minimal_path_width: f64,
    neighborhood_radius: f64,
) -> Vec<PathLink> {
    let kept: Vec<PathLink> = links
        .into_iter()
        .filter(|link| {
            let (w1, w2) = road_width(link, skeletons, neighborhood_radius);
            w1 >= minimal_path_width && w2 >= minimal_path_width
        })
        .collect();
    info!("{} links wide enough to bridge", kept.len());
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3;
    use geo_types::LineString;

    /// Two collinear road fragments along x, separated by a gap, with
    /// parallel straight skeletons. The inner skeleton endpoints facing the
    /// gap are the expected link.
    fn collinear_fragments() -> (
        SurfaceMesh,
        Vec<Vec<FaceId>>,
        HashMap<usize, Polygon<f64>>,
        HashMap<usize, Skeleton>,
    ) {
        let mut mesh = SurfaceMesh::new();
        let mut paths = Vec::new();
        let mut polygons = HashMap::new();
        let mut skeletons = HashMap::new();

        for (id, x0) in [(0usize, 0.0f64), (1usize, 30.0f64)] {
            let a = mesh.add_vertex(Point3::new(x0, -3.0, 0.0));
            let b = mesh.add_vertex(Point3::new(x0 + 20.0, -3.0, 0.0));
            let c = mesh.add_vertex(Point3::new(x0 + 20.0, 3.0, 0.0));
            let d = mesh.add_vertex(Point3::new(x0, 3.0, 0.0));
            let f0 = mesh.add_face(a, b, c);
            let f1 = mesh.add_face(a, c, d);
            mesh.label[f0.idx()] = Label::Road;
            mesh.label[f1.idx()] = Label::Road;
            mesh.path[f0.idx()] = id as i32;
            mesh.path[f1.idx()] = id as i32;
            paths.push(vec![f0, f1]);

            polygons.insert(
                id,
                Polygon::new(
                    LineString::from(vec![
                        (x0, -3.0),
                        (x0 + 20.0, -3.0),
                        (x0 + 20.0, 3.0),
                        (x0, 3.0),
                        (x0, -3.0),
                    ]),
                    vec![],
                ),
            );

            let mut sk = Skeleton::new();
            let c0 = sk.add_vertex(Point::new(x0, 0.0), 0.0);
            let s0 = sk.add_vertex(Point::new(x0 + 3.0, 0.0), 3.0);
            let s1 = sk.add_vertex(Point::new(x0 + 17.0, 0.0), 3.0);
            let c1 = sk.add_vertex(Point::new(x0 + 20.0, 0.0), 0.0);
            sk.add_edge(c0, s0);
            sk.add_edge(s0, s1);
            sk.add_edge(s1, c1);
            skeletons.insert(id, sk);
        }
        (mesh, paths, polygons, skeletons)
    }

    #[test]
    fn collinear_gap_yields_single_link() {
        let (mesh, paths, polygons, skeletons) = collinear_fragments();
        let links = link_paths(&mesh, &paths, &polygons, &skeletons);
        // The two facing inner endpoints (x = 17 and x = 33) are the only
        // local minimum across the gap.
        let cross: Vec<&PathLink> = links.iter().filter(|l| !l.is_same_path()).collect();
        assert_eq!(cross.len(), 1);
        let link = cross[0];
        assert!((link.first.point.x - 17.0).abs() < 1e-9);
        assert!((link.second.point.x - 33.0).abs() < 1e-9);
        assert!((link.length() - 16.0).abs() < 1e-9);
    }

    #[test]
    fn dominance_rejects_inland_vertices() {
        let (mesh, paths, polygons, skeletons) = collinear_fragments();
        let links = link_paths(&mesh, &paths, &polygons, &skeletons);
        for link in &links {
            // No surviving endpoint sits at the far ends of either spine.
            assert!(link.first.point.x > 2.9 && link.second.point.x < 47.1);
        }
    }

    #[test]
    fn narrow_paths_are_dropped() {
        let (_, _, _, mut skeletons) = collinear_fragments();
        // Shrink the first skeleton's times below the 2 m gate.
        let narrow = {
            let mut sk = Skeleton::new();
            let a = sk.add_vertex(Point::new(0.0, 0.0), 0.5);
            let b = sk.add_vertex(Point::new(17.0, 0.0), 0.5);
            sk.add_edge(a, b);
            sk
        };
        skeletons.insert(0usize, narrow.clone());
        let a = SkeletonPoint::at_vertex(0, &narrow, crate::skeleton::SkVertexId(1));
        let b = SkeletonPoint::at_vertex(1, &skeletons[&1], crate::skeleton::SkVertexId(1));
        let mut links = BTreeSet::new();
        links.insert(PathLink::new(a, b));
        let kept = drop_narrow_links(links, &skeletons, 2.0, 50.0);
        assert!(kept.is_empty());
    }

    #[test]
    fn same_path_needs_two_crossings() {
        // A U-shaped path: the shortcut across the mouth leaves and
        // re-enters, an interior chord does not and must be rejected.
        let polygon = Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (30.0, 0.0),
                (30.0, 30.0),
                (20.0, 30.0),
                (20.0, 10.0),
                (10.0, 10.0),
                (10.0, 30.0),
                (0.0, 30.0),
                (0.0, 0.0),
            ]),
            vec![],
        );
        let mut sk = Skeleton::new();
        // Two prong tips and the elbow spine.
        let tip_l = sk.add_vertex(Point::new(5.0, 25.0), 5.0);
        let mid_l = sk.add_vertex(Point::new(5.0, 5.0), 5.0);
        let mid_r = sk.add_vertex(Point::new(25.0, 5.0), 5.0);
        let tip_r = sk.add_vertex(Point::new(25.0, 25.0), 5.0);
        sk.add_edge(tip_l, mid_l);
        sk.add_edge(mid_l, mid_r);
        sk.add_edge(mid_r, tip_r);

        let mut result = BTreeSet::new();
        let mut polygons = HashMap::new();
        polygons.insert(0usize, polygon);
        link_same_path(0, &sk, polygons.get(&0), &mut result);
        // The only candidate that crosses the boundary twice is tip-to-tip.
        for link in &result {
            assert!((link.first.point.y - 25.0).abs() < 1e-9);
            assert!((link.second.point.y - 25.0).abs() < 1e-9);
        }
        assert_eq!(result.len(), 1);
    }
}
