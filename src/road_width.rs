//! Local carriageway width at the endpoints of a candidate link.
//!
//! The estimate integrates the skeleton shrink times along a bounded
//! neighborhood of inner bisectors, privileging edges that run close to
//! parallel with the link. Skeleton times are inradii, so the sum of the two
//! endpoint times of an edge is the local width of the carriageway there.

use std::collections::{BTreeMap, HashMap};

use crate::geometry::{distance, unit};
use crate::skeleton::{PathLink, SkEdgeId, Skeleton, SkeletonLocation, SkeletonPoint};

/// DFS frontier entry: a vertex reached at some accumulated distance.
struct Visit {
    vertex: crate::skeleton::SkVertexId,
    dist: f64,
}

/// Collects every inner-bisector edge reachable from `origin` within
/// `radius`, keyed by the smallest accumulated distance at which its nearer
/// endpoint was reached.
fn neighborhood(
    skeleton: &Skeleton,
    origin: &SkeletonPoint,
    radius: f64,
) -> BTreeMap<SkEdgeId, f64> {
    let mut best: BTreeMap<SkEdgeId, f64> = BTreeMap::new();
    let mut stack: Vec<Visit> = Vec::new();

    match origin.location {
        SkeletonLocation::Vertex(v) => stack.push(Visit { vertex: v, dist: 0.0 }),
        SkeletonLocation::Edge(e, p) => {
            let (a, b) = skeleton.edge_endpoints(e);
            if skeleton.is_inner_bisector(e) {
                best.insert(e, 0.0);
            }
            stack.push(Visit {
                vertex: a,
                dist: distance(p, skeleton.point(a)),
            });
            stack.push(Visit {
                vertex: b,
                dist: distance(p, skeleton.point(b)),
            });
        }
    }

    while let Some(Visit { vertex, dist }) = stack.pop() {
        if dist > radius {
            continue;
        }
        for &h in skeleton.outgoing(vertex) {
            let e = h.edge();
            if !skeleton.is_inner_bisector(e) {
                continue;
            }
            let known = best.get(&e).copied();
            if known.map_or(true, |d| dist < d) {
                best.insert(e, dist);
                let next = skeleton.target(h);
                stack.push(Visit {
                    vertex: next,
                    dist: dist + skeleton.edge_length(e),
                });
            }
        }
    }
    best
}

/// Width estimate at one endpoint of the link.
fn endpoint_width(
    skeleton: &Skeleton,
    origin: &SkeletonPoint,
    link_dir: (f64, f64),
    radius: f64,
) -> f64 {
    let edges = neighborhood(skeleton, origin, radius);

    let mut weight_sum = 0.0;
    let mut width_sum = 0.0;
    for (&e, &d) in &edges {
        let (a, b) = skeleton.edge_endpoints(e);
        let pa = skeleton.point(a);
        let pb = skeleton.point(b);
        let len = distance(pa, pb);
        if len < f64::EPSILON {
            continue;
        }
        let dir = unit((pb.x - pa.x, pb.y - pa.y));
        let cos = (dir.0 * link_dir.0 + dir.1 * link_dir.1).abs();
        let c = (cos / 2.0 + 0.5) * len * radius / (d + 1.0);
        let w = skeleton.time(a) + skeleton.time(b);
        weight_sum += c;
        width_sum += c * w;
    }

    if weight_sum > 0.0 {
        return width_sum / weight_sum;
    }

    // Empty neighborhood: fall back to the local time alone.
    match origin.location {
        SkeletonLocation::Vertex(v) => 2.0 * skeleton.time(v),
        SkeletonLocation::Edge(e, _) => {
            let (a, b) = skeleton.edge_endpoints(e);
            skeleton.time(a) + skeleton.time(b)
        }
    }
}

/// Estimates the carriageway width at both endpoints of `link`.
pub fn road_width(
    link: &PathLink,
    skeletons: &HashMap<usize, Skeleton>,
    radius: f64,
) -> (f64, f64) {
    let dir = unit((
        link.second.point.x - link.first.point.x,
        link.second.point.y - link.first.point.y,
    ));
    let w1 = skeletons
        .get(&link.first.path)
        .map(|sk| endpoint_width(sk, &link.first, dir, radius))
        .unwrap_or(0.0);
    let w2 = skeletons
        .get(&link.second.path)
        .map(|sk| endpoint_width(sk, &link.second, dir, radius))
        .unwrap_or(0.0);
    (w1, w2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::skeleton::SkeletonPoint;

    /// Straight spine along x with uniform time 3: the carriageway is 6 wide
    /// everywhere, so every estimate must come out at 6.
    fn straight_skeleton() -> Skeleton {
        let mut sk = Skeleton::new();
        let mut prev = sk.add_vertex(Point::new(0.0, 0.0), 3.0);
        for i in 1..=5 {
            let v = sk.add_vertex(Point::new(10.0 * i as f64, 0.0), 3.0);
            sk.add_edge(prev, v);
            prev = v;
        }
        sk
    }

    #[test]
    fn uniform_spine_gives_uniform_width() {
        let sk = straight_skeleton();
        let a = SkeletonPoint::at_vertex(0, &sk, crate::skeleton::SkVertexId(5));
        let b = SkeletonPoint::at_vertex(1, &sk, crate::skeleton::SkVertexId(0));
        let mut skeletons = HashMap::new();
        skeletons.insert(0usize, sk.clone());
        skeletons.insert(1usize, sk);
        let link = PathLink::new(a, b);
        let (w1, w2) = road_width(&link, &skeletons, 50.0);
        assert!((w1 - 6.0).abs() < 1e-9);
        assert!((w2 - 6.0).abs() < 1e-9);
    }

    #[test]
    fn isolated_vertex_falls_back_to_time() {
        let mut sk = Skeleton::new();
        let v = sk.add_vertex(Point::new(0.0, 0.0), 2.5);
        let far = sk.add_vertex(Point::new(1.0, 0.0), 0.0);
        sk.add_edge(v, far); // contour edge, not an inner bisector
        let a = SkeletonPoint::at_vertex(0, &sk, v);
        let b = SkeletonPoint::at_vertex(1, &sk, far);
        let mut skeletons = HashMap::new();
        skeletons.insert(0usize, sk);
        let link = PathLink::new(a, b);
        let (w1, _) = road_width(&link, &skeletons, 50.0);
        assert!((w1 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn traversal_respects_radius() {
        let sk = straight_skeleton();
        let origin = SkeletonPoint::at_vertex(0, &sk, crate::skeleton::SkVertexId(0));
        let edges = neighborhood(&sk, &origin, 15.0);
        // Edges starting within 15 units: (0,1) at 0 and (1,2) at 10.
        assert_eq!(edges.len(), 2);
    }
}
