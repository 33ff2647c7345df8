//! Straight-skeleton graph model of a path polygon.
//!
//! The skeleton itself is computed by an external collaborator; this module
//! only models the graph the linker and the width estimator traverse: vertex
//! positions with their shrink *time* (distance to the nearest polygon edge)
//! and edges flagged as inner bisectors when both endpoints lie on the
//! medial axis.

use std::cmp::Ordering;

use crate::geometry::{distance, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SkVertexId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SkHalfedgeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SkEdgeId(pub u32);

impl SkVertexId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl SkHalfedgeId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }

    pub fn twin(self) -> SkHalfedgeId {
        SkHalfedgeId(self.0 ^ 1)
    }

    pub fn edge(self) -> SkEdgeId {
        SkEdgeId(self.0 / 2)
    }
}

impl SkEdgeId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }

    /// The half-edge oriented from the lower vertex id to the higher one,
    /// the convention under which per-edge tables are keyed.
    pub fn halfedge(self) -> SkHalfedgeId {
        SkHalfedgeId(self.0 * 2)
    }
}

/// Straight skeleton of one path polygon.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    points: Vec<Point>,
    time: Vec<f64>,
    he_target: Vec<SkVertexId>,
    inner: Vec<bool>,
    outgoing: Vec<Vec<SkHalfedgeId>>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vertex with its shrink time. Contour vertices carry time 0.
    pub fn add_vertex(&mut self, p: Point, time: f64) -> SkVertexId {
        let id = SkVertexId(self.points.len() as u32);
        self.points.push(p);
        self.time.push(time);
        self.outgoing.push(Vec::new());
        id
    }

    /// Adds an undirected skeleton edge. The canonical half-edge runs from
    /// the lower id to the higher one. The inner-bisector flag is derived
    /// from the endpoint times.
    pub fn add_edge(&mut self, a: SkVertexId, b: SkVertexId) -> SkEdgeId {
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let h = SkHalfedgeId(self.he_target.len() as u32);
        self.he_target.push(hi);
        self.he_target.push(lo);
        self.outgoing[lo.idx()].push(h);
        self.outgoing[hi.idx()].push(h.twin());
        self.inner
            .push(self.time[a.idx()] > 0.0 && self.time[b.idx()] > 0.0);
        h.edge()
    }

    pub fn vertices(&self) -> impl Iterator<Item = SkVertexId> {
        (0..self.points.len() as u32).map(SkVertexId)
    }

    pub fn edges(&self) -> impl Iterator<Item = SkEdgeId> {
        (0..self.inner.len() as u32).map(SkEdgeId)
    }

    pub fn point(&self, v: SkVertexId) -> Point {
        self.points[v.idx()]
    }

    /// Shrink time, i.e. the inradius at this skeleton vertex.
    pub fn time(&self, v: SkVertexId) -> f64 {
        self.time[v.idx()]
    }

    /// `true` when the vertex lies on the medial axis rather than on the
    /// polygon contour.
    pub fn is_skeleton_vertex(&self, v: SkVertexId) -> bool {
        self.time[v.idx()] > 0.0
    }

    pub fn is_inner_bisector(&self, e: SkEdgeId) -> bool {
        self.inner[e.idx()]
    }

    pub fn target(&self, h: SkHalfedgeId) -> SkVertexId {
        self.he_target[h.idx()]
    }

    pub fn source(&self, h: SkHalfedgeId) -> SkVertexId {
        self.he_target[h.twin().idx()]
    }

    pub fn edge_endpoints(&self, e: SkEdgeId) -> (SkVertexId, SkVertexId) {
        (self.source(e.halfedge()), self.target(e.halfedge()))
    }

    pub fn edge_length(&self, e: SkEdgeId) -> f64 {
        let (a, b) = self.edge_endpoints(e);
        distance(self.point(a), self.point(b))
    }

    /// Half-edges leaving `v`.
    pub fn outgoing(&self, v: SkVertexId) -> &[SkHalfedgeId] {
        &self.outgoing[v.idx()]
    }

    /// Medial-axis neighbors of `v` together with the connecting half-edge.
    pub fn skeleton_neighbors(&self, v: SkVertexId) -> Vec<(SkVertexId, SkHalfedgeId)> {
        self.outgoing(v)
            .iter()
            .map(|&h| (self.target(h), h))
            .filter(|(n, _)| self.is_skeleton_vertex(*n))
            .collect()
    }
}

/// A point on a skeleton: either one of its vertices or a position
/// constrained to one of its edges.
#[derive(Debug, Clone, Copy)]
pub enum SkeletonLocation {
    Vertex(SkVertexId),
    /// A point interior to an edge, stored with the edge it lies on.
    Edge(SkEdgeId, Point),
}

/// A point on the skeleton of a specific path.
#[derive(Debug, Clone, Copy)]
pub struct SkeletonPoint {
    pub path: usize,
    pub location: SkeletonLocation,
    pub point: Point,
}

impl SkeletonPoint {
    pub fn at_vertex(path: usize, skeleton: &Skeleton, v: SkVertexId) -> Self {
        Self {
            path,
            location: SkeletonLocation::Vertex(v),
            point: skeleton.point(v),
        }
    }

    pub fn on_edge(path: usize, e: SkEdgeId, p: Point) -> Self {
        Self {
            path,
            location: SkeletonLocation::Edge(e, p),
            point: p,
        }
    }

    fn order_key(&self) -> (usize, u8, u32, u64, u64) {
        match self.location {
            SkeletonLocation::Vertex(v) => (self.path, 0, v.0, 0, 0),
            SkeletonLocation::Edge(e, p) => {
                (self.path, 1, e.0, p.x.to_bits(), p.y.to_bits())
            }
        }
    }
}

impl PartialEq for SkeletonPoint {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for SkeletonPoint {}

impl PartialOrd for SkeletonPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SkeletonPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// A candidate bridge between two skeleton points, ordered so the first
/// endpoint never has the larger path id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathLink {
    pub first: SkeletonPoint,
    pub second: SkeletonPoint,
}

impl PathLink {
    pub fn new(a: SkeletonPoint, b: SkeletonPoint) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    pub fn length(&self) -> f64 {
        distance(self.first.point, self.second.point)
    }

    pub fn is_same_path(&self) -> bool {
        self.first.path == self.second.path
    }
}
