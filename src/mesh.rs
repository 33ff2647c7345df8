//! Arena-indexed half-edge surface mesh with per-element attribute maps.
//!
//! Connectivity lives in parallel vectors indexed by integer handles; twin
//! half-edges are allocated pairwise so `twin(h) = h ^ 1` and the undirected
//! edge of `h` is `h / 2`. Attribute maps are plain vectors owned by the mesh
//! and grown in lockstep with the elements they describe.

use std::collections::HashMap;

use crate::exact::ExactPoint3;
use crate::geometry::Point3;

/// Surface classification carried per face and per cloud point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Label {
    Other = 0,
    Unknown = 1,
    LowVegetation = 2,
    HighVegetation = 3,
    Building = 4,
    Road = 5,
    Rail = 6,
    Water = 7,
    LevelCrossing = 8,
}

impl Label {
    pub fn name(self) -> &'static str {
        match self {
            Label::Other => "other",
            Label::Unknown => "unknown",
            Label::LowVegetation => "low vegetation",
            Label::HighVegetation => "high vegetation",
            Label::Building => "building",
            Label::Road => "road",
            Label::Rail => "rail",
            Label::Water => "water",
            Label::LevelCrossing => "level crossing",
        }
    }

    /// Labels that carry no class information of their own.
    pub fn is_neutral(self) -> bool {
        matches!(self, Label::Other | Label::Unknown)
    }

    /// Labels eligible for path linking.
    pub fn is_transport(self) -> bool {
        matches!(self, Label::Road | Label::Rail | Label::Water)
    }

    /// Road/rail pairs share ground at level crossings and are never treated
    /// as a label conflict.
    pub fn conflicts_with(self, other: Label) -> bool {
        if self == other || self.is_neutral() || other.is_neutral() {
            return false;
        }
        !(matches!(self, Label::Road | Label::Rail) && matches!(other, Label::Road | Label::Rail))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HalfedgeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceId(pub u32);

impl VertexId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl HalfedgeId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }

    pub fn twin(self) -> HalfedgeId {
        HalfedgeId(self.0 ^ 1)
    }

    pub fn edge(self) -> EdgeId {
        EdgeId(self.0 / 2)
    }
}

impl EdgeId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }

    pub fn halfedge(self) -> HalfedgeId {
        HalfedgeId(self.0 * 2)
    }
}

impl FaceId {
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Triangle surface mesh with the attribute maps of the reconstruction
/// pipeline.
#[derive(Debug, Clone, Default)]
pub struct SurfaceMesh {
    points: Vec<Point3>,
    vertex_halfedge: Vec<Option<HalfedgeId>>,
    he_target: Vec<VertexId>,
    he_next: Vec<Option<HalfedgeId>>,
    he_face: Vec<Option<FaceId>>,
    face_halfedge: Vec<HalfedgeId>,
    directed: HashMap<(u32, u32), HalfedgeId>,

    /// Per-face surface classification.
    pub label: Vec<Label>,
    /// Per-face path id, `-1` outside any path.
    pub path: Vec<i32>,
    /// `false` on faces introduced by the cap/close utility.
    pub true_face: Vec<bool>,
    /// `true` on faces introduced by corefinement.
    pub new_face: Vec<bool>,
    /// Indices of the cloud points associated with each face.
    pub face_points: Vec<Vec<u32>>,
    /// Per-face weight for data attachment, cosine of the tilt of the face
    /// normal against the vertical (1 on horizontal ground, 0 on walls).
    pub normal_angle_coef: Vec<f64>,
    /// Per-edge hard-constraint marker.
    pub blocked: Vec<bool>,
    /// Rational vertex coordinates for the boolean pipeline, kept parallel to
    /// the inexact points.
    pub exact_points: Vec<ExactPoint3>,
}

impl SurfaceMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_vertices(&self) -> usize {
        self.points.len()
    }

    pub fn n_faces(&self) -> usize {
        self.face_halfedge.len()
    }

    pub fn n_edges(&self) -> usize {
        self.blocked.len()
    }

    pub fn n_halfedges(&self) -> usize {
        self.he_target.len()
    }

    pub fn vertices(&self) -> impl Iterator<Item = VertexId> {
        (0..self.points.len() as u32).map(VertexId)
    }

    pub fn faces(&self) -> impl Iterator<Item = FaceId> {
        (0..self.face_halfedge.len() as u32).map(FaceId)
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeId> {
        (0..self.blocked.len() as u32).map(EdgeId)
    }

    pub fn point(&self, v: VertexId) -> Point3 {
        self.points[v.idx()]
    }

    pub fn set_point(&mut self, v: VertexId, p: Point3) {
        self.points[v.idx()] = p;
    }

    pub fn add_vertex(&mut self, p: Point3) -> VertexId {
        let id = VertexId(self.points.len() as u32);
        self.points.push(p);
        self.vertex_halfedge.push(None);
        self.exact_points.push(ExactPoint3::from_point(p));
        id
    }

    /// Target vertex of a half-edge.
    pub fn target(&self, h: HalfedgeId) -> VertexId {
        self.he_target[h.idx()]
    }

    /// Source vertex of a half-edge.
    pub fn source(&self, h: HalfedgeId) -> VertexId {
        self.he_target[h.twin().idx()]
    }

    pub fn face_of(&self, h: HalfedgeId) -> Option<FaceId> {
        self.he_face[h.idx()]
    }

    pub fn next(&self, h: HalfedgeId) -> Option<HalfedgeId> {
        self.he_next[h.idx()]
    }

    pub fn edge_endpoints(&self, e: EdgeId) -> (VertexId, VertexId) {
        let h = e.halfedge();
        (self.source(h), self.target(h))
    }

    fn directed_halfedge(&mut self, from: VertexId, to: VertexId) -> HalfedgeId {
        if let Some(&h) = self.directed.get(&(from.0, to.0)) {
            return h;
        }
        let h = HalfedgeId(self.he_target.len() as u32);
        // Twin pair allocated together so h ^ 1 stays valid.
        self.he_target.push(to);
        self.he_target.push(from);
        self.he_next.push(None);
        self.he_next.push(None);
        self.he_face.push(None);
        self.he_face.push(None);
        self.directed.insert((from.0, to.0), h);
        self.directed.insert((to.0, from.0), h.twin());
        self.blocked.push(false);
        h
    }

    /// Adds a triangle over existing vertices. The winding gives the face its
    /// orientation. Attribute rows are created with defaults.
    pub fn add_face(&mut self, a: VertexId, b: VertexId, c: VertexId) -> FaceId {
        let f = FaceId(self.face_halfedge.len() as u32);
        let hab = self.directed_halfedge(a, b);
        let hbc = self.directed_halfedge(b, c);
        let hca = self.directed_halfedge(c, a);
        debug_assert!(self.he_face[hab.idx()].is_none(), "non-manifold face insertion");
        self.he_face[hab.idx()] = Some(f);
        self.he_face[hbc.idx()] = Some(f);
        self.he_face[hca.idx()] = Some(f);
        self.he_next[hab.idx()] = Some(hbc);
        self.he_next[hbc.idx()] = Some(hca);
        self.he_next[hca.idx()] = Some(hab);
        self.vertex_halfedge[a.idx()].get_or_insert(hab);
        self.vertex_halfedge[b.idx()].get_or_insert(hbc);
        self.vertex_halfedge[c.idx()].get_or_insert(hca);
        self.face_halfedge.push(hab);
        self.label.push(Label::Other);
        self.path.push(-1);
        self.true_face.push(true);
        self.new_face.push(false);
        self.face_points.push(Vec::new());
        self.normal_angle_coef.push(1.0);
        f
    }

    pub fn face_vertices(&self, f: FaceId) -> [VertexId; 3] {
        let h0 = self.face_halfedge[f.idx()];
        let h1 = self.he_next[h0.idx()].expect("face half-edge chain");
        let h2 = self.he_next[h1.idx()].expect("face half-edge chain");
        [self.target(h2), self.target(h0), self.target(h1)]
    }

    pub fn face_edges(&self, f: FaceId) -> [EdgeId; 3] {
        let h0 = self.face_halfedge[f.idx()];
        let h1 = self.he_next[h0.idx()].expect("face half-edge chain");
        let h2 = self.he_next[h1.idx()].expect("face half-edge chain");
        [h0.edge(), h1.edge(), h2.edge()]
    }

    pub fn face_points3(&self, f: FaceId) -> [Point3; 3] {
        let [a, b, c] = self.face_vertices(f);
        [self.point(a), self.point(b), self.point(c)]
    }

    pub fn face_exact(&self, f: FaceId) -> [ExactPoint3; 3] {
        let [a, b, c] = self.face_vertices(f);
        [
            self.exact_points[a.idx()].clone(),
            self.exact_points[b.idx()].clone(),
            self.exact_points[c.idx()].clone(),
        ]
    }

    pub fn face_centroid(&self, f: FaceId) -> Point3 {
        let [a, b, c] = self.face_points3(f);
        Point3::new(
            (a.x + b.x + c.x) / 3.0,
            (a.y + b.y + c.y) / 3.0,
            (a.z + b.z + c.z) / 3.0,
        )
    }

    /// Unnormalized face normal.
    pub fn face_normal(&self, f: FaceId) -> (f64, f64, f64) {
        let [a, b, c] = self.face_points3(f);
        let u = (b.x - a.x, b.y - a.y, b.z - a.z);
        let v = (c.x - a.x, c.y - a.y, c.z - a.z);
        (
            u.1 * v.2 - u.2 * v.1,
            u.2 * v.0 - u.0 * v.2,
            u.0 * v.1 - u.1 * v.0,
        )
    }

    pub fn face_area(&self, f: FaceId) -> f64 {
        let n = self.face_normal(f);
        0.5 * (n.0 * n.0 + n.1 * n.1 + n.2 * n.2).sqrt()
    }

    /// Fills `normal_angle_coef` from the current geometry.
    pub fn compute_normal_angle_coefs(&mut self) {
        for f in 0..self.face_halfedge.len() {
            let n = self.face_normal(FaceId(f as u32));
            let len = (n.0 * n.0 + n.1 * n.1 + n.2 * n.2).sqrt();
            self.normal_angle_coef[f] = if len < f64::EPSILON {
                0.0
            } else {
                (n.2 / len).abs()
            };
        }
    }

    /// Half-edges leaving `v`, in no particular order.
    pub fn outgoing_halfedges(&self, v: VertexId) -> Vec<HalfedgeId> {
        let mut out = Vec::new();
        for h in 0..self.he_target.len() as u32 {
            let h = HalfedgeId(h);
            if self.source(h) == v {
                out.push(h);
            }
        }
        out
    }

    /// Half-edges with no incident face.
    pub fn boundary_halfedges(&self) -> Vec<HalfedgeId> {
        (0..self.he_target.len() as u32)
            .map(HalfedgeId)
            .filter(|h| self.he_face[h.idx()].is_none())
            .collect()
    }

    /// `true` when every half-edge has an incident face.
    pub fn is_closed(&self) -> bool {
        self.he_face.iter().all(|f| f.is_some())
    }

    /// Chains the boundary half-edges into vertex cycles. Each cycle is a
    /// list of vertices in boundary order.
    pub fn boundary_cycles(&self) -> Vec<Vec<VertexId>> {
        let border = self.boundary_halfedges();
        let mut by_source: HashMap<VertexId, HalfedgeId> = HashMap::new();
        for &h in &border {
            by_source.insert(self.source(h), h);
        }
        let mut seen: std::collections::HashSet<HalfedgeId> = std::collections::HashSet::new();
        let mut cycles = Vec::new();
        for &start in &border {
            if seen.contains(&start) {
                continue;
            }
            let mut cycle = Vec::new();
            let mut h = start;
            loop {
                seen.insert(h);
                cycle.push(self.source(h));
                match by_source.get(&self.target(h)) {
                    Some(&nh) if nh != start => h = nh,
                    _ => break,
                }
            }
            cycles.push(cycle);
        }
        cycles
    }

    /// Re-derives the rational coordinates from the inexact points.
    pub fn sync_exact_from_points(&mut self) {
        for (i, p) in self.points.iter().enumerate() {
            self.exact_points[i] = ExactPoint3::from_point(*p);
        }
    }

    /// Rounds the rational coordinates back into the inexact map.
    pub fn refresh_points_from_exact(&mut self) {
        for (i, e) in self.exact_points.iter().enumerate() {
            self.points[i] = e.to_point();
        }
    }

    /// Connected face sets sharing a transport label, ordered by discovery.
    /// Faces already carrying a `path` id keep it; this recomputes from
    /// scratch and rewrites the `path` attribute.
    pub fn collect_paths(&mut self) -> Vec<Vec<FaceId>> {
        for p in self.path.iter_mut() {
            *p = -1;
        }
        let mut paths: Vec<Vec<FaceId>> = Vec::new();
        for f in 0..self.face_halfedge.len() {
            let f = FaceId(f as u32);
            if self.path[f.idx()] >= 0 || !self.label[f.idx()].is_transport() {
                continue;
            }
            let id = paths.len() as i32;
            let label = self.label[f.idx()];
            let mut stack = vec![f];
            let mut faces = Vec::new();
            self.path[f.idx()] = id;
            while let Some(face) = stack.pop() {
                faces.push(face);
                let mut h = self.face_halfedge[face.idx()];
                for _ in 0..3 {
                    if let Some(nf) = self.he_face[h.twin().idx()] {
                        if self.path[nf.idx()] < 0 && self.label[nf.idx()] == label {
                            self.path[nf.idx()] = id;
                            stack.push(nf);
                        }
                    }
                    h = self.he_next[h.idx()].expect("face half-edge chain");
                }
            }
            paths.push(faces);
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_mesh() -> SurfaceMesh {
        // Two triangles over a unit square.
        let mut m = SurfaceMesh::new();
        let a = m.add_vertex(Point3::new(0.0, 0.0, 0.0));
        let b = m.add_vertex(Point3::new(1.0, 0.0, 0.0));
        let c = m.add_vertex(Point3::new(1.0, 1.0, 0.0));
        let d = m.add_vertex(Point3::new(0.0, 1.0, 0.0));
        m.add_face(a, b, c);
        m.add_face(a, c, d);
        m
    }

    #[test]
    fn twin_pairing() {
        let m = quad_mesh();
        assert_eq!(m.n_faces(), 2);
        assert_eq!(m.n_edges(), 5);
        for h in 0..m.n_halfedges() as u32 {
            let h = HalfedgeId(h);
            assert_eq!(m.source(h), m.target(h.twin()));
        }
    }

    #[test]
    fn face_vertices_follow_winding() {
        let m = quad_mesh();
        let [a, b, c] = m.face_vertices(FaceId(0));
        assert_eq!((a.0, b.0, c.0), (0, 1, 2));
    }

    #[test]
    fn boundary_cycle_of_quad() {
        let m = quad_mesh();
        let cycles = m.boundary_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 4);
        assert!(!m.is_closed());
    }

    #[test]
    fn normal_angle_coef_flat_and_wall() {
        let mut m = SurfaceMesh::new();
        let a = m.add_vertex(Point3::new(0.0, 0.0, 0.0));
        let b = m.add_vertex(Point3::new(1.0, 0.0, 0.0));
        let c = m.add_vertex(Point3::new(0.0, 1.0, 0.0));
        let d = m.add_vertex(Point3::new(0.0, 0.0, 1.0));
        m.add_face(a, b, c); // horizontal
        m.add_face(a, d, b); // vertical
        m.compute_normal_angle_coefs();
        assert!((m.normal_angle_coef[0] - 1.0).abs() < 1e-12);
        assert!(m.normal_angle_coef[1].abs() < 1e-12);
    }

    #[test]
    fn paths_collect_connected_labels() {
        let mut m = quad_mesh();
        m.label[0] = Label::Road;
        m.label[1] = Label::Road;
        let paths = m.collect_paths();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 2);
        assert_eq!(m.path, vec![0, 0]);
    }

    #[test]
    fn label_conflicts() {
        assert!(!Label::Road.conflicts_with(Label::Rail));
        assert!(!Label::Road.conflicts_with(Label::Other));
        assert!(Label::Road.conflicts_with(Label::Building));
        assert!(!Label::Water.conflicts_with(Label::Water));
    }
}
