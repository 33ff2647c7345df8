//! Labelled point cloud kept in association with the mesh faces.

use rand::Rng;

use crate::aabb::{nearest_face, AabbTree};
use crate::geometry::Point3;
use crate::mesh::{FaceId, Label, SurfaceMesh};

/// External point cloud: per-point coordinates and label, writable.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<Point3>,
    pub labels: Vec<Label>,
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, p: Point3, label: Label) -> u32 {
        let idx = self.points.len() as u32;
        self.points.push(p);
        self.labels.push(label);
        idx
    }
}

/// Associates every cloud point with its nearest mesh face. Existing
/// per-face lists are rebuilt from scratch.
pub fn associate_points(mesh: &mut SurfaceMesh, tree: &AabbTree, cloud: &PointCloud) {
    for list in mesh.face_points.iter_mut() {
        list.clear();
    }
    for (idx, &p) in cloud.points.iter().enumerate() {
        if let Some((face, _)) = nearest_face(mesh, tree, p) {
            mesh.face_points[face.idx()].push(idx as u32);
        }
    }
}

/// Uniform random point on a face, by the square-root barycentric trick.
pub fn sample_on_face(mesh: &SurfaceMesh, f: FaceId, rng: &mut impl Rng) -> Point3 {
    let [a, b, c] = mesh.face_points3(f);
    let r1: f64 = rng.gen::<f64>().sqrt();
    let r2: f64 = rng.gen();
    let u = 1.0 - r1;
    let v = r1 * (1.0 - r2);
    let w = r1 * r2;
    Point3::new(
        u * a.x + v * b.x + w * c.x,
        u * a.y + v * b.y + w * c.y,
        u * a.z + v * b.z + w * c.z,
    )
}
