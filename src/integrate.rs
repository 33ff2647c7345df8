//! Splices accepted bridges into the master mesh and the point cloud.
//!
//! Per bridge: migrate the attached points off the faces the ribbon crosses,
//! union the support tube in, relabel and promote points under the removal
//! volume, corefine against crossed paths, subtract the removal tube, then
//! reassociate the migrated points and sample the faces left bare. Each
//! bridge sees the mesh as modified by all earlier bridges.

use std::collections::{BTreeSet, HashMap};

use geo_types::Polygon;
use log::{info, warn};
use rand::Rng;

use crate::aabb::{nearest_face, vertical_ray_meets, Aabb, AabbTree};
use crate::bridge::PathBridge;
use crate::config::ReconstructionConfig;
use crate::corefine::{corefine_boolean, BooleanOp, CorefineVisitor, MeshSide, NullVisitor};
use crate::mesh::{EdgeId, FaceId, Label, SurfaceMesh};
use crate::point_cloud::{sample_on_face, PointCloud};
use crate::ribbon::{polygon_tube, removal_tube, support_tube};

/// Visitor that carries face and edge attributes through one boolean.
///
/// Rows are snapshots of the two inputs taken before the rewrite, so the
/// propagation logic has no borrow on either mesh and can be driven by hand
/// against mock meshes in tests.
pub struct AttributeVisitor {
    label_src: Vec<Label>,
    path_src: Vec<i32>,
    true_src: Vec<bool>,
    new_src: Vec<bool>,
    points_src: Vec<Vec<u32>>,
    blocked_src: Vec<bool>,
    tube_label: Vec<Label>,
    /// `true_face` granted to faces copied in from the tube.
    tube_true_face: bool,
}

impl AttributeVisitor {
    pub fn new(mesh: &SurfaceMesh, tube: &SurfaceMesh, tube_true_face: bool) -> Self {
        Self {
            label_src: mesh.label.clone(),
            path_src: mesh.path.clone(),
            true_src: mesh.true_face.clone(),
            new_src: mesh.new_face.clone(),
            points_src: mesh.face_points.clone(),
            blocked_src: mesh.blocked.clone(),
            tube_label: tube.label.clone(),
            tube_true_face,
        }
    }

    fn stamp(&self, side: MeshSide, source: FaceId, face: FaceId, result: &mut SurfaceMesh) {
        match side {
            MeshSide::First => {
                result.label[face.idx()] = self.label_src[source.idx()];
                result.path[face.idx()] = self.path_src[source.idx()];
                result.true_face[face.idx()] = self.true_src[source.idx()];
                result.new_face[face.idx()] = self.new_src[source.idx()];
                result.face_points[face.idx()] = self.points_src[source.idx()].clone();
            }
            MeshSide::Second => {
                result.label[face.idx()] = self.tube_label[source.idx()];
                result.path[face.idx()] = -1;
                result.true_face[face.idx()] = self.tube_true_face;
                result.new_face[face.idx()] = true;
                result.face_points[face.idx()].clear();
            }
        }
    }
}

impl CorefineVisitor for AttributeVisitor {
    fn subface_created(
        &mut self,
        side: MeshSide,
        source: FaceId,
        child: FaceId,
        result: &mut SurfaceMesh,
    ) {
        self.stamp(side, source, child, result);
    }

    fn face_copy(&mut self, side: MeshSide, source: FaceId, copy: FaceId, result: &mut SurfaceMesh) {
        self.stamp(side, source, copy, result);
    }

    fn edge_copy(
        &mut self,
        side: MeshSide,
        source: EdgeId,
        copy: EdgeId,
        result: &mut SurfaceMesh,
    ) {
        // Only surviving original edges keep their hard-constraint marker;
        // split and new edges start cleared.
        if side == MeshSide::First {
            result.blocked[copy.idx()] = self.blocked_src[source.idx()];
        }
    }
}

/// Faces whose vertical prism meets the ribbon footprint, segment by
/// segment. Matches the set the cost evaluation's ray casts touch.
fn ribbon_prism_faces(tree: &AabbTree, bridge: &PathBridge) -> BTreeSet<FaceId> {
    let mut out = BTreeSet::new();
    for i in 0..bridge.n {
        let mut bb = Aabb {
            min: [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY],
            max: [f64::NEG_INFINITY, f64::NEG_INFINITY, f64::INFINITY],
        };
        for p in [
            bridge.left_point(i),
            bridge.right_point(i),
            bridge.left_point(i + 1),
            bridge.right_point(i + 1),
        ] {
            bb.min[0] = bb.min[0].min(p.x);
            bb.max[0] = bb.max[0].max(p.x);
            bb.min[1] = bb.min[1].min(p.y);
            bb.max[1] = bb.max[1].max(p.y);
        }
        out.extend(tree.faces_overlapping(&bb));
    }
    out
}

/// Integrates one bridge. The mesh and cloud are rewritten in place; the
/// caller passes the `snapshot` of the mesh (and a tree over it) taken
/// before any bridge of this batch, for the ground-truth label lookups of
/// the hole-sampling step.
pub fn integrate_bridge(
    mesh: &mut SurfaceMesh,
    cloud: &mut PointCloud,
    bridge: &PathBridge,
    polygons: &HashMap<usize, Polygon<f64>>,
    snapshot: &SurfaceMesh,
    snapshot_tree: &AabbTree,
    config: &ReconstructionConfig,
    rng: &mut impl Rng,
) {
    info!(
        "integrating bridge {} -> {} ({})",
        bridge.link.first.path,
        bridge.link.second.path,
        bridge.label.name()
    );

    // 1. Pull the attached points off every crossed face, and remember which
    // paths the ribbon crosses. The bridge's own crossing set indexed the
    // mesh it was costed against; earlier bridges have rewritten it since,
    // so the vertical prism of the ribbon is re-queried here.
    let points_to_move: BTreeSet<u32>;
    let mut crossed_paths: BTreeSet<i32> = BTreeSet::new();
    {
        let tree = AabbTree::build(mesh);
        let crossing = ribbon_prism_faces(&tree, bridge);
        let mut moved = BTreeSet::new();
        for &face in &crossing {
            moved.extend(mesh.face_points[face.idx()].drain(..));
            let path = mesh.path[face.idx()];
            if path >= 0 && matches!(mesh.label[face.idx()], Label::Road | Label::Rail) {
                crossed_paths.insert(path);
            }
        }
        points_to_move = moved;
    }
    crossed_paths.remove(&(bridge.link.first.path as i32));
    crossed_paths.remove(&(bridge.link.second.path as i32));

    // 2. Union with the support tube.
    let support = support_tube(bridge, config);
    let mut visitor = AttributeVisitor::new(mesh, &support, true);
    *mesh = corefine_boolean(mesh, &support, BooleanOp::Union, &mut visitor);

    // 3 & 4. Point relabeling under the removal volume.
    let mut removal = removal_tube(bridge, config);
    let removal_tree = AabbTree::build(&removal);
    for &idx in &points_to_move {
        let p = cloud.points[idx as usize];
        if !vertical_ray_meets(&removal, &removal_tree, p.xy()) {
            continue;
        }
        let label = cloud.labels[idx as usize];
        if label.is_neutral() {
            cloud.labels[idx as usize] = bridge.label;
        } else if matches!(label, Label::Road | Label::Rail)
            && matches!(bridge.label, Label::Road | Label::Rail)
            && label != bridge.label
        {
            cloud.labels[idx as usize] = Label::LevelCrossing;
        }
    }

    // 5. Corefine the removal volume with every crossed road or rail path so
    // the difference introduces edges along the crossing curve.
    for path in crossed_paths {
        let Some(polygon) = polygons.get(&(path as usize)) else {
            continue;
        };
        match polygon_tube(polygon, bridge.z_alpha, config.tunnel_height / 6.0) {
            Some(extrusion) => {
                removal = corefine_boolean(
                    &removal,
                    &extrusion,
                    BooleanOp::CorefineOnly,
                    &mut NullVisitor,
                );
            }
            None => warn!("crossed path {path} has a degenerate polygon, skipping corefinement"),
        }
    }

    // 6. Difference with the removal tube.
    let mut visitor = AttributeVisitor::new(mesh, &removal, true);
    *mesh = corefine_boolean(mesh, &removal, BooleanOp::Difference, &mut visitor);

    // 7. Reassociate the migrated points on the rewritten mesh.
    let tree = AabbTree::build(mesh);
    for &idx in &points_to_move {
        let p = cloud.points[idx as usize];
        if let Some((face, _)) = nearest_face(mesh, &tree, p) {
            mesh.face_points[face.idx()].push(idx);
        }
    }

    // 8. Sample the new faces left without any associated point.
    let bare: Vec<FaceId> = mesh
        .faces()
        .filter(|&f| mesh.new_face[f.idx()] && mesh.face_points[f.idx()].is_empty())
        .collect();
    let mut sampled = 0usize;
    for face in bare {
        let count = (mesh.face_area(face) * config.sampling_density).ceil() as usize;
        let label = mesh.label[face.idx()];
        for _ in 0..count {
            let p = sample_on_face(mesh, face, rng);
            let mut point_label = label;
            // A sample that lands where the ground used to carry the other
            // transport class marks a level crossing.
            if let Some(hit) = crate::aabb::hit_below(snapshot, snapshot_tree, p.xy(), f64::INFINITY)
            {
                let ground = snapshot.label[hit.face.idx()];
                if matches!(ground, Label::Road | Label::Rail)
                    && matches!(point_label, Label::Road | Label::Rail)
                    && ground != point_label
                {
                    point_label = Label::LevelCrossing;
                }
            }
            let idx = cloud.push(p, point_label);
            mesh.face_points[face.idx()].push(idx);
            sampled += 1;
        }
    }
    if sampled > 0 {
        info!("sampled {sampled} points over bare bridge faces");
    }
}

/// Integrates a batch of accepted bridges in order. Each bridge sees the
/// mesh as rewritten by its predecessors; the pre-batch snapshot serves the
/// ground-truth lookups of the sampling step.
pub fn integrate_bridges(
    mesh: &mut SurfaceMesh,
    cloud: &mut PointCloud,
    bridges: &[PathBridge],
    polygons: &HashMap<usize, Polygon<f64>>,
    config: &ReconstructionConfig,
    rng: &mut impl Rng,
) {
    if bridges.is_empty() {
        return;
    }
    let snapshot = mesh.clone();
    let snapshot_tree = AabbTree::build(&snapshot);
    for bridge in bridges {
        integrate_bridge(
            mesh,
            cloud,
            bridge,
            polygons,
            &snapshot,
            &snapshot_tree,
            config,
            rng,
        );
    }
}
