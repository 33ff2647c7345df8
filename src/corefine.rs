//! Boolean corefinement of two surface meshes with attribute visitors.
//!
//! The pipeline corefines the master mesh against small tube volumes: every
//! face crossed by the other mesh is retriangulated along the intersection
//! polyline, sub-faces are classified against the other volume by vertical
//! ray parity, and the requested boolean keeps the right halves. All
//! constructions run on the rational vertex map; the inexact coordinates of
//! the result are rounded once at assembly.
//!
//! Callers observe the rewrite through [`CorefineVisitor`]: face splits,
//! sub-face and copy creation, and edge fate. Attribute propagation lives
//! entirely in visitor implementations so it can be tested against
//! hand-built meshes.

use std::collections::{HashMap, HashSet};

use num_traits::{Signed, ToPrimitive, Zero};

use crate::aabb::{Aabb, AabbTree};
use crate::exact::{orient3d, triangle_intersection, ExactPoint3};
use crate::mesh::{EdgeId, FaceId, SurfaceMesh};

/// Which input mesh an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshSide {
    First,
    Second,
}

/// The boolean to perform. `CorefineOnly` refines the first mesh along the
/// intersection curve and keeps all of it, ignoring the second mesh's faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOp {
    Union,
    Difference,
    CorefineOnly,
}

/// Observer of the corefinement rewrite. Every face and edge of the result
/// is announced through exactly one creation event.
pub trait CorefineVisitor {
    /// A source face is about to be replaced by sub-faces.
    fn face_split(&mut self, _side: MeshSide, _source: FaceId) {}

    /// A sub-face of a split source face was created in the result.
    fn subface_created(
        &mut self,
        _side: MeshSide,
        _source: FaceId,
        _child: FaceId,
        _result: &mut SurfaceMesh,
    ) {
    }

    /// An unsplit source face was copied into the result.
    fn face_copy(
        &mut self,
        _side: MeshSide,
        _source: FaceId,
        _copy: FaceId,
        _result: &mut SurfaceMesh,
    ) {
    }

    /// A source edge was cut by the intersection curve.
    fn edge_split(&mut self, _side: MeshSide, _source: EdgeId) {}

    /// A result edge coincides geometrically with a source edge.
    fn edge_copy(
        &mut self,
        _side: MeshSide,
        _source: EdgeId,
        _copy: EdgeId,
        _result: &mut SurfaceMesh,
    ) {
    }
}

/// Visitor that ignores every event.
pub struct NullVisitor;

impl CorefineVisitor for NullVisitor {}

/// A face scheduled for the result: its exact corners, provenance, and
/// whether its source face was split.
struct PendingFace {
    corners: [ExactPoint3; 3],
    side: MeshSide,
    source: FaceId,
    from_split: bool,
}

fn dominant_axis(n: &ExactPoint3) -> usize {
    let ax = n.x.abs();
    let ay = n.y.abs();
    let az = n.z.abs();
    if az >= ax && az >= ay {
        2
    } else if ax >= ay {
        0
    } else {
        1
    }
}

/// Projects onto the plane orthogonal to `axis`, cyclically so a positive
/// normal component keeps a counter-clockwise projection.
fn project(p: &ExactPoint3, axis: usize) -> (f64, f64) {
    let (u, v) = match axis {
        0 => (&p.y, &p.z),
        1 => (&p.z, &p.x),
        _ => (&p.x, &p.y),
    };
    (u.to_f64().unwrap_or(0.0), v.to_f64().unwrap_or(0.0))
}

fn exact_cross_normal(tri: &[ExactPoint3; 3]) -> ExactPoint3 {
    let ux = &tri[1].x - &tri[0].x;
    let uy = &tri[1].y - &tri[0].y;
    let uz = &tri[1].z - &tri[0].z;
    let vx = &tri[2].x - &tri[0].x;
    let vy = &tri[2].y - &tri[0].y;
    let vz = &tri[2].z - &tri[0].z;
    ExactPoint3::new(
        &uy * &vz - &uz * &vy,
        &uz * &vx - &ux * &vz,
        &ux * &vy - &uy * &vx,
    )
}

/// Splits one face along its collected constraint segments. Returns the
/// sub-triangles as exact corner triples, or `None` when the constrained
/// triangulation degenerates (the face is then kept whole).
fn split_face(
    corners: &[ExactPoint3; 3],
    constraints: &[(ExactPoint3, ExactPoint3)],
) -> Option<Vec<[ExactPoint3; 3]>> {
    let normal = exact_cross_normal(corners);
    if normal.x.is_zero() && normal.y.is_zero() && normal.z.is_zero() {
        return None;
    }
    let axis = dominant_axis(&normal);
    let axis_sign_positive = match axis {
        0 => normal.x.is_positive(),
        1 => normal.y.is_positive(),
        _ => normal.z.is_positive(),
    };

    let mut points: Vec<ExactPoint3> = Vec::new();
    let mut index: HashMap<ExactPoint3, usize> = HashMap::new();
    let mut intern = |p: &ExactPoint3, points: &mut Vec<ExactPoint3>, index: &mut HashMap<ExactPoint3, usize>| {
        *index.entry(p.clone()).or_insert_with(|| {
            points.push(p.clone());
            points.len() - 1
        })
    };
    for c in corners {
        intern(c, &mut points, &mut index);
    }
    let mut edges: Vec<(usize, usize)> = Vec::new();
    for (p, q) in constraints {
        let i = intern(p, &mut points, &mut index);
        let j = intern(q, &mut points, &mut index);
        if i != j {
            edges.push((i, j));
        }
    }

    let mut coords: Vec<(f64, f64)> = points.iter().map(|p| project(p, axis)).collect();
    if !axis_sign_positive {
        // Mirror so the projected triangle is counter-clockwise.
        for c in coords.iter_mut() {
            c.0 = -c.0;
        }
    }
    let triangles = cdt::triangulate_with_edges(&coords, &edges).ok()?;

    let mut out = Vec::with_capacity(triangles.len());
    for (a, b, c) in triangles {
        if axis_sign_positive {
            out.push([points[a].clone(), points[b].clone(), points[c].clone()]);
        } else {
            out.push([points[a].clone(), points[c].clone(), points[b].clone()]);
        }
    }
    Some(out)
}

fn centroid(tri: &[ExactPoint3; 3]) -> ExactPoint3 {
    let three = num_rational::BigRational::from_integer(num_bigint::BigInt::from(3));
    ExactPoint3::new(
        (&tri[0].x + &tri[1].x + &tri[2].x) / &three,
        (&tri[0].y + &tri[1].y + &tri[2].y) / &three,
        (&tri[0].z + &tri[1].z + &tri[2].z) / &three,
    )
}

/// Where a face sits relative to the other closed volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    Outside,
    Inside,
    /// On the other boundary, normals agreeing.
    BoundarySame,
    /// On the other boundary, normals opposing.
    BoundaryOpposite,
}

/// Classifies the point `p` (a face centroid with outward normal `normal`)
/// against the closed volume bounded by `tris`, by vertical ray parity.
/// Landing exactly on a supporting plane inside its triangle reports the
/// coplanar-contact cases instead.
fn classify(
    tris: &[[ExactPoint3; 3]],
    boxes: &[Aabb],
    p: &ExactPoint3,
    normal: &ExactPoint3,
) -> Place {
    let px = p.x.to_f64().unwrap_or(0.0);
    let py = p.y.to_f64().unwrap_or(0.0);
    let mut crossings = 0usize;
    for (tri, bb) in tris.iter().zip(boxes) {
        // Inexact reject on the XY box, with a pad for rounding.
        if px < bb.min[0] - 1e-9
            || px > bb.max[0] + 1e-9
            || py < bb.min[1] - 1e-9
            || py > bb.max[1] + 1e-9
        {
            continue;
        }
        if !crate::exact::triangle_contains_xy(tri, p) {
            continue;
        }
        if let Some(z) = crate::exact::plane_z_at(tri, p) {
            if z == p.z {
                let other = exact_cross_normal(tri);
                let dot = &normal.x * &other.x + &normal.y * &other.y + &normal.z * &other.z;
                return if dot.is_negative() {
                    Place::BoundaryOpposite
                } else {
                    Place::BoundarySame
                };
            }
            if z > p.z {
                crossings += 1;
            }
        }
    }
    if crossings % 2 == 1 {
        Place::Inside
    } else {
        Place::Outside
    }
}

fn collect_exact(mesh: &SurfaceMesh) -> Vec<[ExactPoint3; 3]> {
    mesh.faces().map(|f| mesh.face_exact(f)).collect()
}

fn exact_boxes(tris: &[[ExactPoint3; 3]]) -> Vec<Aabb> {
    tris.iter()
        .map(|tri| {
            let mut bb = Aabb {
                min: [f64::INFINITY; 3],
                max: [f64::NEG_INFINITY; 3],
            };
            for p in tri {
                let q = p.to_point();
                for (k, v) in [q.x, q.y, q.z].into_iter().enumerate() {
                    bb.min[k] = bb.min[k].min(v);
                    bb.max[k] = bb.max[k].max(v);
                }
            }
            bb
        })
        .collect()
}

fn canonical_pair(a: &ExactPoint3, b: &ExactPoint3) -> (ExactPoint3, ExactPoint3) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

fn source_edge_map(mesh: &SurfaceMesh) -> HashMap<(ExactPoint3, ExactPoint3), EdgeId> {
    let mut map = HashMap::new();
    for e in mesh.edges() {
        let (a, b) = mesh.edge_endpoints(e);
        map.insert(
            canonical_pair(&mesh.exact_points[a.idx()], &mesh.exact_points[b.idx()]),
            e,
        );
    }
    map
}

/// Corefines `a` with `b` and assembles the requested boolean. Both meshes
/// are expected to be closed, outward-oriented 2-manifolds (except under
/// `CorefineOnly`, which tolerates any `b`). Attribute flow is delegated to
/// the visitor.
pub fn corefine_boolean(
    a: &SurfaceMesh,
    b: &SurfaceMesh,
    op: BooleanOp,
    visitor: &mut dyn CorefineVisitor,
) -> SurfaceMesh {
    let tris_a = collect_exact(a);
    let tris_b = collect_exact(b);
    let boxes_a = exact_boxes(&tris_a);
    let boxes_b = exact_boxes(&tris_b);

    // Broad phase on the inexact boxes of `a`.
    let tree_a = AabbTree::build(a);
    let mut constraints_a: HashMap<FaceId, Vec<(ExactPoint3, ExactPoint3)>> = HashMap::new();
    let mut constraints_b: HashMap<FaceId, Vec<(ExactPoint3, ExactPoint3)>> = HashMap::new();
    for fb in b.faces() {
        let bb = AabbTree::face_box(b, fb);
        for fa in tree_a.faces_overlapping(&bb) {
            if let Some((p, q)) = triangle_intersection(&tris_a[fa.idx()], &tris_b[fb.idx()]) {
                constraints_a
                    .entry(fa)
                    .or_default()
                    .push((p.clone(), q.clone()));
                constraints_b.entry(fb).or_default().push((p, q));
            }
        }
    }

    // Refine both meshes into pending faces.
    let mut pending: Vec<PendingFace> = Vec::new();
    let mut split_sources: Vec<(MeshSide, FaceId)> = Vec::new();
    let mut refine = |mesh: &SurfaceMesh,
                      tris: &[[ExactPoint3; 3]],
                      side: MeshSide,
                      constraints: &HashMap<FaceId, Vec<(ExactPoint3, ExactPoint3)>>,
                      pending: &mut Vec<PendingFace>,
                      split_sources: &mut Vec<(MeshSide, FaceId)>| {
        for f in mesh.faces() {
            match constraints.get(&f) {
                Some(segments) => match split_face(&tris[f.idx()], segments) {
                    Some(children) => {
                        split_sources.push((side, f));
                        for corners in children {
                            pending.push(PendingFace {
                                corners,
                                side,
                                source: f,
                                from_split: true,
                            });
                        }
                    }
                    // Degenerate split: keep the face whole.
                    None => pending.push(PendingFace {
                        corners: tris[f.idx()].clone(),
                        side,
                        source: f,
                        from_split: false,
                    }),
                },
                None => pending.push(PendingFace {
                    corners: tris[f.idx()].clone(),
                    side,
                    source: f,
                    from_split: false,
                }),
            }
        }
    };
    refine(a, &tris_a, MeshSide::First, &constraints_a, &mut pending, &mut split_sources);
    if op != BooleanOp::CorefineOnly {
        refine(b, &tris_b, MeshSide::Second, &constraints_b, &mut pending, &mut split_sources);
    }

    // Classification and selection. A coplanar patch shared by both
    // boundaries survives at most once, always through the first mesh.
    let mut selected: Vec<(PendingFace, bool)> = Vec::new(); // bool: reverse orientation
    for face in pending {
        let keep = match op {
            BooleanOp::CorefineOnly => matches!(face.side, MeshSide::First).then_some(false),
            _ => {
                let (other_tris, other_boxes) = match face.side {
                    MeshSide::First => (&tris_b, &boxes_b),
                    MeshSide::Second => (&tris_a, &boxes_a),
                };
                let normal = exact_cross_normal(&face.corners);
                let place = classify(other_tris, other_boxes, &centroid(&face.corners), &normal);
                match (op, face.side, place) {
                    (BooleanOp::Union, MeshSide::First, Place::Outside | Place::BoundarySame) => {
                        Some(false)
                    }
                    (BooleanOp::Union, MeshSide::Second, Place::Outside) => Some(false),
                    (
                        BooleanOp::Difference,
                        MeshSide::First,
                        Place::Outside | Place::BoundaryOpposite,
                    ) => Some(false),
                    // Kept walls of the carved pocket face the other way.
                    (BooleanOp::Difference, MeshSide::Second, Place::Inside) => Some(true),
                    _ => None,
                }
            }
        };
        if let Some(reverse) = keep {
            selected.push((face, reverse));
        }
    }

    // Announce split sources before any sub-face exists. Every edge of a
    // split face counts as touched by the refinement.
    let mut announced: HashSet<(MeshSide, FaceId)> = HashSet::new();
    for (side, f) in &split_sources {
        if announced.insert((*side, *f)) {
            visitor.face_split(*side, *f);
            let mesh = match side {
                MeshSide::First => a,
                MeshSide::Second => b,
            };
            for e in mesh.face_edges(*f) {
                visitor.edge_split(*side, e);
            }
        }
    }

    // Assembly.
    let mut result = SurfaceMesh::new();
    let mut vertex_of: HashMap<ExactPoint3, crate::mesh::VertexId> = HashMap::new();
    for (face, reverse) in selected {
        let mut ids = [crate::mesh::VertexId(0); 3];
        for (k, corner) in face.corners.iter().enumerate() {
            let id = match vertex_of.get(corner) {
                Some(&v) => v,
                None => {
                    let v = result.add_vertex(corner.to_point());
                    result.exact_points[v.idx()] = corner.clone();
                    vertex_of.insert(corner.clone(), v);
                    v
                }
            };
            ids[k] = id;
        }
        if ids[0] == ids[1] || ids[1] == ids[2] || ids[0] == ids[2] {
            continue; // degenerate sliver collapsed by rounding
        }
        let new_face = if reverse {
            result.add_face(ids[0], ids[2], ids[1])
        } else {
            result.add_face(ids[0], ids[1], ids[2])
        };
        if face.from_split {
            visitor.subface_created(face.side, face.source, new_face, &mut result);
        } else {
            visitor.face_copy(face.side, face.source, new_face, &mut result);
        }
    }

    // Edge fate: result edges that coincide with a source edge are copies;
    // everything else is new and starts unblocked.
    let map_a = source_edge_map(a);
    let map_b = source_edge_map(b);
    for e in result.edges() {
        let (u, v) = result.edge_endpoints(e);
        let key = canonical_pair(&result.exact_points[u.idx()], &result.exact_points[v.idx()]);
        if let Some(&src) = map_a.get(&key) {
            visitor.edge_copy(MeshSide::First, src, e, &mut result);
        } else if let Some(&src) = map_b.get(&key) {
            visitor.edge_copy(MeshSide::Second, src, e, &mut result);
        }
    }

    result.compute_normal_angle_coefs();
    result
}

/// Orientation (signed volume sum) sanity helper used by tests: six times
/// the enclosed volume of a closed mesh.
pub fn signed_volume6(mesh: &SurfaceMesh) -> f64 {
    let mut total = num_rational::BigRational::from_integer(num_bigint::BigInt::from(0));
    let origin = ExactPoint3::from_point(crate::geometry::Point3::new(0.0, 0.0, 0.0));
    for f in mesh.faces() {
        let [a, b, c] = mesh.face_exact(f);
        total += orient3d(&origin, &a, &b, &c);
    }
    total.to_f64().unwrap_or(f64::NAN)
}
