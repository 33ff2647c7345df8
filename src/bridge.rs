//! Parametric bridge/tunnel ribbon fitting over a labelled mesh.
//!
//! A bridge is a centerline elevation profile plus asymmetric left/right
//! half-widths, one station per meter of link length. The profile is fitted
//! by nonlinear least squares against the mesh: regularity and width priors,
//! endpoint anchors, one-sided border bounds, and a data-attachment residual
//! that integrates a clearance cost across every cross-section.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use geo_types::Polygon;
use log::{debug, info};

use crate::aabb::{locate_on_path, vertical_hits, AabbTree};
use crate::config::ReconstructionConfig;
use crate::geometry::{distance, orient3d, perpendicular, segment_polygon_exit, unit, Point, Point3};
use crate::mesh::{FaceId, Label, SurfaceMesh};
use crate::skeleton::PathLink;
use crate::solver::{Problem, ResidualBlock};

/// A candidate bridge with its optimized geometry and quality.
#[derive(Debug, Clone)]
pub struct PathBridge {
    pub link: PathLink,
    pub label: Label,
    /// Number of segments; the parameter arrays hold `n + 1` stations.
    pub n: usize,
    pub xl: Vec<f64>,
    pub xr: Vec<f64>,
    pub z: Vec<f64>,
    pub cost: f64,
    /// Faces of the master mesh pierced by the optimized ribbon footprint.
    pub crossing_faces: BTreeSet<FaceId>,

    pub origin: Point,
    pub dir: (f64, f64),
    /// Counter-clockwise perpendicular of `dir`; `xl` extends along `-normal`,
    /// `xr` along `+normal`.
    pub normal: (f64, f64),
    pub length: f64,

    pub z_alpha: f64,
    pub z_beta: f64,
    pub w_alpha: f64,
    pub w_beta: f64,
    pub dl0: f64,
    pub dln: f64,
    pub dr0: f64,
    pub drn: f64,
}

impl PathBridge {
    /// 2D centerline point of station `i`.
    pub fn station_base(&self, i: usize) -> Point {
        let t = self.length * i as f64 / self.n as f64;
        self.origin.offset(self.dir, t)
    }

    /// 3D point on the left rail at station `i`.
    pub fn left_point(&self, i: usize) -> Point3 {
        let p = self.station_base(i).offset(self.normal, -self.xl[i]);
        Point3::new(p.x, p.y, self.z[i])
    }

    /// 3D point on the right rail at station `i`.
    pub fn right_point(&self, i: usize) -> Point3 {
        let p = self.station_base(i).offset(self.normal, self.xr[i]);
        Point3::new(p.x, p.y, self.z[i])
    }

    /// Interpolated expected carriageway width at station `j`.
    pub fn expected_width(&self, j: usize) -> f64 {
        self.w_alpha + (self.w_beta - self.w_alpha) * j as f64 / self.n as f64
    }
}

/// Everything the residuals need to query the surroundings of one bridge.
pub struct BridgeContext<'a> {
    pub mesh: &'a SurfaceMesh,
    pub tree: &'a AabbTree,
    pub config: &'a ReconstructionConfig,
}

/// Distance from `origin` to the path border along `dir`, capped at
/// `half_width` when the polygon is missing or the segment stays inside.
fn border_distance(
    polygon: Option<&Polygon<f64>>,
    origin: Point,
    dir: (f64, f64),
    half_width: f64,
) -> f64 {
    polygon
        .and_then(|poly| segment_polygon_exit(origin, dir, half_width, poly))
        .map(|(_, d)| d)
        .unwrap_or(half_width)
}

/// Builds the initial bridge state for a link: endpoint elevations located on
/// the path fragments, border distances along the perpendicular, and linear
/// interpolations in between. Returns `None` when an endpoint cannot be
/// located on its path at all.
pub fn setup_bridge(
    link: &PathLink,
    mesh: &SurfaceMesh,
    path_trees: &HashMap<usize, AabbTree>,
    polygons: &HashMap<usize, Polygon<f64>>,
    widths: (f64, f64),
    _config: &ReconstructionConfig,
) -> Option<PathBridge> {
    let tree1 = path_trees.get(&link.first.path)?;
    let tree2 = path_trees.get(&link.second.path)?;
    let (face1, p1) = locate_on_path(mesh, tree1, link.first.point)?;
    let (_, p2) = locate_on_path(mesh, tree2, link.second.point)?;

    let label = mesh.label[face1.idx()];
    let length = distance(link.first.point, link.second.point);
    if length < f64::EPSILON {
        return None;
    }
    let dir = unit((
        link.second.point.x - link.first.point.x,
        link.second.point.y - link.first.point.y,
    ));
    let normal = perpendicular(dir);
    let (w_alpha, w_beta) = widths;

    let poly1 = polygons.get(&link.first.path);
    let poly2 = polygons.get(&link.second.path);
    let neg = (-normal.0, -normal.1);
    let dl0 = border_distance(poly1, link.first.point, neg, w_alpha / 2.0);
    let dr0 = border_distance(poly1, link.first.point, normal, w_alpha / 2.0);
    let dln = border_distance(poly2, link.second.point, neg, w_beta / 2.0);
    let drn = border_distance(poly2, link.second.point, normal, w_beta / 2.0);

    let n = length.ceil().max(1.0) as usize;
    let mut xl = Vec::with_capacity(n + 1);
    let mut xr = Vec::with_capacity(n + 1);
    let mut z = Vec::with_capacity(n + 1);
    for i in 0..=n {
        let t = i as f64 / n as f64;
        xl.push(dl0 + t * (dln - dl0));
        xr.push(dr0 + t * (drn - dr0));
        z.push(p1.z + t * (p2.z - p1.z));
    }
    // Break symmetric stationary points before the solve.
    z[n.div_ceil(2)] += 1.0;

    Some(PathBridge {
        link: *link,
        label,
        n,
        xl,
        xr,
        z,
        cost: f64::INFINITY,
        crossing_faces: BTreeSet::new(),
        origin: link.first.point,
        dir,
        normal,
        length,
        z_alpha: p1.z,
        z_beta: p2.z,
        w_alpha,
        w_beta,
        dl0,
        dln,
        dr0,
        drn,
    })
}

// Parameter vector layout: z stations, then xl, then xr.
fn z_param(i: usize) -> usize {
    i
}

fn xl_param(n: usize, j: usize) -> usize {
    (n + 1) + j
}

fn xr_param(n: usize, j: usize) -> usize {
    2 * (n + 1) + j
}

fn pack(bridge: &PathBridge) -> Vec<f64> {
    let mut x = Vec::with_capacity(3 * (bridge.n + 1));
    x.extend_from_slice(&bridge.z);
    x.extend_from_slice(&bridge.xl);
    x.extend_from_slice(&bridge.xr);
    x
}

fn unpack(bridge: &mut PathBridge, x: &[f64]) {
    let n = bridge.n;
    bridge.z.copy_from_slice(&x[..=n]);
    bridge.xl.copy_from_slice(&x[n + 1..=2 * n + 1]);
    bridge.xr.copy_from_slice(&x[2 * n + 2..]);
}

struct DifferenceBlock {
    params: [usize; 2],
    coef: f64,
}

impl ResidualBlock for DifferenceBlock {
    fn residual_count(&self) -> usize {
        1
    }

    fn parameters(&self) -> &[usize] {
        &self.params
    }

    fn evaluate(&self, local: &[f64], residuals: &mut [f64], jacobian: Option<&mut [f64]>) {
        residuals[0] = self.coef * (local[0] - local[1]);
        if let Some(jac) = jacobian {
            jac[0] = self.coef;
            jac[1] = -self.coef;
        }
    }
}

struct SumTargetBlock {
    params: [usize; 2],
    target: f64,
    coef: f64,
}

impl ResidualBlock for SumTargetBlock {
    fn residual_count(&self) -> usize {
        1
    }

    fn parameters(&self) -> &[usize] {
        &self.params
    }

    fn evaluate(&self, local: &[f64], residuals: &mut [f64], jacobian: Option<&mut [f64]>) {
        residuals[0] = self.coef * (local[0] + local[1] - self.target);
        if let Some(jac) = jacobian {
            jac[0] = self.coef;
            jac[1] = self.coef;
        }
    }
}

struct AnchorBlock {
    params: [usize; 1],
    target: f64,
    coef: f64,
}

impl ResidualBlock for AnchorBlock {
    fn residual_count(&self) -> usize {
        1
    }

    fn parameters(&self) -> &[usize] {
        &self.params
    }

    fn evaluate(&self, local: &[f64], residuals: &mut [f64], jacobian: Option<&mut [f64]>) {
        residuals[0] = self.coef * (local[0] - self.target);
        if let Some(jac) = jacobian {
            jac[0] = self.coef;
        }
    }
}

/// One-sided penalty `coef * max(0, x - max)`, flat inside the bound.
struct UpperBoundBlock {
    params: [usize; 1],
    max: f64,
    coef: f64,
}

impl ResidualBlock for UpperBoundBlock {
    fn residual_count(&self) -> usize {
        1
    }

    fn parameters(&self) -> &[usize] {
        &self.params
    }

    fn evaluate(&self, local: &[f64], residuals: &mut [f64], jacobian: Option<&mut [f64]>) {
        let over = local[0] - self.max;
        residuals[0] = self.coef * over.max(0.0);
        if let Some(jac) = jacobian {
            jac[0] = if over > 0.0 { self.coef } else { 0.0 };
        }
    }
}

/// Clearance cost of one cross-section point at elevation `z`, with its
/// derivative in `z`. Faces consulted along the way go to `faces`.
fn integrand(
    ctx: &BridgeContext,
    label: Label,
    p: Point,
    z: f64,
    faces: Option<&Rc<RefCell<BTreeSet<FaceId>>>>,
) -> (f64, f64) {
    let h = ctx.config.tunnel_height;
    let theta = ctx.config.label_mismatch;

    let hits = vertical_hits(ctx.mesh, ctx.tree, p);
    if hits.is_empty() {
        // Outside the terrain entirely.
        return (0.0, 0.0);
    }
    let bottom = hits.iter().rev().find(|hit| hit.z <= z).copied();
    let above = hits.iter().find(|hit| hit.z > z).copied();
    if let Some(collector) = faces {
        let mut set = collector.borrow_mut();
        if let Some(bottom) = bottom {
            set.insert(bottom.face);
        }
        if let Some(top) = above {
            set.insert(top.face);
        }
    }

    // Overhead geometry with no ground underneath is still outside the
    // terrain; the column contributes nothing.
    let Some(bottom) = bottom else {
        return (0.0, 0.0);
    };

    let p3 = Point3::new(p.x, p.y, z);
    let open_air = match above {
        None => true,
        Some(top) => {
            let [a, b, c] = ctx.mesh.face_points3(top.face);
            orient3d(a, b, c, p3) > 0.0
        }
    };

    if open_air {
        // Above the surface: pay the height over the ground, plus a label
        // mismatch on the ground face, plus crowding against any overhead
        // surface closer than the clearance.
        let kappa_bottom = ctx.mesh.normal_angle_coef[bottom.face.idx()];
        let mut value = (z - bottom.z) * kappa_bottom;
        let mut dz = kappa_bottom;
        if ctx.mesh.label[bottom.face.idx()].conflicts_with(label) {
            value += theta * kappa_bottom;
        }
        if let Some(top) = above {
            let kappa_top = ctx.mesh.normal_angle_coef[top.face.idx()];
            let clearance = top.z - z;
            if clearance < h {
                value += (h - clearance) / 2.0 * kappa_top;
                dz += kappa_top / 2.0;
            }
        }
        (value, dz)
    } else {
        let top = above.expect("buried point has a surface overhead");
        let kappa_top = ctx.mesh.normal_angle_coef[top.face.idx()];
        let depth = top.z - z;
        if depth < h / 2.0 {
            let mut value = depth * kappa_top;
            if ctx.mesh.label[top.face.idx()].conflicts_with(label) {
                value += theta * kappa_top;
            }
            (value, -kappa_top)
        } else if depth < h {
            ((z + h - top.z) * kappa_top, kappa_top)
        } else {
            (0.0, 0.0)
        }
    }
}

/// Composite-trapezoid integral of the clearance cost across one
/// cross-section, with analytic derivatives in `(z, xl, xr)`.
fn attachment_residual(
    ctx: &BridgeContext,
    label: Label,
    base: Point,
    normal: (f64, f64),
    z: f64,
    xl: f64,
    xr: f64,
    grad: Option<&mut [f64; 3]>,
    faces: Option<&Rc<RefCell<BTreeSet<FaceId>>>>,
) -> f64 {
    let beta = ctx.config.surface_attachment;
    let alpha = ctx.config.surface_regularity;
    let width = xl + xr;
    if width < 0.0 {
        // A folded cross-section is penalized instead of integrated.
        if let Some(g) = grad {
            g[0] = 0.0;
            g[1] = -10.0 * alpha;
            g[2] = -10.0 * alpha;
        }
        return (-xl - xr) * alpha * 10.0;
    }

    let step = ctx.config.integration_step;
    let segments = (width / step).floor() as usize;
    let remainder = width - segments as f64 * step;

    let mut value = 0.0;
    let mut dz = 0.0;
    // Interior samples at half-integer multiples of the step.
    for k in 0..segments {
        let j = -xl + (k as f64 + 0.5) * step;
        let (f, fz) = integrand(ctx, label, base.offset(normal, j), z, faces);
        value += step * f;
        dz += step * fz;
    }
    // Endpoint samples weighted by the leftover half-steps.
    let (f_left, fz_left) = integrand(ctx, label, base.offset(normal, -xl), z, faces);
    let (f_right, fz_right) = integrand(ctx, label, base.offset(normal, xr), z, faces);
    value += remainder / 2.0 * (f_left + f_right);
    dz += remainder / 2.0 * (fz_left + fz_right);

    if let Some(g) = grad {
        g[0] = beta * dz;
        // Widening a side extends the strip by the integrand at that rail.
        g[1] = beta * f_left;
        g[2] = beta * f_right;
    }
    beta * value
}

struct AttachmentBlock<'a> {
    ctx: &'a BridgeContext<'a>,
    label: Label,
    base: Point,
    normal: (f64, f64),
    params: [usize; 3],
    collector: Option<Rc<RefCell<BTreeSet<FaceId>>>>,
}

impl ResidualBlock for AttachmentBlock<'_> {
    fn residual_count(&self) -> usize {
        1
    }

    fn parameters(&self) -> &[usize] {
        &self.params
    }

    fn evaluate(&self, local: &[f64], residuals: &mut [f64], jacobian: Option<&mut [f64]>) {
        let (z, xl, xr) = (local[0], local[1], local[2]);
        let mut grad = [0.0; 3];
        let value = attachment_residual(
            self.ctx,
            self.label,
            self.base,
            self.normal,
            z,
            xl,
            xr,
            jacobian.is_some().then_some(&mut grad),
            self.collector.as_ref(),
        );
        residuals[0] = value;
        if let Some(jac) = jacobian {
            jac.copy_from_slice(&grad);
        }
    }
}

fn build_problem<'a>(
    bridge: &PathBridge,
    ctx: &'a BridgeContext<'a>,
    collector: Option<Rc<RefCell<BTreeSet<FaceId>>>>,
) -> Problem<'a> {
    let n = bridge.n;
    let cfg = ctx.config;
    let mut problem = Problem::new(3 * (n + 1));

    // Surface regularity.
    for i in 0..n {
        problem.add_block(DifferenceBlock {
            params: [z_param(i), z_param(i + 1)],
            coef: cfg.surface_regularity,
        });
    }
    // Contour regularity, first differences on both rails.
    for j in 0..n {
        problem.add_block(DifferenceBlock {
            params: [xl_param(n, j), xl_param(n, j + 1)],
            coef: cfg.contour_regularity,
        });
        problem.add_block(DifferenceBlock {
            params: [xr_param(n, j), xr_param(n, j + 1)],
            coef: cfg.contour_regularity,
        });
    }
    // Expected width.
    for j in 0..=n {
        problem.add_block(SumTargetBlock {
            params: [xl_param(n, j), xr_param(n, j)],
            target: bridge.expected_width(j),
            coef: cfg.surface_width,
        });
    }
    // Centering at the two end stations.
    problem.add_block(DifferenceBlock {
        params: [xl_param(n, 0), xr_param(n, 0)],
        coef: cfg.centering,
    });
    problem.add_block(DifferenceBlock {
        params: [xl_param(n, n), xr_param(n, n)],
        coef: cfg.centering,
    });
    // Border elevations.
    problem.add_block(AnchorBlock {
        params: [z_param(0)],
        target: bridge.z_alpha,
        coef: cfg.border_elevation,
    });
    problem.add_block(AnchorBlock {
        params: [z_param(n)],
        target: bridge.z_beta,
        coef: cfg.border_elevation,
    });
    // One-sided border bounds.
    for (param, max) in [
        (xl_param(n, 0), bridge.dl0),
        (xl_param(n, n), bridge.dln),
        (xr_param(n, 0), bridge.dr0),
        (xr_param(n, n), bridge.drn),
    ] {
        problem.add_block(UpperBoundBlock {
            params: [param],
            max,
            coef: cfg.border_constraint,
        });
    }
    // Surface attachment, one block per station.
    for i in 0..=n {
        problem.add_block(AttachmentBlock {
            ctx,
            label: bridge.label,
            base: bridge.station_base(i),
            normal: bridge.normal,
            params: [z_param(i), xl_param(n, i), xr_param(n, i)],
            collector: collector.clone(),
        });
    }
    problem
}

/// Clamps endpoint half-widths to their border bounds and pinches any
/// station whose signed width went negative back to zero width.
fn repair(bridge: &mut PathBridge) {
    let n = bridge.n;
    bridge.xl[0] = bridge.xl[0].min(bridge.dl0);
    bridge.xl[n] = bridge.xl[n].min(bridge.dln);
    bridge.xr[0] = bridge.xr[0].min(bridge.dr0);
    bridge.xr[n] = bridge.xr[n].min(bridge.drn);
    for i in 0..=n {
        if bridge.xl[i] + bridge.xr[i] < 0.0 {
            let half = (bridge.xl[i] - bridge.xr[i]) / 2.0;
            bridge.xl[i] = half;
            bridge.xr[i] = -half;
        }
    }
}

/// Optimizes the bridge in place, repairs it, and evaluates its final cost,
/// populating `crossing_faces` along the way.
pub fn optimize_bridge(bridge: &mut PathBridge, ctx: &BridgeContext) {
    let mut x = pack(bridge);
    let problem = build_problem(bridge, ctx, None);
    let report = problem.solve(&mut x, 100);
    debug!(
        "bridge {} -> {}: cost {:.3} -> {:.3} in {} iterations",
        bridge.link.first.path,
        bridge.link.second.path,
        report.initial_cost,
        report.final_cost,
        report.iterations
    );
    unpack(bridge, &x);
    repair(bridge);

    let faces = Rc::new(RefCell::new(BTreeSet::new()));
    let problem = build_problem(bridge, ctx, Some(faces.clone()));
    bridge.cost = problem.cost(&pack(bridge));
    drop(problem);
    bridge.crossing_faces = Rc::try_unwrap(faces)
        .expect("cost evaluation released its collector")
        .into_inner();
    info!(
        "bridge {} ({:?}) -> {}: final cost {:.3}",
        bridge.link.first.path, bridge.label, bridge.link.second.path, bridge.cost
    );
}
