use std::collections::HashMap;

use geo_types::{LineString, Polygon};
use transport_recon::geometry::{Point, Point3};
use transport_recon::linker::link_paths;
use transport_recon::pipeline::paths_from_attribute;
use transport_recon::skeleton::Skeleton;
use transport_recon::{reconstruct, Label, PointCloud, ReconstructionConfig, SurfaceMesh};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two collinear road fragments at z = 0 with a shallow depression between
/// them. The gap floor sits one meter lower, so the accepted bridge must
/// span it as a short deck.
fn collinear_world() -> (
    SurfaceMesh,
    HashMap<usize, Polygon<f64>>,
    HashMap<usize, Skeleton>,
) {
    let mut mesh = SurfaceMesh::new();
    let mut plate = |x0: f64, x1: f64, z: f64, label: Label, path: i32, mesh: &mut SurfaceMesh| {
        let a = mesh.add_vertex(Point3::new(x0, -3.0, z));
        let b = mesh.add_vertex(Point3::new(x1, -3.0, z));
        let c = mesh.add_vertex(Point3::new(x1, 3.0, z));
        let d = mesh.add_vertex(Point3::new(x0, 3.0, z));
        let f0 = mesh.add_face(a, b, c);
        let f1 = mesh.add_face(a, c, d);
        for f in [f0, f1] {
            mesh.label[f.idx()] = label;
            mesh.path[f.idx()] = path;
        }
    };
    plate(0.0, 20.0, 0.0, Label::Road, 0, &mut mesh);
    plate(20.0, 30.0, -1.0, Label::LowVegetation, -1, &mut mesh);
    plate(30.0, 50.0, 0.0, Label::Road, 1, &mut mesh);
    mesh.compute_normal_angle_coefs();

    let mut polygons = HashMap::new();
    let mut skeletons = HashMap::new();
    for (id, x0) in [(0usize, 0.0f64), (1usize, 30.0f64)] {
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
    (mesh, polygons, skeletons)
}

#[test]
fn collinear_fragments_get_bridged() {
    init_logs();
    let (mut mesh, polygons, skeletons) = collinear_world();
    let mut cloud = PointCloud::new();
    let faces_before = mesh.n_faces();
    let config = ReconstructionConfig {
        cost_threshold: 500.0,
        ..ReconstructionConfig::default()
    };

    let bridges = reconstruct(&mut mesh, &mut cloud, &polygons, &skeletons, &config);

    assert_eq!(bridges.len(), 1);
    let bridge = &bridges[0];
    // Widths follow twice the skeleton time at the facing endpoints.
    assert!((bridge.w_alpha - 6.0).abs() < 1e-6);
    assert!((bridge.w_beta - 6.0).abs() < 1e-6);
    assert!(bridge.cost < config.cost_threshold);
    // Every station satisfies the repaired-width invariant.
    for i in 0..=bridge.n {
        assert!(bridge.xl[i] + bridge.xr[i] >= 0.0);
    }
    // The ribbon footprint joins the fragments: new road-labelled faces
    // appeared over the gap.
    assert!(mesh.n_faces() > faces_before);
    let joining = mesh.faces().any(|f| {
        let c = mesh.face_centroid(f);
        mesh.new_face[f.idx()]
            && mesh.label[f.idx()] == Label::Road
            && c.x > 20.0
            && c.x < 30.0
    });
    assert!(joining, "no new road face spans the gap");
    // Bare new faces were sampled into the cloud with the bridge label.
    assert!(!cloud.is_empty());
    assert!(cloud.labels.iter().any(|&l| l == Label::Road));
}

#[test]
fn narrow_road_is_never_bridged() {
    init_logs();
    let (mut mesh, polygons, mut skeletons) = collinear_world();
    // Same geometry, but the carriageway is only one meter wide.
    for sk in skeletons.values_mut() {
        let mut narrow = Skeleton::new();
        for v in sk.vertices() {
            narrow.add_vertex(sk.point(v), sk.time(v).min(0.5));
        }
        for e in sk.edges() {
            let (a, b) = sk.edge_endpoints(e);
            narrow.add_edge(a, b);
        }
        *sk = narrow;
    }
    let mut cloud = PointCloud::new();
    let faces_before = mesh.n_faces();
    let config = ReconstructionConfig::default();

    let bridges = reconstruct(&mut mesh, &mut cloud, &polygons, &skeletons, &config);

    assert!(bridges.is_empty());
    assert_eq!(mesh.n_faces(), faces_before);
    assert!(cloud.is_empty());
}

#[test]
fn linking_is_stable_under_coordinate_noise() {
    let (mesh, polygons, skeletons) = collinear_world();
    let paths = paths_from_attribute(&mesh);
    let links = link_paths(&mesh, &paths, &polygons, &skeletons);

    // Perturb every skeleton vertex well below geometric resolution.
    let mut wobbled = HashMap::new();
    for (&id, sk) in &skeletons {
        let mut copy = Skeleton::new();
        for v in sk.vertices() {
            let p = sk.point(v);
            copy.add_vertex(
                Point::new(p.x + 1e-10, p.y - 1e-10),
                sk.time(v),
            );
        }
        for e in sk.edges() {
            let (a, b) = sk.edge_endpoints(e);
            copy.add_edge(a, b);
        }
        wobbled.insert(id, copy);
    }
    let links_wobbled = link_paths(&mesh, &paths, &polygons, &wobbled);

    assert_eq!(links.len(), links_wobbled.len());
    for (a, b) in links.iter().zip(links_wobbled.iter()) {
        assert_eq!(a.first.path, b.first.path);
        assert_eq!(a.second.path, b.second.path);
        assert!((a.first.point.x - b.first.point.x).abs() < 1e-6);
        assert!((a.second.point.x - b.second.point.x).abs() < 1e-6);
    }
}

#[test]
fn different_labels_are_never_linked() {
    let (mut mesh, polygons, skeletons) = collinear_world();
    // Turn the second fragment into a railway: the fragments no longer share
    // a label, so no cross-path candidate may survive.
    for f in mesh.faces() {
        if mesh.path[f.idx()] == 1 {
            mesh.label[f.idx()] = Label::Rail;
        }
    }
    let paths = paths_from_attribute(&mesh);
    let links = link_paths(&mesh, &paths, &polygons, &skeletons);
    assert!(links.iter().all(|l| l.first.path == l.second.path));
    assert!(links.is_empty());
}
