//! End-to-end reconstruction: link, estimate, optimize, integrate.

use std::collections::HashMap;

use geo_types::Polygon;
use log::{debug, info};
use rand::SeedableRng;

use crate::aabb::AabbTree;
use crate::bridge::{optimize_bridge, setup_bridge, BridgeContext, PathBridge};
use crate::config::ReconstructionConfig;
use crate::integrate::integrate_bridges;
use crate::linker::{drop_narrow_links, link_paths};
use crate::mesh::{FaceId, SurfaceMesh};
use crate::point_cloud::PointCloud;
use crate::road_width::road_width;
use crate::skeleton::Skeleton;

/// Groups faces by their `path` attribute. Index `i` of the result holds the
/// faces of path id `i`.
pub fn paths_from_attribute(mesh: &SurfaceMesh) -> Vec<Vec<FaceId>> {
    let count = mesh
        .path
        .iter()
        .copied()
        .max()
        .map_or(0, |m| (m + 1).max(0) as usize);
    let mut paths = vec![Vec::new(); count];
    for f in mesh.faces() {
        let p = mesh.path[f.idx()];
        if p >= 0 {
            paths[p as usize].push(f);
        }
    }
    paths
}

/// Runs the full bridge pipeline over a segmented mesh and its paths.
///
/// Candidate links are enumerated between same-label path fragments, gated
/// by carriageway width, optimized into ribbons, and the bridges whose final
/// cost stays under the threshold are spliced into `mesh` and `cloud` in
/// deterministic order. Returns the accepted bridges.
pub fn reconstruct(
    mesh: &mut SurfaceMesh,
    cloud: &mut PointCloud,
    polygons: &HashMap<usize, Polygon<f64>>,
    skeletons: &HashMap<usize, Skeleton>,
    config: &ReconstructionConfig,
) -> Vec<PathBridge> {
    let paths = paths_from_attribute(mesh);
    info!("reconstructing over {} paths", paths.len());

    let links = link_paths(mesh, &paths, polygons, skeletons);
    let links = drop_narrow_links(
        links,
        skeletons,
        config.minimal_path_width,
        config.neighborhood_radius,
    );

    // One location tree per path touched by a link, one for the whole mesh.
    let mut path_trees: HashMap<usize, AabbTree> = HashMap::new();
    for link in &links {
        for path in [link.first.path, link.second.path] {
            path_trees
                .entry(path)
                .or_insert_with(|| AabbTree::build_filtered(mesh, |f| {
                    mesh.path[f.idx()] == path as i32
                }));
        }
    }
    let tree = AabbTree::build(mesh);
    let ctx = BridgeContext {
        mesh,
        tree: &tree,
        config,
    };

    let mut accepted = Vec::new();
    for link in &links {
        let widths = road_width(link, skeletons, config.neighborhood_radius);
        let Some(mut bridge) = setup_bridge(link, mesh, &path_trees, polygons, widths, config)
        else {
            debug!(
                "link {} -> {} could not be located on its paths",
                link.first.path, link.second.path
            );
            continue;
        };
        optimize_bridge(&mut bridge, &ctx);
        if bridge.cost <= config.cost_threshold {
            accepted.push(bridge);
        } else {
            info!(
                "bridge {} -> {} rejected, cost {:.3} over threshold",
                link.first.path, link.second.path, bridge.cost
            );
        }
    }
    info!("{} of {} bridges accepted", accepted.len(), links.len());

    // Integration order is the (deterministic) link order.
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    integrate_bridges(mesh, cloud, &accepted, polygons, config, &mut rng);
    accepted
}
