//! Reconstruction of transportation surfaces from segmented urban meshes.
//!
//! Given a labelled 2-manifold mesh, per-path footprint polygons and their
//! straight skeletons, the crate detects path fragments wrongly disconnected
//! by overlying structures, fits bridge/tunnel ribbons across the gaps, and
//! splices the accepted ribbons back into the mesh and its point cloud by
//! boolean corefinement.

pub mod aabb;
pub mod bridge;
pub mod cap;
pub mod config;
pub mod corefine;
pub mod exact;
pub mod geometry;
pub mod integrate;
pub mod io;
pub mod linker;
pub mod mesh;
pub mod pipeline;
pub mod point_cloud;
pub mod ribbon;
pub mod road_width;
pub mod skeleton;
pub mod solver;

pub use bridge::PathBridge;
pub use config::ReconstructionConfig;
pub use mesh::{Label, SurfaceMesh};
pub use pipeline::reconstruct;
pub use point_cloud::PointCloud;
pub use skeleton::{PathLink, Skeleton, SkeletonPoint};
