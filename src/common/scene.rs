//! Scene loading, parsing, and validation logic.
//!
//! A scene describes the world bounds, the link-layer algorithm every host
//! runs, explicit nodes and/or a random layout generator, and an optional
//! mobility model. [`build_hosts`] turns a validated scene into simulator
//! hosts with per-host random sources derived from the run seed.

use anyhow::Context;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::protocol::AlgorithmConfig;
use crate::simulation::geometry::Region;
use crate::simulation::host::{Host, Mobility, MobilityConfig};
use crate::simulation::types::{HostId, Point};

/// Error type for scene loading failures.
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "Failed to parse JSON: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

/// Explicitly placed host.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct NodeSpec {
    pub node_id: HostId,
    pub position: Point,
    /// Transmission reach in world units.
    pub reach: f64,
}

/// Random placement of additional hosts.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LayoutConfig {
    pub count: usize,
    /// Reach of every generated host is drawn uniformly from this range.
    #[serde(default = "default_reach_range")]
    pub reach_range: (f64, f64),
}

fn default_reach_range() -> (f64, f64) {
    (10.0, 100.0)
}

/// Root structure representing the entire scene.
#[derive(Debug, Deserialize, Clone)]
pub struct Scene {
    /// Top-left corner of the world coordinate system.
    pub world_top_left: Point,
    /// Bottom-right corner of the world coordinate system.
    pub world_bottom_right: Point,
    pub algorithm: AlgorithmConfig,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    /// Generated hosts, numbered after the largest explicit id.
    #[serde(default)]
    pub layout: Option<LayoutConfig>,
    /// Applied to every host when present.
    #[serde(default)]
    pub mobility: Option<MobilityConfig>,
}

impl Scene {
    pub fn region(&self) -> Region {
        Region::new(self.world_top_left, self.world_bottom_right)
    }

    /// Hosts the scene will produce, explicit and generated.
    pub fn host_count(&self) -> usize {
        self.nodes.len() + self.layout.as_ref().map_or(0, |layout| layout.count)
    }
}

/// Load and parse a scene from a file.
///
/// # Parameters
///
/// * `path` - Path to the scene JSON file
///
/// # Returns
///
/// Parsed and validated Scene or an error.
pub fn load_scene(path: &str) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| SceneLoadError::FileReadError(e.to_string()))?;

    parse_scene(&data)
}

/// Parse and validate scene JSON.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?;

    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;

    Ok(scene)
}

/// Validate scene configuration.
///
/// # Parameters
///
/// * `scene` - The parsed scene to validate
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    const MAX_NODES: usize = 10000;

    let region = scene.region();
    if scene.world_top_left.x >= scene.world_bottom_right.x || scene.world_top_left.y >= scene.world_bottom_right.y {
        return Err(format!(
            "Invalid world bounds: top-left ({}, {}) must be strictly less than bottom-right ({}, {})",
            scene.world_top_left.x, scene.world_top_left.y, scene.world_bottom_right.x, scene.world_bottom_right.y
        ));
    }

    // Check node count
    if scene.host_count() == 0 {
        return Err("Scene must contain at least one node".to_string());
    }
    if scene.host_count() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scene.host_count(), MAX_NODES));
    }

    // Check for duplicate node IDs
    let mut node_ids = HashSet::new();
    for node in &scene.nodes {
        if !node_ids.insert(node.node_id) {
            return Err(format!("Duplicate node_id found: {}", node.node_id));
        }
    }

    for node in &scene.nodes {
        if !region.contains(&node.position) {
            return Err(format!(
                "Node {} position ({}, {}) is outside the world bounds",
                node.node_id, node.position.x, node.position.y
            ));
        }
        if node.reach.is_nan() || node.reach < 0.0 {
            return Err(format!("Node {} has invalid reach {}", node.node_id, node.reach));
        }
    }

    if let Some(layout) = &scene.layout {
        let (min, max) = layout.reach_range;
        if min.is_nan() || max.is_nan() || min < 0.0 || min > max {
            return Err(format!("Invalid layout reach_range ({}, {})", min, max));
        }
        let largest_id = scene.nodes.iter().map(|n| n.node_id as u64).max().unwrap_or(0);
        if largest_id + layout.count as u64 > HostId::MAX as u64 {
            return Err("Generated node ids would overflow".to_string());
        }
    }

    scene.algorithm.validate()?;

    if let Some(mobility) = &scene.mobility {
        mobility.validate()?;
    }

    Ok(())
}

/// Random source of one host, derived from the run seed.
pub fn host_rng(seed: u64, id: HostId) -> StdRng {
    StdRng::seed_from_u64(seed ^ (id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Create every host of a validated scene.
///
/// Explicit nodes come first, then `layout.count` generated hosts placed
/// uniformly in the world bounds. Generation uses its own random source
/// seeded with `seed`, so the same seed always yields the same layout.
pub fn build_hosts(scene: &Scene, seed: u64) -> Vec<Host> {
    let region = scene.region();
    let mut specs = scene.nodes.clone();

    if let Some(layout) = &scene.layout {
        let mut rng = StdRng::seed_from_u64(seed);
        let first_id = scene.nodes.iter().map(|n| n.node_id + 1).max().unwrap_or(0);
        let (min_reach, max_reach) = layout.reach_range;
        for offset in 0..layout.count {
            let position = Point {
                x: rng.gen_range(scene.world_top_left.x..=scene.world_bottom_right.x),
                y: rng.gen_range(scene.world_top_left.y..=scene.world_bottom_right.y),
            };
            let reach = rng.gen_range(min_reach..=max_reach);
            specs.push(NodeSpec {
                node_id: first_id + offset as HostId,
                position,
                reach,
            });
        }
        debug!("Generated {} hosts with seed {}", layout.count, seed);
    }

    specs
        .into_iter()
        .map(|spec| {
            let host = Host::new(
                spec.node_id,
                spec.position,
                spec.reach,
                scene.algorithm.instantiate(),
                host_rng(seed, spec.node_id),
            );
            match &scene.mobility {
                Some(config) => host.with_mobility(Mobility::new(config.clone(), region)),
                None => host,
            }
        })
        .collect()
}
