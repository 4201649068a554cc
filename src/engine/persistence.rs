// RON route documents: save a network's authored state and load it back.
//
// Only authored data is stored (control points, sampling, transforms, node
// positions, connections, ribbon settings). Samples, lengths and cached
// percentages are derived again on load.
//
// Load is forgiving: references that point nowhere are dropped with a
// warning instead of failing the whole document. Records using the id
// u32::MAX are dropped too; fresh ids are always allocated above every
// loaded one and that id leaves no room.

use std::fs;
use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::curve::ControlPoint;
use super::junction::{Connection, Node, NodeId, NodeLink};
use super::network::{NetworkError, PathId, RouteNetwork};
use super::path::{PathGeometry, PathTransform};
use super::resample::SamplingConfig;
use super::ribbon::RibbonSettings;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to parse route document: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to serialize route document: {0}")]
    Serialize(#[from] ron::Error),
    #[error("route document io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub node:                NodeId,
    pub control_point_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub id:             PathId,
    #[serde(default)]
    pub transform:      PathTransform,
    #[serde(default)]
    pub build_on_awake: bool,
    pub spacing:        f32,
    pub resolution:     f32,
    pub control_points: Vec<ControlPoint>,
    #[serde(default)]
    pub links:          Vec<LinkRecord>,
    #[serde(default)]
    pub ribbon:         Option<RibbonSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub path:                PathId,
    pub control_point_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id:          NodeId,
    pub position:    Vec3,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteDocument {
    #[serde(default)]
    pub paths: Vec<PathRecord>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

// ============================================================================
// SAVE / LOAD
// ============================================================================

impl RouteDocument {
    /// Capture the authored state of `network`.
    pub fn save(network: &RouteNetwork) -> Self {
        let paths = network
            .paths()
            .map(|(id, path)| PathRecord {
                id,
                transform:      *path.transform(),
                build_on_awake: path.build_on_awake(),
                spacing:        path.config().spacing(),
                resolution:     path.config().resolution(),
                control_points: path.control_points().to_vec(),
                links:          path
                    .links()
                    .iter()
                    .map(|l| LinkRecord { node: l.node, control_point_index: l.control_point_index })
                    .collect(),
                ribbon:         network.ribbon(id).map(|r| r.settings()),
            })
            .collect();

        let nodes = network
            .junctions()
            .nodes()
            .map(|node| NodeRecord {
                id:          node.id(),
                position:    node.position,
                connections: node
                    .connections()
                    .iter()
                    .map(|c| ConnectionRecord { path: c.path, control_point_index: c.control_point_index })
                    .collect(),
            })
            .collect();

        Self { paths, nodes }
    }

    /// Build a fresh, initialized network from this document.
    ///
    /// Every path is validated against the node list, so connections that
    /// name missing paths, nodes or control points are pruned. Flagged paths
    /// are built and every node is laid out.
    pub fn load(&self) -> Result<RouteNetwork, NetworkError> {
        let mut network = RouteNetwork::new();

        for record in &self.paths {
            if record.id.0 == u32::MAX {
                log::warn!("dropping path {:?}: id out of range", record.id);
                continue;
            }
            let mut path = PathGeometry::new(
                record.control_points.clone(),
                SamplingConfig::new(record.spacing, record.resolution),
            )
            .with_transform(record.transform);
            path.set_build_on_awake(record.build_on_awake);

            for link in &record.links {
                let taken = path.link_at_index(link.control_point_index).is_some()
                    || path.link_to_node(link.node).is_some();
                if taken {
                    log::warn!("dropping duplicate link on path {:?} to node {:?}", record.id, link.node);
                    continue;
                }
                path.push_link(NodeLink { node: link.node, control_point_index: link.control_point_index });
            }
            network.insert_path(record.id, path);
        }

        let (junctions, paths) = network.junctions_mut();
        for record in &self.nodes {
            if record.id.0 == u32::MAX {
                log::warn!("dropping node {:?}: id out of range", record.id);
                continue;
            }
            junctions.insert_node(Node::new(record.id, record.position));
            for connection in &record.connections {
                let known = paths.contains_key(&connection.path);
                let duplicate = junctions
                    .node(record.id)
                    .is_some_and(|node| node.connection_to(connection.path).is_some());
                if !known || duplicate {
                    log::warn!(
                        "dropping connection of node {:?} to path {:?} (unknown or duplicate)",
                        record.id, connection.path,
                    );
                    continue;
                }
                junctions.insert_raw_connection(Connection {
                    path:                connection.path,
                    control_point_index: connection.control_point_index,
                    cached_percentage:   0.0,
                    node:                record.id,
                });
            }
        }

        let mut pruned = 0;
        for (id, path) in paths.iter_mut() {
            pruned += junctions.validate(*id, path);
        }
        if pruned > 0 {
            log::warn!("route document had {} dangling connection(s)", pruned);
        }

        for record in &self.paths {
            if let Some(settings) = record.ribbon.filter(|_| record.id.0 != u32::MAX) {
                network.attach_ribbon(record.id, settings)?;
            }
        }

        network.initialize()?;
        Ok(network)
    }

    pub fn to_ron(&self) -> Result<String, DocumentError> {
        let pretty = ron::ser::PrettyConfig::default();
        Ok(ron::ser::to_string_pretty(self, pretty)?)
    }

    pub fn from_ron(text: &str) -> Result<Self, DocumentError> {
        Ok(ron::from_str(text)?)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), DocumentError> {
        fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let text = fs::read_to_string(path)?;
        Self::from_ron(&text)
    }
}
