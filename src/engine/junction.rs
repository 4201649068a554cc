// Junction graph: nodes that join control points on different paths.
//
// A connection is recorded twice: as a `Connection` in the node's list and as
// a `NodeLink` in the path's list. Both sides are always added and removed
// together. Validation heals any disagreement by removal, never by repair.
//
// Node layout (snapping points together, caching percentages) needs to
// rebuild paths, so it lives on `RouteNetwork`; this module owns the
// bookkeeping, validation and crossing detection.

use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::network::{PathId, PathMap};
use super::path::PathGeometry;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Node side of a connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    pub path:                PathId,
    pub control_point_index: usize,
    /// Percentage of the sample nearest to the joined control point.
    pub cached_percentage:   f32,
    pub node:                NodeId,
}

/// Path side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLink {
    pub node:                NodeId,
    pub control_point_index: usize,
}

/// Junction joining control points of several paths at one world position.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id:           NodeId,
    pub position: Vec3,
    connections:  Vec<Connection>,
}

impl Node {
    pub fn new(id: NodeId, position: Vec3) -> Self {
        Self { id, position, connections: Vec::new() }
    }

    pub fn id(&self) -> NodeId { self.id }

    pub fn connections(&self) -> &[Connection] { &self.connections }

    pub fn connection_to(&self, path: PathId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.path == path)
    }

    /// True if this node holds a connection to `path` at exactly `index`.
    pub fn is_connected_with(&self, path: PathId, index: usize) -> bool {
        self.connections
            .iter()
            .any(|c| c.path == path && c.control_point_index == index)
    }
}

/// A node passed during one traveler tick, with every path it joins.
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionCrossing {
    pub node:        NodeId,
    pub connections: Vec<Connection>,
}

// ============================================================================
// JUNCTION GRAPH
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct JunctionGraph {
    nodes:   BTreeMap<NodeId, Node>,
    next_id: u32,
}

impl JunctionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, position: Vec3) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(id, position));
        id
    }

    /// Insert a node under a fixed id (document loading).
    pub(crate) fn insert_node(&mut self, node: Node) {
        self.next_id = self.next_id.max(node.id.0.saturating_add(1));
        self.nodes.insert(node.id, node);
    }

    /// Push a raw connection without any checks (document loading).
    /// Whatever is inconsistent gets pruned by the next validation.
    pub(crate) fn insert_raw_connection(&mut self, connection: Connection) -> bool {
        match self.nodes.get_mut(&connection.node) {
            Some(node) => {
                node.connections.push(connection);
                true
            }
            None => false,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn set_node_position(&mut self, id: NodeId, position: Vec3) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.position = position;
        }
    }

    pub(crate) fn set_cached_percentage(&mut self, id: NodeId, path: PathId, percentage: f32) {
        if let Some(connection) = self
            .nodes
            .get_mut(&id)
            .and_then(|node| node.connections.iter_mut().find(|c| c.path == path))
        {
            connection.cached_percentage = percentage;
        }
    }

    // ------------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------------

    /// Record a connection on both sides.
    ///
    /// Returns `false` (and changes nothing) for an unknown node or path, an
    /// index past the path's control points, an index the path already joins
    /// to a node, or a node already joined to this path.
    pub fn link(&mut self, paths: &mut PathMap, node_id: NodeId, path_id: PathId, index: usize) -> bool {
        let (Some(node), Some(path)) = (self.nodes.get_mut(&node_id), paths.get_mut(&path_id)) else {
            return false;
        };

        if index >= path.control_points().len() {
            return false;
        }
        if path.link_at_index(index).is_some() || path.link_to_node(node_id).is_some() {
            return false;
        }
        if node.connection_to(path_id).is_some() {
            return false;
        }

        node.connections.push(Connection {
            path:                path_id,
            control_point_index: index,
            cached_percentage:   0.0,
            node:                node_id,
        });
        path.push_link(NodeLink { node: node_id, control_point_index: index });
        true
    }

    /// Remove the connection between `node_id` and `path_id` from both sides.
    /// Idempotent; returns whether anything was removed.
    pub fn unlink(&mut self, paths: &mut PathMap, node_id: NodeId, path_id: PathId) -> bool {
        let mut removed = false;

        if let Some(node) = self.nodes.get_mut(&node_id) {
            let before = node.connections.len();
            node.connections.retain(|c| c.path != path_id);
            removed |= node.connections.len() != before;
        }
        if let Some(path) = paths.get_mut(&path_id) {
            removed |= path.remove_links(|l| l.node == node_id) > 0;
        }

        removed
    }

    /// Remove a node and every link paths hold to it.
    pub fn remove_node(&mut self, paths: &mut PathMap, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;
        for connection in &node.connections {
            if let Some(path) = paths.get_mut(&connection.path) {
                path.remove_links(|l| l.node == node_id);
            }
        }
        Some(node)
    }

    /// Drop every connection touching `path_id` on both sides.
    /// Returns the nodes that lost a connection.
    pub fn unlink_path(&mut self, path_id: PathId, path: &mut PathGeometry) -> Vec<NodeId> {
        path.remove_links(|_| true);

        let mut touched = Vec::new();
        for node in self.nodes.values_mut() {
            let before = node.connections.len();
            node.connections.retain(|c| c.path != path_id);
            if node.connections.len() != before {
                touched.push(node.id);
            }
        }
        touched
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Prune every connection of `path_id` that is no longer consistent:
    /// its node is gone, its control point index no longer exists, or the
    /// two sides disagree. Returns the number of pruned connections.
    pub fn validate(&mut self, path_id: PathId, path: &mut PathGeometry) -> usize {
        let point_count = path.control_points().len();

        let invalid: Vec<NodeLink> = path
            .links()
            .iter()
            .filter(|link| match self.nodes.get(&link.node) {
                None => true,
                Some(node) => {
                    link.control_point_index >= point_count
                        || !node.is_connected_with(path_id, link.control_point_index)
                }
            })
            .copied()
            .collect();

        let mut pruned = 0;
        for link in &invalid {
            log::warn!(
                "pruning invalid junction link: path {:?} point {} node {:?}",
                path_id, link.control_point_index, link.node,
            );
            path.remove_links(|l| l == link);
            if let Some(node) = self.nodes.get_mut(&link.node) {
                node.connections.retain(|c| c.path != path_id);
            }
            pruned += 1;
        }

        // Node-side connections the path has no record of.
        for node in self.nodes.values_mut() {
            let node_id = node.id;
            let before = node.connections.len();
            node.connections.retain(|c| {
                c.path != path_id
                    || path.links().iter().any(|l| {
                        l.node == node_id && l.control_point_index == c.control_point_index
                    })
            });
            let stray = before - node.connections.len();
            if stray > 0 {
                log::warn!("pruning {} stray connection(s) on node {:?} to path {:?}", stray, node_id, path_id);
                pruned += stray;
            }
        }

        pruned
    }

    // ------------------------------------------------------------------------
    // Crossing detection
    // ------------------------------------------------------------------------

    /// Nodes on `path_id` whose cached percentage lies strictly between `from`
    /// and `to`. Each node is reported once, with all of its connections.
    pub fn crossings(&self, path_id: PathId, path: &PathGeometry, from: f32, to: f32) -> Vec<JunctionCrossing> {
        let (rear, front) = if from <= to { (from, to) } else { (to, from) };

        path.links()
            .iter()
            .filter_map(|link| {
                let node = self.nodes.get(&link.node)?;
                let connection = node.connection_to(path_id)?;
                let pct = connection.cached_percentage;
                (rear < pct && pct < front).then(|| JunctionCrossing {
                    node:        node.id,
                    connections: node.connections.clone(),
                })
            })
            .collect()
    }
}
