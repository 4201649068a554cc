// Route network: owns every path, the junction graph, attached ribbons and the
// event dispatcher, and runs the flows that cross those boundaries.
//
// Rebuild flow for one path:
//   build() → junction validation → node percentage recache →
//   ribbon re-extrusion → PathRebuilt
// All of it runs synchronously inside `build_path`, so callers never see a
// path whose dependents are stale.

use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::curve::ControlPoint;
use super::events::{EventDispatcher, HandlerError, PathRebuilt};
use super::junction::{JunctionCrossing, JunctionGraph, Node, NodeId};
use super::path::{PathError, PathGeometry, PathTransform};
use super::resample::SamplingConfig;
use super::ribbon::{RibbonExtruder, RibbonSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathId(pub u32);

pub type PathMap = BTreeMap<PathId, PathGeometry>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("unknown path {0:?}")]
    UnknownPath(PathId),
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

// ============================================================================
// ROUTE NETWORK
// ============================================================================

#[derive(Debug, Default)]
pub struct RouteNetwork {
    paths:       PathMap,
    junctions:   JunctionGraph,
    ribbons:     BTreeMap<PathId, RibbonExtruder>,
    events:      EventDispatcher,
    next_path:   u32,
    initialized: bool,
}

impl RouteNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Build every path flagged `build_on_awake`, then lay out every node.
    pub fn initialize(&mut self) -> Result<(), NetworkError> {
        let flagged: Vec<PathId> = self
            .paths
            .iter()
            .filter(|(_, path)| path.build_on_awake())
            .map(|(id, _)| *id)
            .collect();
        for id in flagged {
            self.build_path(id)?;
        }

        let nodes: Vec<NodeId> = self.junctions.nodes().map(Node::id).collect();
        for node in nodes {
            self.relayout_node(node)?;
        }

        self.initialized = true;
        log::info!(
            "route network initialized: {} paths, {} nodes, {} ribbons",
            self.paths.len(),
            self.junctions.node_count(),
            self.ribbons.len(),
        );
        Ok(())
    }

    /// Disconnect every node, drop all ribbons and all subscriptions.
    /// Paths and (now empty) nodes stay.
    pub fn shutdown(&mut self) {
        let connections: Vec<(NodeId, PathId)> = self
            .junctions
            .nodes()
            .flat_map(|node| node.connections().iter().map(|c| (c.node, c.path)))
            .collect();
        for (node, path) in connections {
            self.junctions.unlink(&mut self.paths, node, path);
        }

        self.ribbons.clear();
        self.events.clear();
        self.initialized = false;
        log::info!("route network shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    // ------------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------------

    /// Insert a path. It is built right away when flagged `build_on_awake`.
    pub fn add_path(&mut self, path: PathGeometry) -> Result<PathId, NetworkError> {
        let id = PathId(self.next_path);
        self.insert_path(id, path);
        if self.paths.get(&id).is_some_and(PathGeometry::build_on_awake) {
            self.build_path(id)?;
        }
        Ok(id)
    }

    /// Insert under a fixed id without building (document loading).
    pub(crate) fn insert_path(&mut self, id: PathId, path: PathGeometry) {
        self.next_path = self.next_path.max(id.0.saturating_add(1));
        self.paths.insert(id, path);
    }

    /// Remove a path, its connections and its ribbon. Nodes that lose a
    /// connection are laid out again from what they still join.
    pub fn remove_path(&mut self, id: PathId) -> Result<Option<PathGeometry>, NetworkError> {
        let Some(mut path) = self.paths.remove(&id) else {
            return Ok(None);
        };
        let touched = self.junctions.unlink_path(id, &mut path);
        self.ribbons.remove(&id);

        for node in touched {
            self.relayout_node(node)?;
        }
        Ok(Some(path))
    }

    pub fn path(&self, id: PathId) -> Option<&PathGeometry> {
        self.paths.get(&id)
    }

    pub fn paths(&self) -> impl Iterator<Item = (PathId, &PathGeometry)> {
        self.paths.iter().map(|(id, path)| (*id, path))
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    fn path_mut(&mut self, id: PathId) -> Result<&mut PathGeometry, NetworkError> {
        self.paths.get_mut(&id).ok_or(NetworkError::UnknownPath(id))
    }

    /// Authoring entry point for a stored path; see [`PathGeometry::set`].
    pub fn set_path(
        &mut self,
        id: PathId,
        build_on_awake: bool,
        spacing: f32,
        resolution: f32,
        control_points: Vec<ControlPoint>,
    ) -> Result<(), NetworkError> {
        // Build through the network so validation and dependents run too.
        self.path_mut(id)?.set(false, spacing, resolution, control_points);
        self.path_mut(id)?.set_build_on_awake(build_on_awake);
        if build_on_awake {
            self.build_path(id)?;
        }
        Ok(())
    }

    /// Edit one control point in place and rebuild the path. A point joined
    /// to a node lays that node out again: on the node's first connection
    /// the node and the other joined points follow the edit, on a later
    /// connection the point snaps back onto the node.
    pub fn update_control_point(
        &mut self,
        id: PathId,
        index: usize,
        update: impl FnOnce(&mut ControlPoint),
    ) -> Result<(), NetworkError> {
        self.path_mut(id)?.update_control_point(index, update)?;
        self.build_path(id)?;

        let joined = self.paths.get(&id).and_then(|path| path.link_at_index(index)).map(|link| link.node);
        if let Some(node) = joined {
            self.relayout_node(node)?;
        }
        Ok(())
    }

    pub fn set_sampling(&mut self, id: PathId, spacing: f32, resolution: f32) -> Result<(), NetworkError> {
        self.path_mut(id)?.set_config(SamplingConfig::new(spacing, resolution));
        self.build_path(id)?;
        Ok(())
    }

    pub fn set_path_transform(&mut self, id: PathId, transform: PathTransform) -> Result<(), NetworkError> {
        self.path_mut(id)?.set_transform(transform);
        self.build_path(id)?;
        Ok(())
    }

    /// Rebuild a path and everything derived from it. Returns the sample count.
    pub fn build_path(&mut self, id: PathId) -> Result<usize, NetworkError> {
        let path = self.paths.get_mut(&id).ok_or(NetworkError::UnknownPath(id))?;
        path.build();
        self.junctions.validate(id, path);

        // Sample positions moved, so the node percentages on this path did too.
        let recached: Vec<(NodeId, f32)> = path
            .links()
            .iter()
            .filter_map(|link| {
                let node = self.junctions.node(link.node)?;
                let percentage = path.closest_sample(node.position).map_or(0.0, |s| s.percentage);
                Some((link.node, percentage))
            })
            .collect();
        for (node, percentage) in recached {
            self.junctions.set_cached_percentage(node, id, percentage);
        }

        let samples = path.samples().to_vec();
        let length = path.length();
        if let Some(ribbon) = self.ribbons.get_mut(&id) {
            ribbon.rebuild(&samples);
        }

        let count = samples.len();
        self.events.publish(&PathRebuilt { path: id, samples, length })?;
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Ribbons
    // ------------------------------------------------------------------------

    /// Attach (or replace) the ribbon of a path and extrude it immediately.
    pub fn attach_ribbon(&mut self, id: PathId, settings: RibbonSettings) -> Result<(), NetworkError> {
        let path = self.paths.get(&id).ok_or(NetworkError::UnknownPath(id))?;
        let mut extruder = RibbonExtruder::new(settings);
        extruder.rebuild(path.samples());
        self.ribbons.insert(id, extruder);
        Ok(())
    }

    pub fn detach_ribbon(&mut self, id: PathId) -> Option<RibbonExtruder> {
        self.ribbons.remove(&id)
    }

    pub fn ribbon(&self, id: PathId) -> Option<&RibbonExtruder> {
        self.ribbons.get(&id)
    }

    pub fn ribbons(&self) -> impl Iterator<Item = (PathId, &RibbonExtruder)> {
        self.ribbons.iter().map(|(id, ribbon)| (*id, ribbon))
    }

    // ------------------------------------------------------------------------
    // Junctions
    // ------------------------------------------------------------------------

    pub fn add_node(&mut self, position: Vec3) -> NodeId {
        self.junctions.add_node(position)
    }

    pub(crate) fn junctions_mut(&mut self) -> (&mut JunctionGraph, &mut PathMap) {
        (&mut self.junctions, &mut self.paths)
    }

    pub fn junctions(&self) -> &JunctionGraph {
        &self.junctions
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.junctions.node(id)
    }

    /// Join control point `index` of `path` to `node`, then lay the node out.
    /// `Ok(false)` means the connection was rejected and nothing changed.
    pub fn connect(&mut self, node: NodeId, path: PathId, index: usize) -> Result<bool, NetworkError> {
        if !self.junctions.link(&mut self.paths, node, path, index) {
            log::debug!("connection rejected: node {:?} path {:?} point {}", node, path, index);
            return Ok(false);
        }
        self.relayout_node(node)?;
        Ok(true)
    }

    /// Idempotent. The node is laid out again from its remaining connections.
    pub fn disconnect(&mut self, node: NodeId, path: PathId) -> Result<bool, NetworkError> {
        if !self.junctions.unlink(&mut self.paths, node, path) {
            return Ok(false);
        }
        self.relayout_node(node)?;
        Ok(true)
    }

    pub fn remove_node(&mut self, node: NodeId) -> Option<Node> {
        self.junctions.remove_node(&mut self.paths, node)
    }

    /// Snap a node and its joined control points together.
    ///
    /// The first connection decides where the node sits; every later one
    /// drags its path's control point onto the node and rebuilds that path.
    /// Afterwards every connection re-caches the percentage of the sample
    /// nearest to the node.
    pub fn relayout_node(&mut self, id: NodeId) -> Result<(), NetworkError> {
        let node = self.junctions.node(id).ok_or(NetworkError::UnknownNode(id))?;
        let connections = node.connections().to_vec();
        let mut position = node.position;

        for (k, connection) in connections.iter().enumerate() {
            if k == 0 {
                let path = self.paths.get(&connection.path).ok_or(NetworkError::UnknownPath(connection.path))?;
                if let Some(point) = path.world_control_point(connection.control_point_index) {
                    position = point.position;
                    self.junctions.set_node_position(id, position);
                }
            } else {
                self.path_mut(connection.path)?
                    .set_control_point_world_position(connection.control_point_index, position)?;
                self.build_path(connection.path)?;
            }
        }

        for connection in &connections {
            let Some(path) = self.paths.get(&connection.path) else {
                continue;
            };
            let percentage = match path.closest_sample(position) {
                Ok(sample) => sample.percentage,
                Err(err) => {
                    log::debug!("node {:?} on unbuilt path {:?}: {}", id, connection.path, err);
                    0.0
                }
            };
            self.junctions.set_cached_percentage(id, connection.path, percentage);
        }
        Ok(())
    }

    /// Nodes passed on `path` moving from percentage `from` to `to`.
    pub fn crossings(&self, path: PathId, from: f32, to: f32) -> Vec<JunctionCrossing> {
        match self.paths.get(&path) {
            Some(geometry) => self.junctions.crossings(path, geometry, from, to),
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventDispatcher {
        &mut self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn line(from: Vec3, to: Vec3) -> PathGeometry {
        let mut path = PathGeometry::new(
            vec![ControlPoint::new(0, from, Vec3::ZERO), ControlPoint::new(1, to, Vec3::ZERO)],
            SamplingConfig::new(1.0, 1.0),
        );
        path.set_build_on_awake(true);
        path
    }

    /// Straight 10 unit path along +X with a control point at its middle.
    fn ten_with_middle() -> PathGeometry {
        let mut path = PathGeometry::new(
            vec![
                ControlPoint::new(0, Vec3::ZERO, Vec3::ZERO),
                ControlPoint::new(1, Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO),
                ControlPoint::new(2, Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO),
            ],
            SamplingConfig::new(1.0, 1.0),
        );
        path.set_build_on_awake(true);
        path
    }

    #[test]
    fn add_path_builds_flagged_paths() {
        let mut network = RouteNetwork::new();
        let id = network.add_path(ten_with_middle()).unwrap();
        let path = network.path(id).unwrap();
        assert_eq!(path.samples().len(), 11);
        assert_relative_eq!(path.length(), 10.0, epsilon = 1e-4);

        let lazy = network.add_path(PathGeometry::default()).unwrap();
        assert_ne!(id, lazy);
        assert!(network.path(lazy).unwrap().samples().is_empty());
    }

    #[test]
    fn build_publishes_snapshot_and_reextrudes() {
        let mut network = RouteNetwork::new();
        let id = network.add_path(line(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0))).unwrap();
        network.attach_ribbon(id, RibbonSettings::flat(0.5)).unwrap();
        assert_eq!(network.ribbon(id).unwrap().mesh().vertex_count(), 22);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        network.events_mut().subscribe::<PathRebuilt>(move |event| {
            sink.borrow_mut().push((event.path, event.samples.len()));
            Ok(())
        });

        network.set_sampling(id, 0.5, 1.0).unwrap();
        assert_eq!(*seen.borrow(), vec![(id, 21)]);
        assert_eq!(network.ribbon(id).unwrap().mesh().vertex_count(), 42);
        assert_eq!(network.ribbon(id).unwrap().revision(), 2);
    }

    #[test]
    fn failing_rebuild_handler_surfaces_as_error() {
        let mut network = RouteNetwork::new();
        let id = network.add_path(ten_with_middle()).unwrap();
        network
            .events_mut()
            .subscribe::<PathRebuilt>(|_| Err(HandlerError::new("listener gone")));

        assert_eq!(
            network.build_path(id),
            Err(NetworkError::Handler(HandlerError::new("listener gone")))
        );
        assert_eq!(network.build_path(PathId(99)), Err(NetworkError::UnknownPath(PathId(99))));
    }

    #[test]
    fn first_connection_snaps_node_to_control_point() {
        let mut network = RouteNetwork::new();
        let id = network.add_path(ten_with_middle()).unwrap();
        let node = network.add_node(Vec3::new(-3.0, 7.0, 1.0));

        assert_eq!(network.connect(node, id, 1), Ok(true));
        let node = network.node(node).unwrap();
        assert_eq!(node.position, Vec3::new(5.0, 0.0, 0.0));
        assert_relative_eq!(node.connections()[0].cached_percentage, 0.5, epsilon = 1e-4);
    }

    #[test]
    fn rebuild_recaches_node_percentages() {
        let mut network = RouteNetwork::new();
        let id = network.add_path(ten_with_middle()).unwrap();
        let node = network.add_node(Vec3::ZERO);
        network.connect(node, id, 1).unwrap();

        network.update_control_point(id, 0, |p| p.position.x = -10.0).unwrap();
        let connection = network.node(node).unwrap().connection_to(id).unwrap().clone();
        assert_relative_eq!(connection.cached_percentage, 0.75, epsilon = 1e-3);
    }

    #[test]
    fn editing_a_node_owning_point_moves_the_node() {
        let mut network = RouteNetwork::new();
        let main = network.add_path(ten_with_middle()).unwrap();
        let branch = network
            .add_path(line(Vec3::new(0.0, 0.0, 4.0), Vec3::new(0.0, 0.0, 10.0)))
            .unwrap();
        let node = network.add_node(Vec3::ZERO);
        network.connect(node, main, 1).unwrap();
        network.connect(node, branch, 0).unwrap();

        network.update_control_point(main, 1, |p| p.position.z = 2.0).unwrap();

        let moved = Vec3::new(5.0, 0.0, 2.0);
        assert_eq!(network.node(node).unwrap().position, moved);
        let branch_path = network.path(branch).unwrap();
        assert_eq!(branch_path.control_points()[0].position, moved);
        assert_eq!(branch_path.samples()[0].local_position, moved);
        let cached = network.node(node).unwrap().connection_to(branch).map(|c| c.cached_percentage);
        assert_eq!(cached, Some(0.0));
    }

    #[test]
    fn editing_a_later_joined_point_snaps_it_back() {
        let mut network = RouteNetwork::new();
        let main = network.add_path(ten_with_middle()).unwrap();
        let branch = network
            .add_path(line(Vec3::new(0.0, 0.0, 4.0), Vec3::new(0.0, 0.0, 10.0)))
            .unwrap();
        let node = network.add_node(Vec3::ZERO);
        network.connect(node, main, 1).unwrap();
        network.connect(node, branch, 0).unwrap();

        network.update_control_point(branch, 0, |p| p.position = Vec3::new(-3.0, 0.0, 0.0)).unwrap();

        let centre = Vec3::new(5.0, 0.0, 0.0);
        assert_eq!(network.node(node).unwrap().position, centre);
        let branch_path = network.path(branch).unwrap();
        assert_eq!(branch_path.control_points()[0].position, centre);
        assert_eq!(branch_path.samples()[0].local_position, centre);
        assert_eq!(network.path(main).unwrap().control_points()[1].position, centre);
    }

    #[test]
    fn later_connections_move_their_control_point() {
        let mut network = RouteNetwork::new();
        let main = network.add_path(ten_with_middle()).unwrap();
        let branch = network
            .add_path(line(Vec3::new(0.0, 0.0, 4.0), Vec3::new(0.0, 0.0, 10.0)))
            .unwrap();
        let node = network.add_node(Vec3::ZERO);

        network.connect(node, main, 1).unwrap();
        assert_eq!(network.connect(node, branch, 0), Ok(true));

        let branch_path = network.path(branch).unwrap();
        assert_eq!(branch_path.control_points()[0].position, Vec3::new(5.0, 0.0, 0.0));
        // Rebuilt from the new start point.
        assert_eq!(branch_path.samples()[0].local_position, Vec3::new(5.0, 0.0, 0.0));

        let node = network.node(node).unwrap();
        assert_eq!(node.connections().len(), 2);
        assert_eq!(node.connection_to(branch).map(|c| c.cached_percentage), Some(0.0));
    }

    #[test]
    fn connection_respects_path_transform() {
        let mut network = RouteNetwork::new();
        let main = network
            .add_path(ten_with_middle().with_transform(PathTransform::from_translation(Vec3::new(0.0, 2.0, 0.0))))
            .unwrap();
        let branch = network.add_path(line(Vec3::ZERO, Vec3::new(0.0, 0.0, 8.0))).unwrap();
        let node = network.add_node(Vec3::ZERO);

        network.connect(node, main, 2).unwrap();
        network.connect(node, branch, 0).unwrap();

        assert_eq!(network.node(node).unwrap().position, Vec3::new(10.0, 2.0, 0.0));
        let start = network.path(branch).unwrap().world_control_point(0).unwrap();
        assert_eq!(start.position, Vec3::new(10.0, 2.0, 0.0));
    }

    #[test]
    fn moving_a_path_rebuilds_its_ribbon() {
        let mut network = RouteNetwork::new();
        let id = network.add_path(line(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0))).unwrap();
        network.attach_ribbon(id, RibbonSettings::flat(0.5)).unwrap();

        network.set_path_transform(id, PathTransform::from_translation(Vec3::new(0.0, 3.0, 0.0))).unwrap();
        let start = network.path(id).unwrap().world_position_at_percentage(0.0).unwrap();
        assert_eq!(start, Vec3::new(0.0, 3.0, 0.0));
        assert_eq!(network.ribbon(id).unwrap().revision(), 2);

        assert!(network.detach_ribbon(id).is_some());
        assert!(network.ribbon(id).is_none());
        assert_eq!(network.ribbons().count(), 0);
    }

    #[test]
    fn connect_twice_is_rejected_and_disconnect_is_idempotent() {
        let mut network = RouteNetwork::new();
        let id = network.add_path(ten_with_middle()).unwrap();
        let node = network.add_node(Vec3::ZERO);

        assert_eq!(network.connect(node, id, 1), Ok(true));
        assert_eq!(network.connect(node, id, 1), Ok(false));

        assert_eq!(network.disconnect(node, id), Ok(true));
        assert_eq!(network.disconnect(node, id), Ok(false));
        assert!(network.node(node).unwrap().connections().is_empty());
        assert!(network.path(id).unwrap().links().is_empty());
    }

    #[test]
    fn crossings_report_node_once_with_all_connections() {
        let mut network = RouteNetwork::new();
        let main = network.add_path(ten_with_middle()).unwrap();
        let branch = network.add_path(line(Vec3::ZERO, Vec3::new(0.0, 0.0, 6.0))).unwrap();
        let node = network.add_node(Vec3::ZERO);
        network.connect(node, main, 1).unwrap();
        network.connect(node, branch, 0).unwrap();

        let hits = network.crossings(main, 0.4, 0.6);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node, node);
        assert_eq!(hits[0].connections.len(), 2);
        assert!(network.crossings(main, 0.1, 0.2).is_empty());
    }

    #[test]
    fn editing_a_point_away_prunes_nothing_but_shrinking_does() {
        let mut network = RouteNetwork::new();
        let main = network.add_path(ten_with_middle()).unwrap();
        let node = network.add_node(Vec3::ZERO);
        network.connect(node, main, 2).unwrap();

        network.update_control_point(main, 2, |p| p.position.z = 1.0).unwrap();
        assert_eq!(network.path(main).unwrap().links().len(), 1);

        let points = network.path(main).unwrap().control_points()[..2].to_vec();
        network.set_path(main, true, 1.0, 1.0, points).unwrap();
        assert!(network.path(main).unwrap().links().is_empty());
        assert!(network.node(node).unwrap().connections().is_empty());
    }

    #[test]
    fn remove_path_clears_connections_and_ribbon() {
        let mut network = RouteNetwork::new();
        let main = network.add_path(ten_with_middle()).unwrap();
        let branch = network.add_path(line(Vec3::ZERO, Vec3::new(0.0, 0.0, 6.0))).unwrap();
        network.attach_ribbon(main, RibbonSettings::default()).unwrap();
        let node = network.add_node(Vec3::ZERO);
        network.connect(node, main, 1).unwrap();
        network.connect(node, branch, 0).unwrap();

        assert!(network.remove_path(main).unwrap().is_some());
        assert!(network.ribbon(main).is_none());
        let node = network.node(node).unwrap();
        assert_eq!(node.connections().len(), 1);
        assert_eq!(node.connections()[0].path, branch);
        assert!(network.remove_path(main).unwrap().is_none());
    }

    #[test]
    fn shutdown_disconnects_everything() {
        let mut network = RouteNetwork::new();
        let main = network.add_path(ten_with_middle()).unwrap();
        network.attach_ribbon(main, RibbonSettings::default()).unwrap();
        let node = network.add_node(Vec3::ZERO);
        network.connect(node, main, 0).unwrap();
        network.events_mut().subscribe::<PathRebuilt>(|_| Ok(()));
        network.initialize().unwrap();
        assert!(network.is_initialized());

        network.shutdown();
        assert!(!network.is_initialized());
        assert!(network.node(node).unwrap().connections().is_empty());
        assert!(network.path(main).unwrap().links().is_empty());
        assert_eq!(network.ribbons().count(), 0);
        assert_eq!(network.events().subscriber_count::<PathRebuilt>(), 0);
    }
}
