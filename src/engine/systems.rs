// Traveler systems: advance every following traveler in a World against a
// RouteNetwork, branch at junctions, and publish the resulting notifications.
//
// Per traveler, notifications go out in this order:
//   JunctionCrossed (one per node passed) → ReachedEnd → TravelerMoved
// A failing handler skips the rest of that traveler's notifications for the
// tick; other travelers are unaffected.

use bevy_ecs::prelude::*;

use super::components::{BranchAtJunctions, Transform};
use super::events::{JunctionCrossed, ReachedEnd, TravelerMoved};
use super::follower::Traveler;
use super::network::{NetworkError, RouteNetwork};

/// Step used by `FollowerClock::update_immediately` before time scaling.
pub const DEFAULT_DELTA_TIME: f32 = 1.0 / 60.0;

/// What one `advance_travelers` pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowReport {
    pub moved:     usize,
    pub crossings: usize,
    pub switched:  usize,
    pub ended:     usize,
    pub failed:    usize,
}

impl FollowReport {
    fn absorb(&mut self, other: FollowReport) {
        self.moved += other.moved;
        self.crossings += other.crossings;
        self.switched += other.switched;
        self.ended += other.ended;
        self.failed += other.failed;
    }
}

// ============================================================================
// ADVANCE
// ============================================================================

/// Advance every traveler in `world` by `dt` seconds.
pub fn advance_travelers(world: &mut World, network: &mut RouteNetwork, dt: f32) -> FollowReport {
    let mut report = FollowReport::default();

    let mut query = world.query::<(Entity, &mut Traveler, &mut Transform, Option<&BranchAtJunctions>)>();
    for (entity, mut traveler, mut transform, branch) in query.iter_mut(world) {
        let mut step_report = FollowReport::default();
        let result = advance_one(
            entity,
            &mut traveler,
            &mut transform,
            branch.is_some(),
            network,
            dt,
            &mut step_report,
        );
        if let Err(err) = result {
            log::warn!("traveler {:?} skipped: {}", entity, err);
            step_report.failed += 1;
        }
        report.absorb(step_report);
    }

    report
}

fn advance_one(
    entity: Entity,
    traveler: &mut Traveler,
    transform: &mut Transform,
    branches: bool,
    network: &mut RouteNetwork,
    dt: f32,
    report: &mut FollowReport,
) -> Result<(), NetworkError> {
    let path_id = traveler.path();
    let path = network.path(path_id).ok_or(NetworkError::UnknownPath(path_id))?;
    let Some(mut step) = traveler.advance(path, dt)? else {
        return Ok(());
    };

    let crossings = network.crossings(path_id, step.previous_percentage, step.percentage);

    // Branch onto the first connection that leads off this path.
    let mut switch = None;
    if branches {
        let target = crossings.iter().find_map(|crossing| {
            crossing
                .connections
                .iter()
                .find(|c| c.path != path_id)
                .map(|c| (crossing.node, *c))
        });
        if let Some((node, connection)) = target {
            if let Some(next) = network.path(connection.path) {
                traveler.set_path(connection.path, next, connection.cached_percentage);
                step.pose = traveler.pose(next)?;
                step.percentage = traveler.percentage();
                step.reached_end = false;
                switch = Some((node, connection.path));
                report.switched += 1;
                log::debug!("traveler {:?} branched {:?} -> {:?}", entity, path_id, connection.path);
            }
        }
    }

    transform.position = step.pose.position;
    if traveler.face_direction() {
        transform.rotation = step.pose.rotation;
    }
    report.moved += 1;
    report.crossings += crossings.len();

    let events = network.events_mut();
    for crossing in crossings {
        let switched_to = switch.filter(|(node, _)| *node == crossing.node).map(|(_, path)| path);
        events.publish(&JunctionCrossed { entity, path: path_id, crossing, switched_to })?;
    }

    if step.reached_end {
        report.ended += 1;
        events.publish(&ReachedEnd { entity, path: path_id, direction: traveler.direction() })?;
    }

    events.publish(&TravelerMoved {
        entity,
        path:       traveler.path(),
        percentage: step.percentage,
        position:   transform.position,
    })?;
    Ok(())
}

// ============================================================================
// CLOCK
// ============================================================================

/// Drives `advance_travelers` from a frame loop with a global time scale.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct FollowerClock {
    pub enabled: bool,
    time_scale:  f32,
    delta_time:  f32,
}

impl Default for FollowerClock {
    fn default() -> Self {
        Self {
            enabled:    true,
            time_scale: 1.0,
            delta_time: DEFAULT_DELTA_TIME,
        }
    }
}

impl FollowerClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_scale(&self) -> f32 { self.time_scale }

    /// Negative scales are treated as zero.
    pub fn set_time_scale(&mut self, time_scale: f32) {
        self.time_scale = time_scale.max(0.0);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Scaled fixed step used by `update_immediately`.
    pub fn delta_time(&self) -> f32 {
        self.delta_time * self.time_scale
    }

    /// Advance by a frame's `dt`, scaled. Does nothing while disabled.
    pub fn tick(&self, world: &mut World, network: &mut RouteNetwork, dt: f32) -> Option<FollowReport> {
        if !self.enabled {
            return None;
        }
        Some(advance_travelers(world, network, dt * self.time_scale))
    }

    /// One fixed step right now, whether or not the clock is enabled.
    pub fn update_immediately(&self, world: &mut World, network: &mut RouteNetwork) -> FollowReport {
        advance_travelers(world, network, self.delta_time())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::components::TravelDirection;
    use crate::engine::curve::ControlPoint;
    use crate::engine::events::HandlerError;
    use crate::engine::network::PathId;
    use crate::engine::path::PathGeometry;
    use crate::engine::resample::SamplingConfig;
    use approx::assert_relative_eq;
    use glam::Vec3;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fixture {
        world:   World,
        network: RouteNetwork,
        main:    PathId,
        branch:  PathId,
        log:     Rc<RefCell<Vec<&'static str>>>,
    }

    /// Main path: 10 units along +X with a junction at its middle point.
    /// Branch path: starts at that junction and runs 6 units along +Z.
    fn fixture() -> Fixture {
        let mut network = RouteNetwork::new();
        let mut main = PathGeometry::new(
            vec![
                ControlPoint::new(0, Vec3::ZERO, Vec3::ZERO),
                ControlPoint::new(1, Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO),
                ControlPoint::new(2, Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO),
            ],
            SamplingConfig::new(1.0, 1.0),
        );
        main.set_build_on_awake(true);
        let mut branch = PathGeometry::new(
            vec![
                ControlPoint::new(0, Vec3::ZERO, Vec3::ZERO),
                ControlPoint::new(1, Vec3::new(5.0, 0.0, 6.0), Vec3::ZERO),
            ],
            SamplingConfig::new(1.0, 1.0),
        );
        branch.set_build_on_awake(true);

        let main = network.add_path(main).unwrap();
        let branch = network.add_path(branch).unwrap();
        let node = network.add_node(Vec3::ZERO);
        network.connect(node, main, 1).unwrap();
        network.connect(node, branch, 0).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        network.events_mut().subscribe::<JunctionCrossed>(move |_| {
            sink.borrow_mut().push("crossed");
            Ok(())
        });
        let sink = log.clone();
        network.events_mut().subscribe::<ReachedEnd>(move |_| {
            sink.borrow_mut().push("end");
            Ok(())
        });
        let sink = log.clone();
        network.events_mut().subscribe::<TravelerMoved>(move |_| {
            sink.borrow_mut().push("moved");
            Ok(())
        });

        Fixture { world: World::new(), network, main, branch, log }
    }

    fn spawn(fx: &mut Fixture, percentage: f32, speed: f32) -> Entity {
        let mut traveler = Traveler::new(fx.main, speed);
        traveler.set_percentage(fx.network.path(fx.main).unwrap(), percentage);
        fx.world.spawn((traveler, Transform::default())).id()
    }

    #[test]
    fn crossing_is_reported_once_in_order() {
        let mut fx = fixture();
        let entity = spawn(&mut fx, 0.4, 2.0);

        let report = advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        assert_eq!(report.moved, 1);
        assert_eq!(report.crossings, 1);
        assert_eq!(report.switched, 0);
        assert_eq!(*fx.log.borrow(), vec!["crossed", "moved"]);

        let traveler = fx.world.get::<Traveler>(entity).unwrap();
        assert_eq!(traveler.path(), fx.main);
        assert_relative_eq!(traveler.percentage(), 0.6, epsilon = 1e-4);
        let transform = fx.world.get::<Transform>(entity).unwrap();
        assert_relative_eq!(transform.position.x, 6.0, epsilon = 1e-3);
    }

    #[test]
    fn no_crossing_away_from_nodes() {
        let mut fx = fixture();
        spawn(&mut fx, 0.1, 1.0);

        let report = advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        assert_eq!(report.crossings, 0);
        assert_eq!(*fx.log.borrow(), vec!["moved"]);
    }

    #[test]
    fn crossed_event_lists_every_connection() {
        let mut fx = fixture();
        spawn(&mut fx, 0.4, 2.0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        fx.network.events_mut().subscribe::<JunctionCrossed>(move |event| {
            sink.borrow_mut().push(event.crossing.connections.len());
            Ok(())
        });

        advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn end_of_path_fires_once() {
        let mut fx = fixture();
        let entity = spawn(&mut fx, 0.95, 1.0);

        let report = advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        assert_eq!(report.ended, 1);
        assert_eq!(*fx.log.borrow(), vec!["end", "moved"]);

        let traveler = fx.world.get::<Traveler>(entity).unwrap();
        assert_eq!(traveler.percentage(), 1.0);
        assert!(!traveler.is_following());

        let report = advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        assert_eq!(report, FollowReport::default());
        assert_eq!(fx.log.borrow().len(), 2);
    }

    #[test]
    fn branching_traveler_switches_path() {
        let mut fx = fixture();
        let entity = spawn(&mut fx, 0.4, 2.0);
        fx.world.entity_mut(entity).insert(BranchAtJunctions);

        let switched = Rc::new(RefCell::new(None));
        let sink = switched.clone();
        fx.network.events_mut().subscribe::<JunctionCrossed>(move |event| {
            *sink.borrow_mut() = event.switched_to;
            Ok(())
        });

        let report = advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        assert_eq!(report.switched, 1);
        assert_eq!(*switched.borrow(), Some(fx.branch));

        let traveler = fx.world.get::<Traveler>(entity).unwrap();
        assert_eq!(traveler.path(), fx.branch);
        assert_eq!(traveler.percentage(), 0.0);
        assert!(traveler.is_following());
        let transform = fx.world.get::<Transform>(entity).unwrap();
        assert_relative_eq!(transform.position.x, 5.0, epsilon = 1e-4);
    }

    #[test]
    fn face_direction_controls_rotation() {
        let mut fx = fixture();
        let entity = spawn(&mut fx, 0.1, 1.0);
        fx.world.get_mut::<Traveler>(entity).unwrap().set_face_direction(false);

        advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        let transform = fx.world.get::<Transform>(entity).unwrap();
        assert_eq!(transform.rotation, glam::Quat::IDENTITY);

        fx.world.get_mut::<Traveler>(entity).unwrap().set_face_direction(true);
        fx.world
            .get_mut::<Traveler>(entity)
            .unwrap()
            .set_direction(TravelDirection::Reversed);
        advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        let facing = fx.world.get::<Transform>(entity).unwrap().forward();
        assert_relative_eq!(facing.x, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn failing_handler_skips_only_that_traveler() {
        let mut fx = fixture();
        spawn(&mut fx, 0.4, 2.0);
        spawn(&mut fx, 0.1, 1.0);
        fx.network
            .events_mut()
            .subscribe::<JunctionCrossed>(|_| Err(HandlerError::new("reject")));

        let report = advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.moved, 2);
        // First traveler: crossed, then aborted before "moved".
        let log = fx.log.borrow();
        assert_eq!(log.iter().filter(|e| **e == "crossed").count(), 1);
        assert_eq!(log.iter().filter(|e| **e == "moved").count(), 1);
    }

    #[test]
    fn unknown_path_is_counted_as_failure() {
        let mut fx = fixture();
        fx.world.spawn((Traveler::new(PathId(42), 1.0), Transform::default()));
        let report = advance_travelers(&mut fx.world, &mut fx.network, 1.0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.moved, 0);
    }

    #[test]
    fn clock_scales_and_gates_time() {
        let mut fx = fixture();
        let entity = spawn(&mut fx, 0.0, 1.0);
        let mut clock = FollowerClock::new();
        clock.set_time_scale(2.0);

        assert!(clock.tick(&mut fx.world, &mut fx.network, 0.5).is_some());
        assert_relative_eq!(fx.world.get::<Traveler>(entity).unwrap().distance_traveled(), 1.0, epsilon = 1e-4);

        clock.set_enabled(false);
        assert!(clock.tick(&mut fx.world, &mut fx.network, 0.5).is_none());

        let report = clock.update_immediately(&mut fx.world, &mut fx.network);
        assert_eq!(report.moved, 1);
        assert_relative_eq!(
            fx.world.get::<Traveler>(entity).unwrap().distance_traveled(),
            1.0 + 2.0 / 60.0,
            epsilon = 1e-4
        );
    }
}
