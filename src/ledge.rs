//! Geometry probes that find ledges and decide which climbing moves are possible.
//!
//! All probes are pure queries: they never move the character. Every result is an `Option`,
//! `None` meaning "no usable geometry here".

use core::f32::consts::FRAC_PI_4;

use tracing::trace;

use crate::{
    ballistic::{ArcPreference, BallisticSolver},
    collision::{CapsuleShape, CollisionQueries, QueryFilter, ShapeHit},
    grab_points::GrabPointRegistry,
    physics::{normalize_2d, rotation_from_forward_up, try_normalize_2d},
    prelude::*,
};

/// Tuning of the ledge probes.
#[derive(Clone, Debug, PartialEq, Reflect)]
pub struct LedgeProbe {
    /// Layers the probes trace against.
    pub channel: u32,
    /// Height of the forward probe above the character center.
    pub trace_height: f32,
    pub trace_radius: f32,
    pub trace_half_height: f32,
    /// How far ahead of the character center the forward probe reaches.
    pub trace_distance: f32,
    /// Number of downward samples looking for the top of a ledge.
    pub top_samples: u32,
    /// Horizontal span the top samples cover, starting at the forward hit.
    pub top_sample_span: f32,
    /// How far past the edge a climb-up needs standing room.
    pub min_climb_up_depth: f32,
    /// Horizontal distance between the wall and the character center while hanging.
    pub hang_offset_forward: f32,
    /// Vertical distance between the ledge top and the character center while hanging.
    pub hang_offset_down: f32,
    /// Sideways offset of the probe checking whether the ledge continues.
    pub shimmy_probe_offset: f32,
    pub corner_samples: u32,
    pub hop_up_height: f32,
    /// A hop-up target must be at least this much higher than the current ledge.
    pub min_hop_rise: f32,
    pub jump_up_height: f32,
    pub side_jump_min_distance: f32,
    pub side_jump_max_distance: f32,
    pub side_jump_samples: u32,
    /// Grab points further than this are never launched to.
    pub launch_range: f32,
    /// Maximum angle between the movement direction and a grab point, in radians.
    pub max_launch_angle: f32,
    pub max_launch_speed: f32,
}

impl Default for LedgeProbe {
    fn default() -> Self {
        Self {
            channel: u32::MAX,
            trace_height: 0.6,
            trace_radius: 0.2,
            trace_half_height: 0.5,
            trace_distance: 0.75,
            top_samples: 5,
            top_sample_span: 0.3,
            min_climb_up_depth: 0.3,
            hang_offset_forward: 0.45,
            hang_offset_down: 1.01,
            shimmy_probe_offset: 0.45,
            corner_samples: 3,
            hop_up_height: 1.0,
            min_hop_rise: 0.3,
            jump_up_height: 1.0,
            side_jump_min_distance: 1.0,
            side_jump_max_distance: 3.0,
            side_jump_samples: 3,
            launch_range: 6.0,
            max_launch_angle: FRAC_PI_4,
            max_launch_speed: 12.0,
        }
    }
}

/// Where the probes are cast from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeFrame {
    pub origin: Vec3,
    /// Horizontal, normalized.
    pub forward: Vec3,
    /// Horizontal, normalized.
    pub right: Vec3,
}

impl ProbeFrame {
    pub fn from_transform(transform: &Transform) -> Self {
        Self::facing(transform.translation, transform.rotation * Vec3::NEG_Z)
    }

    pub fn facing(origin: Vec3, forward: Vec3) -> Self {
        let forward = try_normalize_2d(forward).unwrap_or(Vec3::NEG_Z);
        Self {
            origin,
            forward,
            right: forward.cross(Vec3::Y),
        }
    }

    pub fn shifted(self, offset: Vec3) -> Self {
        Self {
            origin: self.origin + offset,
            ..self
        }
    }
}

/// A wall hit together with the top surface above it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LedgeHit {
    pub forward: ShapeHit,
    pub top: ShapeHit,
}

/// Where the character hangs from a ledge.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct HangPose {
    pub location: Vec3,
    pub rotation: Quat,
}

impl HangPose {
    pub fn of(transform: &Transform) -> Self {
        Self {
            location: transform.translation,
            rotation: transform.rotation,
        }
    }

    pub fn apply(&self, transform: &mut Transform) {
        transform.translation = self.location;
        transform.rotation = self.rotation;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShimmyTarget {
    /// The ledge continues sideways.
    Along { location: Vec3 },
    /// The ledge turns inward; hang here instead.
    InnerCorner(HangPose),
}

/// [`LedgeProbe`] bound to the scene it probes.
pub struct Probe<'a> {
    pub cfg: &'a LedgeProbe,
    pub queries: &'a dyn CollisionQueries,
    pub filter: QueryFilter,
}

impl LedgeProbe {
    pub fn bind<'a>(&'a self, queries: &'a dyn CollisionQueries, ignore: &[Entity]) -> Probe<'a> {
        Probe {
            cfg: self,
            queries,
            filter: QueryFilter::from_mask(self.channel).with_ignored(ignore.iter().copied()),
        }
    }

    fn trace_shape(&self) -> CapsuleShape {
        CapsuleShape::new(self.trace_radius, self.trace_half_height)
    }
}

impl Probe<'_> {
    fn trace_start(&self, frame: &ProbeFrame) -> Vec3 {
        frame.origin + Vec3::Y * self.cfg.trace_height
    }

    /// Sweeps the probe capsule forward, looking for a wall.
    pub fn forward_hit(&self, frame: &ProbeFrame) -> Option<ShapeHit> {
        let hit = self.queries.sweep_capsule(
            self.cfg.trace_shape(),
            self.trace_start(frame),
            frame.forward * self.cfg.trace_distance,
            &self.filter,
        )?;
        (!hit.start_penetrating).then_some(hit)
    }

    /// Samples downward just past `forward_hit` for the top of the same object.
    ///
    /// Each sample keeps the nearest hit on that object, so other geometry above the top does
    /// not hide it. A sample starting inside the object finds no top.
    pub fn top_hit(&self, frame: &ProbeFrame, forward_hit: &ShapeHit) -> Option<ShapeHit> {
        let samples = self.cfg.top_samples.max(1);
        let step = self.cfg.top_sample_span / samples as f32;
        let start_y = self.trace_start(frame).y + self.cfg.trace_half_height;
        let depth = self.cfg.trace_half_height * 2.0;
        (0..samples).find_map(|i| {
            let start = Vec3::new(forward_hit.point.x, start_y, forward_hit.point.z)
                + frame.forward * step * (i + 1) as f32;
            let hit = self
                .queries
                .line_hits(start, start - Vec3::Y * depth, &self.filter)
                .into_iter()
                .find(|hit| hit.entity == forward_hit.entity)?;
            (!hit.start_penetrating && hit.entity == forward_hit.entity && hit.normal.y > 0.0)
                .then_some(hit)
        })
    }

    pub fn found_ledge(&self, frame: &ProbeFrame) -> Option<LedgeHit> {
        let forward = self.forward_hit(frame)?;
        let Some(top) = self.top_hit(frame, &forward) else {
            trace!(entity = ?forward.entity, "wall without a reachable top");
            return None;
        };
        Some(LedgeHit { forward, top })
    }

    /// The pose that hangs the character from `ledge`, facing the wall.
    pub fn hang_pose(&self, frame: &ProbeFrame, ledge: &LedgeHit) -> HangPose {
        let out = try_normalize_2d(ledge.forward.normal).unwrap_or(-frame.forward);
        let edge = Vec3::new(ledge.forward.point.x, ledge.top.point.y, ledge.forward.point.z);
        HangPose {
            location: edge + out * self.cfg.hang_offset_forward - Vec3::Y * self.cfg.hang_offset_down,
            rotation: rotation_from_forward_up(-out, Vec3::Y).unwrap_or(Quat::IDENTITY),
        }
    }

    /// Whether the ledge continues toward `direction` (the sign picks the side).
    pub fn can_move_in_direction(
        &self,
        frame: &ProbeFrame,
        direction: f32,
        ledge: Entity,
    ) -> Option<ShimmyTarget> {
        let side = frame.right * direction.signum();
        let shifted = frame.shifted(side * self.cfg.shimmy_probe_offset);
        if let Some(hit) = self.forward_hit(&shifted)
            && hit.entity == ledge
            && self.top_hit(&shifted, &hit).is_some()
        {
            return Some(ShimmyTarget::Along {
                location: hit.point,
            });
        }

        let wall = self.queries.sweep_capsule(
            self.cfg.trace_shape(),
            self.trace_start(frame),
            side * self.cfg.trace_distance,
            &self.filter,
        )?;
        if wall.start_penetrating {
            return None;
        }
        let corner = ProbeFrame::facing(frame.origin, -wall.normal);
        let ledge = self.found_ledge(&corner)?;
        trace!(entity = ?ledge.top.entity, "inner corner");
        Some(ShimmyTarget::InnerCorner(self.hang_pose(&corner, &ledge)))
    }

    /// Looks around the outside corner at the end of the ledge in `direction`.
    ///
    /// Among the candidates, the one whose top is closest to `ledge_height` wins.
    pub fn can_corner_out(&self, frame: &ProbeFrame, direction: f32, ledge_height: f32) -> Option<HangPose> {
        let side = frame.right * direction.signum();
        let reach = self.cfg.shimmy_probe_offset + self.cfg.trace_radius * 2.0;
        let samples = self.cfg.corner_samples.max(1);
        (0..samples)
            .filter_map(|i| {
                let depth = self.cfg.trace_distance * (i + 1) as f32 / samples as f32;
                let start = self.trace_start(frame) + side * reach + frame.forward * depth;
                let hit = self.queries.sweep_capsule(
                    self.cfg.trace_shape(),
                    start,
                    -side * (reach + self.cfg.trace_distance),
                    &self.filter,
                )?;
                if hit.start_penetrating || normalize_2d(hit.normal).dot(side) < 0.5 {
                    return None;
                }
                let out = normalize_2d(hit.normal);
                let origin = Vec3::new(hit.point.x, frame.origin.y, hit.point.z)
                    + out * self.cfg.hang_offset_forward;
                let corner = ProbeFrame::facing(origin, -out);
                let ledge = self.found_ledge(&corner)?;
                Some((
                    (ledge.top.point.y - ledge_height).abs(),
                    self.hang_pose(&corner, &ledge),
                ))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, pose)| pose)
    }

    /// Where the character would stand after climbing onto `ledge`, if there is room.
    pub fn can_climb_up(
        &self,
        frame: &ProbeFrame,
        ledge: &LedgeHit,
        character: CapsuleShape,
        min_walk_cos: f32,
    ) -> Option<Vec3> {
        let above = ledge.top.point + frame.forward * self.cfg.min_climb_up_depth;
        let start = above + Vec3::Y * (character.half_height * 2.0 + 0.1);
        let end = above - Vec3::Y * self.cfg.trace_half_height;
        let ground = self.queries.line_trace(start, end, &self.filter)?;
        if ground.start_penetrating || !ground.is_walkable(min_walk_cos) {
            return None;
        }
        let stand = ground.point + Vec3::Y * (character.half_height + 0.02);
        (!self.queries.is_overlapping(character, stand, &self.filter)).then_some(stand)
    }

    /// A higher ledge within hop reach above the current one.
    pub fn can_hop_up(&self, frame: &ProbeFrame, ledge_height: f32) -> Option<HangPose> {
        let raised = frame.shifted(Vec3::Y * self.cfg.hop_up_height);
        let ledge = self.found_ledge(&raised)?;
        (ledge.top.point.y > ledge_height + self.cfg.min_hop_rise)
            .then(|| self.hang_pose(&raised, &ledge))
    }

    pub fn jump_up_velocity(&self, gravity: f32) -> Vec3 {
        Vec3::Y * (2.0 * gravity * self.cfg.jump_up_height).max(0.0).sqrt()
    }

    /// The hang pose on the nearest different ledge toward `direction`.
    pub fn found_side_ledge(
        &self,
        frame: &ProbeFrame,
        current_ledge: Option<Entity>,
        direction: Vec3,
    ) -> Option<HangPose> {
        let direction = normalize_2d(direction);
        let samples = self.cfg.side_jump_samples.max(1);
        (0..samples).find_map(|i| {
            let t = if samples == 1 {
                0.0
            } else {
                i as f32 / (samples - 1) as f32
            };
            let min = self.cfg.side_jump_min_distance;
            let distance = min + (self.cfg.side_jump_max_distance - min) * t;
            let shifted = frame.shifted(direction * distance);
            let ledge = self.found_ledge(&shifted)?;
            if Some(ledge.top.entity) == current_ledge {
                return None;
            }
            Some(self.hang_pose(&shifted, &ledge))
        })
    }

    /// Grab points in range and roughly ahead of `move_direction`, nearest first.
    pub fn reachable_grab_points(
        &self,
        frame: &ProbeFrame,
        move_direction: Vec3,
        registry: &dyn GrabPointRegistry,
    ) -> Vec<Vec3> {
        let facing = try_normalize_2d(move_direction).unwrap_or(frame.forward);
        let origin = frame.origin;
        let mut points: Vec<Vec3> = registry
            .anchors_within(origin, self.cfg.launch_range)
            .into_iter()
            .filter_map(|anchor| anchor.closest_point(origin))
            .filter(|point| point.distance(origin) <= self.cfg.launch_range)
            .filter(|point| {
                try_normalize_2d(*point - origin)
                    .is_none_or(|to_point| facing.angle_between(to_point) <= self.cfg.max_launch_angle)
            })
            .collect();
        points.sort_by(|a, b| a.distance_squared(origin).total_cmp(&b.distance_squared(origin)));
        points
    }

    /// The first grab point a launch can reach, with the launch velocity.
    pub fn valid_launch_velocity(
        &self,
        origin: Vec3,
        points: &[Vec3],
        gravity: f32,
        solver: &dyn BallisticSolver,
    ) -> Option<(Vec3, Vec3)> {
        points.iter().find_map(|point| {
            let target = *point - Vec3::Y * self.cfg.hang_offset_down;
            let velocity = solver.launch_velocity(
                origin,
                target,
                self.cfg.max_launch_speed,
                gravity,
                ArcPreference::Low,
            )?;
            Some((velocity, target))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ballistic::ArcSolver, test_world::BoxWorld};

    /// A 10 m wide, 3 m tall block whose front face is the plane `z = -1`.
    fn ledge_world() -> (BoxWorld, Entity) {
        let mut world = BoxWorld::new();
        let block = world.add_box(Vec3::new(-5.0, 0.0, -3.0), Vec3::new(5.0, 3.0, -1.0));
        (world, block)
    }

    fn frame_at(origin: Vec3) -> ProbeFrame {
        ProbeFrame::facing(origin, Vec3::NEG_Z)
    }

    #[test]
    fn finds_ledge_and_hang_pose() {
        let (world, block) = ledge_world();
        let cfg = LedgeProbe::default();
        let probe = cfg.bind(&world, &[]);
        let frame = frame_at(Vec3::new(0.0, 2.2, -0.5));

        let ledge = probe.found_ledge(&frame).unwrap();
        assert_eq!(ledge.forward.entity, block);
        assert_eq!(ledge.top.entity, block);
        assert!((ledge.top.point.y - 3.0).abs() < 1.0e-5);

        let pose = probe.hang_pose(&frame, &ledge);
        assert!(pose.location.abs_diff_eq(Vec3::new(0.0, 3.0 - 1.01, -0.55), 1.0e-4));
        assert!((pose.rotation * Vec3::NEG_Z).abs_diff_eq(Vec3::NEG_Z, 1.0e-5));
    }

    #[test]
    fn tall_wall_is_not_a_ledge() {
        let mut world = BoxWorld::new();
        world.add_box(Vec3::new(-5.0, 0.0, -3.0), Vec3::new(5.0, 10.0, -1.0));
        let cfg = LedgeProbe::default();
        let probe = cfg.bind(&world, &[]);
        let frame = frame_at(Vec3::new(0.0, 2.2, -0.5));
        assert!(probe.forward_hit(&frame).is_some());
        assert!(probe.found_ledge(&frame).is_none());
    }

    #[test]
    fn geometry_above_the_top_does_not_hide_it() {
        let (mut world, block) = ledge_world();
        // A thin awning floating over the wall top.
        let awning = world.add_box(Vec3::new(-5.0, 3.1, -3.0), Vec3::new(5.0, 3.2, -1.02));
        let cfg = LedgeProbe::default();
        let probe = cfg.bind(&world, &[]);
        let frame = frame_at(Vec3::new(0.0, 2.2, -0.5));
        let ledge = probe.found_ledge(&frame).unwrap();
        assert_eq!(ledge.top.entity, block);
        assert_ne!(ledge.top.entity, awning);
        assert!((ledge.top.point.y - 3.0).abs() < 1.0e-5);
    }

    #[test]
    fn top_owned_by_another_object_is_not_a_ledge() {
        let mut world = BoxWorld::new();
        // A thin wall with a different block right behind it.
        world.add_box(Vec3::new(-5.0, 0.0, -1.02), Vec3::new(5.0, 3.0, -1.0));
        world.add_box(Vec3::new(-5.0, 0.0, -3.0), Vec3::new(5.0, 3.0, -1.02));
        let cfg = LedgeProbe::default();
        let probe = cfg.bind(&world, &[]);
        let frame = frame_at(Vec3::new(0.0, 2.2, -0.5));
        assert!(probe.forward_hit(&frame).is_some());
        assert!(probe.found_ledge(&frame).is_none());
    }

    #[test]
    fn shimmy_continues_along_the_block_and_stops_at_its_end() {
        let (world, block) = ledge_world();
        let cfg = LedgeProbe::default();
        let probe = cfg.bind(&world, &[]);

        let middle = frame_at(Vec3::new(0.0, 1.99, -0.55));
        assert!(matches!(
            probe.can_move_in_direction(&middle, 1.0, block),
            Some(ShimmyTarget::Along { .. })
        ));

        let end = frame_at(Vec3::new(4.7, 1.99, -0.55));
        assert!(probe.can_move_in_direction(&end, 1.0, block).is_none());
        assert!(probe.can_move_in_direction(&end, -1.0, block).is_some());
    }

    #[test]
    fn inner_corner_turns_toward_the_side_wall() {
        let (mut world, block) = ledge_world();
        world.add_box(Vec3::new(5.0, 0.0, -3.0), Vec3::new(7.0, 3.0, 3.0));
        let cfg = LedgeProbe::default();
        let probe = cfg.bind(&world, &[]);
        let frame = frame_at(Vec3::new(4.5, 1.99, -0.55));
        let Some(ShimmyTarget::InnerCorner(pose)) = probe.can_move_in_direction(&frame, 1.0, block)
        else {
            panic!("expected an inner corner");
        };
        assert!((pose.rotation * Vec3::NEG_Z).abs_diff_eq(Vec3::X, 1.0e-4));
        assert!((pose.location.x - (5.0 - 0.45)).abs() < 1.0e-3);
    }

    #[test]
    fn corner_out_wraps_around_the_block_end() {
        let (world, _) = ledge_world();
        let cfg = LedgeProbe::default();
        let probe = cfg.bind(&world, &[]);
        let frame = frame_at(Vec3::new(4.7, 1.99, -0.55));
        let pose = probe.can_corner_out(&frame, 1.0, 3.0).unwrap();
        assert!((pose.rotation * Vec3::NEG_Z).abs_diff_eq(Vec3::NEG_X, 1.0e-4));
        assert!((pose.location.x - 5.45).abs() < 1.0e-3);
        assert!((pose.location.y - (3.0 - 1.01)).abs() < 1.0e-3);
        assert!(pose.location.z < -1.0);
    }

    #[test]
    fn climb_up_needs_headroom() {
        let (mut world, _) = ledge_world();
        let cfg = LedgeProbe::default();
        let character = CapsuleShape::new(0.42, 0.96);
        let frame = frame_at(Vec3::new(0.0, 1.99, -0.55));
        {
            let probe = cfg.bind(&world, &[]);
            let ledge = probe.found_ledge(&frame).unwrap();
            let stand = probe.can_climb_up(&frame, &ledge, character, 0.7).unwrap();
            assert!((stand.y - (3.0 + 0.96 + 0.02)).abs() < 1.0e-4);
            assert!(stand.z < -1.0);
        }
        world.add_box(Vec3::new(-5.0, 4.0, -3.0), Vec3::new(5.0, 6.0, -1.0));
        let probe = cfg.bind(&world, &[]);
        let ledge = probe.found_ledge(&frame).unwrap();
        assert!(probe.can_climb_up(&frame, &ledge, character, 0.7).is_none());
    }

    #[test]
    fn hop_up_finds_a_higher_ledge() {
        let (mut world, _) = ledge_world();
        let upper = world.add_box(Vec3::new(-5.0, 3.0, -3.0), Vec3::new(5.0, 4.0, -1.2));
        let cfg = LedgeProbe::default();
        let probe = cfg.bind(&world, &[]);
        let frame = frame_at(Vec3::new(0.0, 1.99, -0.55));
        let pose = probe.can_hop_up(&frame, 3.0).unwrap();
        assert!((pose.location.y - (4.0 - 1.01)).abs() < 1.0e-3);
        let ledge = probe.found_ledge(&frame.shifted(Vec3::Y)).unwrap();
        assert_eq!(ledge.top.entity, upper);
    }

    #[test]
    fn side_ledge_skips_the_current_one() {
        let (mut world, block) = ledge_world();
        let cfg = LedgeProbe::default();
        let frame = frame_at(Vec3::new(4.5, 1.99, -0.55));
        {
            let probe = cfg.bind(&world, &[]);
            assert!(probe.found_side_ledge(&frame, Some(block), Vec3::X).is_none());
        }
        let other = world.add_box(Vec3::new(6.0, 0.0, -3.0), Vec3::new(9.0, 3.0, -1.0));
        let probe = cfg.bind(&world, &[]);
        let target = probe.found_side_ledge(&frame, Some(block), Vec3::X).unwrap();
        assert!(target.location.x > 6.0);
        assert!((target.location.y - (3.0 - 1.01)).abs() < 1.0e-3);
        let ledge = probe
            .found_ledge(&ProbeFrame::facing(target.location, Vec3::NEG_Z))
            .unwrap();
        assert_eq!(ledge.top.entity, other);
    }

    #[test]
    fn grab_points_must_be_ahead_and_in_range() {
        let mut world = BoxWorld::new();
        world.add_anchor(vec![Vec3::new(0.0, 3.0, -4.0)]);
        world.add_anchor(vec![Vec3::new(0.0, 3.0, 4.0)]);
        world.add_anchor(vec![Vec3::new(0.0, 3.0, -40.0)]);
        let cfg = LedgeProbe::default();
        let probe = cfg.bind(&world, &[]);
        let frame = frame_at(Vec3::Y);

        let points = probe.reachable_grab_points(&frame, Vec3::ZERO, &world.anchors);
        assert_eq!(points, vec![Vec3::new(0.0, 3.0, -4.0)]);

        let (velocity, target) = probe
            .valid_launch_velocity(frame.origin, &points, 9.81, &ArcSolver)
            .unwrap();
        assert!(velocity.z < 0.0 && velocity.y > 0.0);
        assert!((target.y - (3.0 - 1.01)).abs() < 1.0e-5);
    }
}
