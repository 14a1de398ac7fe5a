//! A tiny axis-aligned scene used by unit tests in place of the physics backend.
//!
//! Capsules are approximated by their bounding boxes, so sweeps become rays against boxes
//! expanded by the capsule extents.

use crate::{
    ballistic::ArcSolver,
    collision::{CapsuleShape, CollisionQueries, QueryFilter, ShapeHit},
    grab_points::AnchorView,
    montage::MontageDurations,
    movement::{Env, NetRole},
    prelude::*,
    water::WaterState,
};

#[derive(Clone, Copy, Debug)]
enum Shape {
    Aabb { min: Vec3, max: Vec3 },
    /// Solid half-space below the plane `normal . p = offset`.
    HalfSpace { normal: Vec3, offset: f32 },
}

#[derive(Clone, Copy, Debug)]
struct Solid {
    entity: Entity,
    shape: Shape,
    layers: u32,
}

pub(crate) struct BoxWorld {
    ids: World,
    solids: Vec<Solid>,
    pub(crate) anchors: Vec<AnchorView>,
    pub(crate) montages: MontageDurations,
    pub(crate) solver: ArcSolver,
}

const TOUCH_EPSILON: f32 = 1.0e-4;

impl BoxWorld {
    pub(crate) fn new() -> Self {
        Self {
            ids: World::new(),
            solids: Vec::new(),
            anchors: Vec::new(),
            montages: MontageDurations::default(),
            solver: ArcSolver,
        }
    }

    pub(crate) fn entity(&mut self) -> Entity {
        self.ids.spawn_empty().id()
    }

    pub(crate) fn add_box(&mut self, min: Vec3, max: Vec3) -> Entity {
        self.add_box_on_layers(min, max, u32::MAX)
    }

    pub(crate) fn add_box_on_layers(&mut self, min: Vec3, max: Vec3, layers: u32) -> Entity {
        let entity = self.entity();
        self.solids.push(Solid {
            entity,
            shape: Shape::Aabb { min, max },
            layers,
        });
        entity
    }

    /// Solid ground below a plane through `point` with the given `normal`.
    pub(crate) fn add_slope(&mut self, point: Vec3, normal: Vec3) -> Entity {
        let entity = self.entity();
        let normal = normal.normalize();
        self.solids.push(Solid {
            entity,
            shape: Shape::HalfSpace {
                normal,
                offset: normal.dot(point),
            },
            layers: u32::MAX,
        });
        entity
    }

    pub(crate) fn add_anchor(&mut self, points: Vec<Vec3>) -> Entity {
        let entity = self.entity();
        self.anchors.push(AnchorView { entity, points });
        entity
    }

    pub(crate) fn env(&self) -> Env<'_> {
        Env {
            queries: self,
            grab_points: &self.anchors,
            ballistics: &self.solver,
            montages: &self.montages,
            water: WaterState::default(),
            role: NetRole::Standalone,
        }
    }

    fn cast(&self, start: Vec3, delta: Vec3, extents: Vec3, filter: &QueryFilter) -> Vec<ShapeHit> {
        let length = delta.length();
        let mut hits: Vec<ShapeHit> = self
            .solids
            .iter()
            .filter(|solid| filter.accepts(solid.entity, solid.layers))
            .filter_map(|solid| {
                let (fraction, normal, start_penetrating) = match solid.shape {
                    Shape::Aabb { min, max } => ray_aabb(start, delta, min - extents, max + extents)?,
                    Shape::HalfSpace { normal, offset } => {
                        let support = extents.dot(normal.abs());
                        ray_half_space(start, delta, normal, offset + support)?
                    }
                };
                let center = start + delta * fraction;
                let mut point = center - normal * extents.dot(normal.abs());
                if let Shape::Aabb { min, max } = solid.shape {
                    point = point.clamp(min, max);
                }
                Some(ShapeHit {
                    entity: solid.entity,
                    point,
                    normal,
                    distance: length * fraction,
                    fraction,
                    start_penetrating,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }
}

fn capsule_extents(shape: CapsuleShape) -> Vec3 {
    Vec3::new(shape.radius, shape.half_height, shape.radius)
}

/// Slab test of the segment `start..start + delta` against a box.
fn ray_aabb(start: Vec3, delta: Vec3, min: Vec3, max: Vec3) -> Option<(f32, Vec3, bool)> {
    let mut t_enter = f32::NEG_INFINITY;
    let mut t_exit = f32::INFINITY;
    let mut normal = Vec3::ZERO;
    for axis in 0..3 {
        let origin = start[axis];
        let direction = delta[axis];
        if direction.abs() < 1.0e-9 {
            if origin <= min[axis] || origin >= max[axis] {
                return None;
            }
            continue;
        }
        let mut t0 = (min[axis] - origin) / direction;
        let mut t1 = (max[axis] - origin) / direction;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        if t0 > t_enter {
            t_enter = t0;
            normal = Vec3::ZERO;
            normal[axis] = -direction.signum();
        }
        t_exit = t_exit.min(t1);
    }
    if t_enter > t_exit || t_exit <= 0.0 || t_enter > 1.0 {
        return None;
    }
    if t_enter < 0.0 {
        return Some((0.0, penetration_normal(start, min, max), true));
    }
    Some((t_enter, normal, false))
}

fn penetration_normal(point: Vec3, min: Vec3, max: Vec3) -> Vec3 {
    let candidates = [
        (point.x - min.x, Vec3::NEG_X),
        (max.x - point.x, Vec3::X),
        (point.y - min.y, Vec3::NEG_Y),
        (max.y - point.y, Vec3::Y),
        (point.z - min.z, Vec3::NEG_Z),
        (max.z - point.z, Vec3::Z),
    ];
    candidates
        .into_iter()
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map_or(Vec3::Y, |(_, normal)| normal)
}

fn ray_half_space(start: Vec3, delta: Vec3, normal: Vec3, offset: f32) -> Option<(f32, Vec3, bool)> {
    let s0 = normal.dot(start) - offset;
    if s0 <= 0.0 {
        return Some((0.0, normal, true));
    }
    let s1 = normal.dot(start + delta) - offset;
    if s1 >= 0.0 {
        return None;
    }
    Some((s0 / (s0 - s1), normal, false))
}

impl CollisionQueries for BoxWorld {
    fn sweep_capsule(
        &self,
        shape: CapsuleShape,
        start: Vec3,
        delta: Vec3,
        filter: &QueryFilter,
    ) -> Option<ShapeHit> {
        if delta.length_squared() <= f32::EPSILON {
            return None;
        }
        self.cast(start, delta, capsule_extents(shape), filter)
            .into_iter()
            .next()
    }

    fn line_hits(&self, start: Vec3, end: Vec3, filter: &QueryFilter) -> Vec<ShapeHit> {
        if start.distance_squared(end) <= f32::EPSILON {
            return Vec::new();
        }
        self.cast(start, end - start, Vec3::ZERO, filter)
    }

    fn overlaps(&self, shape: CapsuleShape, position: Vec3, filter: &QueryFilter) -> Vec<Entity> {
        let extents = capsule_extents(shape);
        self.solids
            .iter()
            .filter(|solid| filter.accepts(solid.entity, solid.layers))
            .filter(|solid| match solid.shape {
                Shape::Aabb { min, max } => {
                    let lo = position - extents;
                    let hi = position + extents;
                    (0..3).all(|axis| {
                        lo[axis] < max[axis] - TOUCH_EPSILON && hi[axis] > min[axis] + TOUCH_EPSILON
                    })
                }
                Shape::HalfSpace { normal, offset } => {
                    normal.dot(position) - extents.dot(normal.abs()) - offset < -TOUCH_EPSILON
                }
            })
            .map(|solid| solid.entity)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capsule_sweep_stops_at_the_expanded_face() {
        let mut world = BoxWorld::new();
        let ground = world.add_box(Vec3::new(-5.0, -1.0, -5.0), Vec3::new(5.0, 0.0, 5.0));
        let shape = CapsuleShape::new(0.5, 1.0);
        let hit = world
            .sweep_capsule(shape, Vec3::Y * 3.0, Vec3::NEG_Y * 4.0, &QueryFilter::default())
            .unwrap();
        assert_eq!(hit.entity, ground);
        assert!((hit.distance - 2.0).abs() < 1.0e-5);
        assert!(hit.normal.abs_diff_eq(Vec3::Y, 1.0e-6));
        assert!(hit.point.abs_diff_eq(Vec3::ZERO, 1.0e-5));
        assert!(!hit.start_penetrating);
    }

    #[test]
    fn line_starting_inside_reports_penetration() {
        let mut world = BoxWorld::new();
        world.add_box(Vec3::splat(-1.0), Vec3::splat(1.0));
        let hit = world
            .line_trace(Vec3::ZERO, Vec3::X * 5.0, &QueryFilter::default())
            .unwrap();
        assert!(hit.start_penetrating);
    }

    #[test]
    fn filter_skips_ignored_and_masked_solids() {
        let mut world = BoxWorld::new();
        let ignored = world.add_box(Vec3::new(1.0, -1.0, -1.0), Vec3::new(2.0, 1.0, 1.0));
        world.add_box_on_layers(Vec3::new(3.0, -1.0, -1.0), Vec3::new(4.0, 1.0, 1.0), 0b10);
        let filter = QueryFilter::from_mask(0b01).with_ignored([ignored]);
        assert!(world.line_trace(Vec3::ZERO, Vec3::X * 5.0, &filter).is_none());
    }

    #[test]
    fn touching_is_not_overlapping() {
        let mut world = BoxWorld::new();
        world.add_box(Vec3::new(-5.0, -1.0, -5.0), Vec3::new(5.0, 0.0, 5.0));
        let shape = CapsuleShape::new(0.5, 1.0);
        assert!(!world.is_overlapping(shape, Vec3::Y, &QueryFilter::default()));
        assert!(world.is_overlapping(shape, Vec3::Y * 0.9, &QueryFilter::default()));
    }
}
