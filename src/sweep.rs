//! Sweep-and-slide primitives built on [`CollisionQueries`].

use crate::{
    collision::{CapsuleShape, CollisionQueries, QueryFilter, ShapeHit},
    prelude::*,
};

/// The floor below the character.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct FloorHit {
    pub entity: Entity,
    pub point: Vec3,
    pub normal: Vec3,
    /// Gap between the bottom of the capsule and the floor.
    pub distance: f32,
    pub walkable: bool,
}

/// Moves a capsule through the scene.
#[derive(Clone, Copy)]
pub struct Mover<'a> {
    pub queries: &'a dyn CollisionQueries,
    pub shape: CapsuleShape,
    pub filter: &'a QueryFilter,
    /// Gap kept between the capsule and anything it is blocked by.
    pub skin: f32,
}

/// Maximum number of surfaces considered by a single [`Mover::move_and_slide`].
const MAX_SLIDE_PLANES: usize = 4;

impl<'a> Mover<'a> {
    pub fn new(
        queries: &'a dyn CollisionQueries,
        shape: CapsuleShape,
        filter: &'a QueryFilter,
        skin: f32,
    ) -> Self {
        Self {
            queries,
            shape,
            filter,
            skin,
        }
    }

    pub fn with_shape(self, shape: CapsuleShape) -> Self {
        Self { shape, ..self }
    }

    pub fn sweep(&self, start: Vec3, delta: Vec3) -> Option<ShapeHit> {
        self.queries
            .sweep_capsule(self.shape, start, delta, self.filter)
    }

    pub fn is_blocked_at(&self, position: Vec3) -> bool {
        self.queries
            .is_overlapping(self.shape, position, self.filter)
    }

    /// Moves `position` along `delta` until the first blocking hit, keeping the skin gap.
    ///
    /// A hit that starts penetrating leaves `position` untouched.
    pub fn safe_move(&self, position: &mut Vec3, delta: Vec3) -> Option<ShapeHit> {
        if delta.length_squared() <= f32::EPSILON {
            return None;
        }
        let Some(hit) = self.sweep(*position, delta) else {
            *position += delta;
            return None;
        };
        if !hit.start_penetrating {
            let length = delta.length();
            let travel = (hit.distance - self.skin).max(0.0);
            *position += delta / length * travel;
        }
        Some(hit)
    }

    /// Slides the unfinished part of `delta` along the surface that blocked it.
    ///
    /// `time` is the fraction of `delta` still to travel. Returns the fraction actually travelled.
    pub fn slide_along_surface(
        &self,
        position: &mut Vec3,
        delta: Vec3,
        time: f32,
        hit: &ShapeHit,
    ) -> f32 {
        let normal = hit.normal;
        let slide = (delta * time).reject_from_normalized(normal);
        if slide.dot(delta) <= 0.0 {
            return 0.0;
        }
        let Some(second) = self.safe_move(position, slide) else {
            return time;
        };
        let mut travelled = time * second.fraction;

        // Two surfaces: follow the crease between them.
        let crease = normal.cross(second.normal).normalize_or_zero();
        let rest = delta * (time - travelled);
        let along_crease = crease * rest.dot(crease);
        if along_crease.dot(delta) > 0.0 && !second.start_penetrating {
            let before = *position;
            let third = self.safe_move(position, along_crease);
            let moved = position.distance(before);
            if rest.length() > f32::EPSILON {
                travelled += (time - travelled) * (moved / rest.length()).min(1.0);
            }
            if third.is_none() {
                return time;
            }
        }
        travelled
    }

    /// Moves along `velocity * dt`, sliding along everything that blocks the way.
    ///
    /// `velocity` is projected onto the blocking surfaces. Returns the hits encountered.
    pub fn move_and_slide(&self, position: &mut Vec3, velocity: &mut Vec3, dt: f32) -> Vec<ShapeHit> {
        let mut hits = Vec::new();
        let mut remaining = *velocity * dt;
        let mut planes: Vec<Vec3> = Vec::with_capacity(MAX_SLIDE_PLANES);
        for _ in 0..MAX_SLIDE_PLANES {
            if remaining.length_squared() <= f32::EPSILON {
                break;
            }
            let Some(hit) = self.safe_move(position, remaining) else {
                break;
            };
            hits.push(hit);
            remaining *= 1.0 - hit.fraction;
            planes.push(hit.normal);
            remaining = clip_to_planes(remaining, &planes);
            *velocity = clip_to_planes(*velocity, &planes);
            if hit.start_penetrating {
                break;
            }
        }
        hits
    }

    /// Probes for a floor up to `max_distance` below the capsule.
    pub fn find_floor(&self, position: Vec3, max_distance: f32, min_walk_cos: f32) -> Option<FloorHit> {
        let probe = max_distance + self.skin;
        let hit = self.sweep(position, Vec3::NEG_Y * probe)?;
        Some(FloorHit {
            entity: hit.entity,
            point: hit.point,
            normal: hit.normal,
            distance: hit.distance,
            walkable: hit.is_walkable(min_walk_cos),
        })
    }

    /// Climbs a step: up by `step_height`, along `delta`, then back down onto a walkable surface.
    ///
    /// Leaves `position` unchanged and returns `false` if the step can't be taken.
    pub fn step_up(&self, position: &mut Vec3, delta: Vec3, step_height: f32, min_walk_cos: f32) -> bool {
        let horizontal = Vec3::new(delta.x, 0.0, delta.z);
        if horizontal.length_squared() <= f32::EPSILON || step_height <= 0.0 {
            return false;
        }
        let mut candidate = *position;

        let up = self.safe_move(&mut candidate, Vec3::Y * step_height);
        if up.is_some_and(|hit| hit.start_penetrating) {
            return false;
        }
        let raised = candidate.y - position.y;
        if raised <= self.skin {
            return false;
        }

        let before_forward = candidate;
        if let Some(hit) = self.safe_move(&mut candidate, horizontal) {
            if hit.start_penetrating {
                return false;
            }
            self.slide_along_surface(&mut candidate, horizontal, 1.0 - hit.fraction, &hit);
        }
        if before_forward.distance_squared(candidate) <= f32::EPSILON {
            return false;
        }

        let Some(down) = self.sweep(candidate, Vec3::NEG_Y * (raised + self.skin * 2.0)) else {
            return false;
        };
        if down.start_penetrating || !down.is_walkable(min_walk_cos) {
            return false;
        }
        candidate.y -= (down.distance - self.skin).max(0.0);
        if candidate.y <= position.y + self.skin {
            return false;
        }
        *position = candidate;
        true
    }
}

fn clip_to_planes(mut v: Vec3, planes: &[Vec3]) -> Vec3 {
    for normal in planes {
        let into = v.dot(*normal);
        if into < 0.0 {
            v -= *normal * into;
        }
    }
    v
}
