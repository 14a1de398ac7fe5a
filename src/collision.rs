//! The scene queries movement relies on.
//!
//! Movement never talks to the physics backend directly. Everything goes through
//! [`CollisionQueries`], which [`AvianQueries`] implements on top of avian's [`SpatialQuery`].

use crate::prelude::*;

/// An upright capsule.
///
/// `half_height` is measured from the center to the tip, hemisphere included.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct CapsuleShape {
    pub radius: f32,
    pub half_height: f32,
}

impl CapsuleShape {
    pub fn new(radius: f32, half_height: f32) -> Self {
        Self {
            radius,
            half_height: half_height.max(radius),
        }
    }

    /// Half of the cylindrical section between the two hemispheres.
    pub fn segment_half_length(&self) -> f32 {
        (self.half_height - self.radius).max(0.0)
    }

    pub fn collider(&self) -> Collider {
        Collider::capsule(self.radius, self.segment_half_length() * 2.0)
    }
}

/// Which colliders a query may hit.
#[derive(Clone, Debug, PartialEq, Eq, Reflect)]
pub struct QueryFilter {
    /// Collision layers, as an avian [`LayerMask`] bit set.
    pub mask: u32,
    pub ignore: Vec<Entity>,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            mask: LayerMask::ALL.0,
            ignore: Vec::new(),
        }
    }
}

impl QueryFilter {
    pub fn from_mask(mask: u32) -> Self {
        Self {
            mask,
            ignore: Vec::new(),
        }
    }

    pub fn with_ignored(mut self, entities: impl IntoIterator<Item = Entity>) -> Self {
        self.ignore.extend(entities);
        self
    }

    /// `true` if a collider on `layers` belonging to `entity` passes the filter.
    pub fn accepts(&self, entity: Entity, layers: u32) -> bool {
        self.mask & layers != 0 && !self.ignore.contains(&entity)
    }

    pub fn to_spatial(&self) -> SpatialQueryFilter {
        SpatialQueryFilter::from_mask(self.mask).with_excluded_entities(self.ignore.iter().copied())
    }
}

/// A blocking hit of a sweep or a line trace.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct ShapeHit {
    pub entity: Entity,
    /// Contact point on the hit surface.
    pub point: Vec3,
    /// Surface normal at `point`, pointing away from the hit surface.
    pub normal: Vec3,
    /// Travelled distance before the hit.
    pub distance: f32,
    /// `distance` as a fraction of the requested travel, in `[0, 1]`.
    pub fraction: f32,
    /// The query shape already overlapped the hit collider at the start.
    pub start_penetrating: bool,
}

impl ShapeHit {
    pub fn is_walkable(&self, min_walk_cos: f32) -> bool {
        self.normal.y >= min_walk_cos
    }
}

/// Scene queries used by movement and ledge detection.
pub trait CollisionQueries {
    /// Sweeps an upright capsule from `start` along `delta` and reports the first blocking hit.
    fn sweep_capsule(
        &self,
        shape: CapsuleShape,
        start: Vec3,
        delta: Vec3,
        filter: &QueryFilter,
    ) -> Option<ShapeHit>;

    /// Every hit of the segment from `start` to `end`, nearest first.
    fn line_hits(&self, start: Vec3, end: Vec3, filter: &QueryFilter) -> Vec<ShapeHit>;

    /// Entities overlapping an upright capsule placed at `position`.
    fn overlaps(&self, shape: CapsuleShape, position: Vec3, filter: &QueryFilter) -> Vec<Entity>;

    fn line_trace(&self, start: Vec3, end: Vec3, filter: &QueryFilter) -> Option<ShapeHit> {
        self.line_hits(start, end, filter).into_iter().next()
    }

    fn is_overlapping(&self, shape: CapsuleShape, position: Vec3, filter: &QueryFilter) -> bool {
        !self.overlaps(shape, position, filter).is_empty()
    }
}

/// [`CollisionQueries`] backed by avian.
pub struct AvianQueries<'a, 'w, 's> {
    pub spatial: &'a SpatialQuery<'w, 's>,
}

/// Distances at or below this count as starting inside the hit collider.
const PENETRATION_EPSILON: f32 = 1.0e-5;

/// Upper bound for line hits gathered per trace.
const MAX_LINE_HITS: u32 = 16;

impl CollisionQueries for AvianQueries<'_, '_, '_> {
    fn sweep_capsule(
        &self,
        shape: CapsuleShape,
        start: Vec3,
        delta: Vec3,
        filter: &QueryFilter,
    ) -> Option<ShapeHit> {
        let length = delta.length();
        let direction = Dir3::new(delta).ok()?;
        let hit = self.spatial.cast_shape(
            &shape.collider(),
            start,
            Quat::IDENTITY,
            direction,
            &ShapeCastConfig::from_max_distance(length),
            &filter.to_spatial(),
        )?;
        Some(ShapeHit {
            entity: hit.entity,
            point: hit.point1,
            normal: hit.normal1,
            distance: hit.distance,
            fraction: (hit.distance / length).clamp(0.0, 1.0),
            start_penetrating: hit.distance <= PENETRATION_EPSILON,
        })
    }

    fn line_hits(&self, start: Vec3, end: Vec3, filter: &QueryFilter) -> Vec<ShapeHit> {
        let delta = end - start;
        let length = delta.length();
        let Ok(direction) = Dir3::new(delta) else {
            return Vec::new();
        };
        let mut hits: Vec<ShapeHit> = self
            .spatial
            .ray_hits(
                start,
                direction,
                length,
                MAX_LINE_HITS,
                true,
                &filter.to_spatial(),
            )
            .into_iter()
            .map(|hit| ShapeHit {
                entity: hit.entity,
                point: start + direction * hit.distance,
                normal: hit.normal,
                distance: hit.distance,
                fraction: (hit.distance / length).clamp(0.0, 1.0),
                start_penetrating: hit.distance <= PENETRATION_EPSILON,
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn overlaps(&self, shape: CapsuleShape, position: Vec3, filter: &QueryFilter) -> Vec<Entity> {
        self.spatial.shape_intersections(
            &shape.collider(),
            position,
            Quat::IDENTITY,
            &filter.to_spatial(),
        )
    }
}
