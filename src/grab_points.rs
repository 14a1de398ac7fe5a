//! Ledge objects that expose authored grab points for launches.

use crate::prelude::*;

/// A named point, in the anchor's local space, a character can launch toward.
#[derive(Clone, Debug, Default, PartialEq, Reflect)]
pub struct GrabPoint {
    pub name: String,
    pub offset: Vec3,
}

impl GrabPoint {
    pub fn new(name: impl Into<String>, offset: Vec3) -> Self {
        Self {
            name: name.into(),
            offset,
        }
    }
}

/// Marks an entity as a ledge that owns grab points.
#[derive(Component, Clone, Debug, Default, PartialEq, Reflect)]
#[reflect(Component)]
pub struct LedgeAnchor {
    pub grab_points: Vec<GrabPoint>,
}

impl LedgeAnchor {
    pub fn new(grab_points: impl IntoIterator<Item = GrabPoint>) -> Self {
        Self {
            grab_points: grab_points.into_iter().collect(),
        }
    }
}

/// World-space snapshot of one anchor's grab points.
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorView {
    pub entity: Entity,
    pub points: Vec<Vec3>,
}

impl AnchorView {
    pub fn from_anchor(entity: Entity, anchor: &LedgeAnchor, transform: &GlobalTransform) -> Self {
        Self {
            entity,
            points: anchor
                .grab_points
                .iter()
                .map(|point| transform.transform_point(point.offset))
                .collect(),
        }
    }

    /// The grab point nearest to `origin`.
    pub fn closest_point(&self, origin: Vec3) -> Option<Vec3> {
        self.points
            .iter()
            .copied()
            .min_by(|a, b| a.distance_squared(origin).total_cmp(&b.distance_squared(origin)))
    }
}

pub trait GrabPointRegistry {
    /// Anchors with at least one grab point within `radius` of `origin`.
    fn anchors_within(&self, origin: Vec3, radius: f32) -> Vec<&AnchorView>;
}

impl GrabPointRegistry for Vec<AnchorView> {
    fn anchors_within(&self, origin: Vec3, radius: f32) -> Vec<&AnchorView> {
        let radius_squared = radius * radius;
        self.iter()
            .filter(|anchor| {
                anchor
                    .points
                    .iter()
                    .any(|point| point.distance_squared(origin) <= radius_squared)
            })
            .collect()
    }
}
