use bevy_ecs::{intern::Interned, schedule::ScheduleLabel};

use crate::{ClamberSystems, prelude::*};

/// How deep a character stands in water, updated before it moves.
#[derive(Component, Copy, Reflect, Clone, Debug, PartialEq)]
#[reflect(Component)]
pub struct WaterState {
    pub level: WaterLevel,
    /// Swimming speed cap of the slowest water touched.
    pub speed: f32,
}

impl Default for WaterState {
    fn default() -> Self {
        Self {
            level: WaterLevel::None,
            speed: f32::INFINITY,
        }
    }
}

#[derive(Default, Copy, Reflect, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WaterLevel {
    #[default]
    None,
    Touching,
    /// The character center is submerged; walking and falling turn into swimming.
    Center,
}

#[derive(Reflect, Component, Default)]
#[require(Sensor, Transform, GlobalTransform)]
#[reflect(Component)]
pub struct Water {
    pub speed: f32,
}

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_systems(
            schedule,
            update_water.in_set(ClamberSystems::Abilities),
        );
    }
}

fn update_water(
    mut objects: Query<(&Position, &mut WaterState, &CollidingEntities)>,
    waters: Query<(&Collider, &Position, &Rotation, &Water)>,
) {
    for (object_position, mut water_state, colliding_entities) in &mut objects {
        let mut state = WaterState::default();
        let center = **object_position;
        for (collider, position, rotation, water) in waters.iter_many(colliding_entities.iter()) {
            let level = if collider.contains_point(*position, *rotation, center) {
                WaterLevel::Center
            } else {
                WaterLevel::Touching
            };
            state.level = level.max(state.level);
            state.speed = state.speed.min(water.speed);
        }
        water_state.set_if_neq(state);
    }
}
