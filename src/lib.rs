#![doc = include_str!("../readme.md")]

/// Everything you need to get started with `bevy_clamber`
pub mod prelude {
    pub(crate) use {
        avian3d::prelude::*,
        bevy_app::prelude::*,
        bevy_derive::{Deref, DerefMut},
        bevy_ecs::prelude::*,
        bevy_enhanced_input::prelude::*,
        bevy_math::prelude::*,
        bevy_reflect::prelude::*,
        bevy_time::prelude::*,
        bevy_transform::prelude::*,
        bevy_utils::prelude::*,
    };

    pub use crate::{
        CharacterController, CharacterControllerState, ClamberPlugin, ClamberSystems,
        ability::{Ability, AbilitySystem, Airborne, Locomotion},
        grab_points::{GrabPoint, LedgeAnchor},
        input::{Crouch, DropClimb, Jump, Movement, MovementBasis, Roll, Sprint, Walk},
        kcc::MovementMessage,
        mode::{CustomMode, MovementMode},
        montage::{MontageClip, MontageDurations},
        movement::{MovementEvent, NetRole},
        prediction::PredictionBuffer,
        water::{Water, WaterLevel, WaterState},
    };
}

use crate::{
    ability::{AbilitySystem, LocomotionTuning},
    climbing::{ClimbingSession, Deadline},
    collision::{CapsuleShape, QueryFilter},
    input::{AccumulatedInput, PendingInputFlags},
    ledge::LedgeProbe,
    movement::{
        NetRole, climb::ClimbSettings, roll::RollSettings, roll::RollState, slide::SlideSettings,
    },
    prediction::PredictionSettings,
    prelude::*,
    sweep::FloorHit,
    water::WaterState,
};
use bevy_ecs::{intern::Interned, lifecycle::HookContext, schedule::ScheduleLabel, world::DeferredWorld};
use bevy_time::Stopwatch;
use core::time::Duration;
use thiserror::Error;
use tracing::warn;

pub mod ability;
pub mod ballistic;
pub mod climbing;
pub mod collision;
pub mod grab_points;
pub mod input;
pub mod kcc;
pub mod ledge;
pub mod mode;
pub mod montage;
pub mod movement;
pub mod physics;
pub mod prediction;
pub mod sweep;
pub mod water;

#[cfg(test)]
mod test_world;

/// Also requires you to add [`PhysicsPlugins`] and [`EnhancedInputPlugin`] to work properly.
pub struct ClamberPlugin {
    schedule: Interned<dyn ScheduleLabel>,
}

impl ClamberPlugin {
    /// Create a new plugin in the given schedule. The default is [`FixedPostUpdate`].
    pub fn new(schedule: impl ScheduleLabel) -> Self {
        Self {
            schedule: schedule.intern(),
        }
    }
}

impl Default for ClamberPlugin {
    fn default() -> Self {
        Self {
            schedule: FixedPostUpdate.intern(),
        }
    }
}

impl Plugin for ClamberPlugin {
    fn build(&self, app: &mut App) {
        app.configure_sets(
            self.schedule,
            (ClamberSystems::Abilities, ClamberSystems::MoveCharacters)
                .chain()
                .in_set(PhysicsSystems::First),
        )
        .add_plugins((
            input::plugin,
            water::plugin(self.schedule),
            ability::plugin(self.schedule),
            kcc::plugin(self.schedule),
        ));
    }
}

/// System sets used by all systems of `bevy_clamber`.
#[derive(SystemSet, Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ClamberSystems {
    Abilities,
    MoveCharacters,
}

#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`{field}` must be positive, got {value}")]
    NotPositive { field: &'static str, value: f32 },
    #[error("capsule radius {radius} does not fit in half height {half_height}")]
    CapsuleTooShort { radius: f32, half_height: f32 },
    #[error("crouched half height {crouched} must lie between the radius and the standing half height")]
    CrouchedHeight { crouched: f32 },
    #[error("min_walk_cos must be in (0, 1], got {0}")]
    WalkableSlope(f32),
    #[error("`{0}` needs at least one iteration")]
    NoIterations(&'static str),
}

#[derive(Component, Clone, Reflect, Debug)]
#[reflect(Component)]
#[require(
    AccumulatedInput,
    CharacterControllerState,
    AbilitySystem,
    WaterState,
    CollidingEntities,
    NetRole,
    TranslationInterpolation,
    RigidBody = RigidBody::Kinematic,
    Collider = Collider::capsule(0.42, 1.08),
    CustomPositionIntegration,
    Transform,
    SpeculativeMargin::ZERO,
)]
#[component(on_add=CharacterController::on_add)]
pub struct CharacterController {
    /// Radius of the movement capsule.
    pub radius: f32,
    /// Center to tip, hemisphere included.
    pub half_height: f32,
    pub crouched_half_height: f32,
    pub filter: QueryFilter,
    pub skin_width: f32,
    pub ground_distance: f32,
    pub min_walk_cos: f32,
    pub step_size: f32,
    pub max_walk_speed: f32,
    pub max_walk_speed_crouched: f32,
    pub max_sprint_speed: f32,
    pub max_swim_speed: f32,
    pub max_acceleration: f32,
    pub ground_friction: f32,
    pub swim_friction: f32,
    pub braking_deceleration_walking: f32,
    pub braking_deceleration_falling: f32,
    pub braking_deceleration_swimming: f32,
    pub braking_friction_factor: f32,
    pub air_control: f32,
    pub gravity: f32,
    pub jump_height: f32,
    pub coyote_time: Duration,
    pub jump_input_buffer: Duration,
    /// Yaw rate when turning toward the movement direction, in degrees per second.
    pub rotation_rate: f32,
    pub max_speed: f32,
    pub max_simulation_iterations: u32,
    pub max_simulation_time_step: f32,
    pub slide: SlideSettings,
    pub roll: RollSettings,
    pub climb: ClimbSettings,
    pub ledge: LedgeProbe,
    pub prediction: PredictionSettings,
}

impl Default for CharacterController {
    fn default() -> Self {
        Self {
            radius: 0.42,
            half_height: 0.96,
            crouched_half_height: 0.6,
            filter: QueryFilter::default(),
            skin_width: 0.005,
            ground_distance: 0.05,
            min_walk_cos: 0.71,
            step_size: 0.45,
            max_walk_speed: 5.0,
            max_walk_speed_crouched: 3.0,
            max_sprint_speed: 9.0,
            max_swim_speed: 3.0,
            max_acceleration: 20.48,
            ground_friction: 8.0,
            swim_friction: 0.3,
            braking_deceleration_walking: 20.0,
            braking_deceleration_falling: 0.0,
            braking_deceleration_swimming: 1.0,
            braking_friction_factor: 2.0,
            air_control: 0.35,
            gravity: 9.81,
            jump_height: 2.5,
            coyote_time: Duration::from_millis(150),
            jump_input_buffer: Duration::from_millis(150),
            rotation_rate: 500.0,
            max_speed: 100.0,
            max_simulation_iterations: 8,
            max_simulation_time_step: 0.05,
            slide: default(),
            roll: default(),
            climb: default(),
            ledge: default(),
            prediction: default(),
        }
    }
}

impl CharacterController {
    pub fn on_add(mut world: DeferredWorld, ctx: HookContext) {
        let Some(mut kcc) = world.get_mut::<Self>(ctx.entity) else {
            return;
        };
        if !kcc.filter.ignore.contains(&ctx.entity) {
            kcc.filter.ignore.push(ctx.entity);
        }
        if let Err(err) = kcc.validate() {
            warn!("invalid character controller on {}: {err}", ctx.entity);
        }
    }

    /// The movement capsule, standing or crouched.
    pub fn capsule(&self, crouching: bool) -> CapsuleShape {
        let half_height = if crouching {
            self.crouched_half_height
        } else {
            self.half_height
        };
        CapsuleShape::new(self.radius, half_height)
    }

    /// How far the capsule center moves down when crouching.
    pub fn crouch_offset(&self) -> f32 {
        (self.half_height - self.crouched_half_height).max(0.0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("radius", self.radius),
            ("gravity", self.gravity),
            ("max_acceleration", self.max_acceleration),
            ("max_simulation_time_step", self.max_simulation_time_step),
            ("roll.duration", self.roll.duration),
            ("climb.interp_speed", self.climb.interp_speed),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigError::NotPositive { field, value });
            }
        }
        if self.half_height < self.radius {
            return Err(ConfigError::CapsuleTooShort {
                radius: self.radius,
                half_height: self.half_height,
            });
        }
        if self.crouched_half_height < self.radius || self.crouched_half_height > self.half_height {
            return Err(ConfigError::CrouchedHeight {
                crouched: self.crouched_half_height,
            });
        }
        if !(self.min_walk_cos > 0.0 && self.min_walk_cos <= 1.0) {
            return Err(ConfigError::WalkableSlope(self.min_walk_cos));
        }
        if self.max_simulation_iterations == 0 {
            return Err(ConfigError::NoIterations("max_simulation_iterations"));
        }
        if self.ledge.top_samples == 0 {
            return Err(ConfigError::NoIterations("ledge.top_samples"));
        }
        Ok(())
    }
}

/// Runtime state of a character. Owned by the movement system.
#[derive(Component, Clone, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct CharacterControllerState {
    pub mode: MovementMode,
    /// Mode change asked for by gameplay code, applied at the start of the next tick.
    pub requested_mode: Option<MovementMode>,
    /// Input direction scaled by the maximum acceleration.
    pub acceleration: Vec3,
    pub floor: Option<FloorHit>,
    pub flags: PendingInputFlags,
    pub crouching: bool,
    pub roll: Option<RollState>,
    pub roll_cooldown: Option<Deadline>,
    pub climbing: Option<ClimbingSession>,
    /// The ledge last held. Grabbing it again requires touching other ground first.
    pub current_ledge: Option<Entity>,
    pub locomotion: LocomotionTuning,
    /// Velocity dictated by animation, overriding the computed one.
    pub root_motion: Option<Vec3>,
    pub last_ground: Stopwatch,
}

impl CharacterControllerState {
    pub fn request_mode(&mut self, mode: MovementMode) {
        self.requested_mode = Some(mode);
    }

    pub fn can_roll(&self) -> bool {
        movement::roll::can_roll(self)
    }

    pub fn climbing_state(&self) -> Option<climbing::ClimbingState> {
        self.climbing.as_ref().map(|session| session.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(CharacterController::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_capsules() {
        let cfg = CharacterController {
            crouched_half_height: 2.0,
            ..default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::CrouchedHeight { .. })
        ));

        let cfg = CharacterController {
            gravity: 0.0,
            ..default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NotPositive {
                field: "gravity",
                value: 0.0
            })
        );
    }

    #[test]
    fn crouched_capsule_keeps_the_radius() {
        let cfg = CharacterController::default();
        assert_eq!(cfg.capsule(true), CapsuleShape::new(0.42, 0.6));
        assert!((cfg.crouch_offset() - 0.36).abs() < 1.0e-6);
    }
}
