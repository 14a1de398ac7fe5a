use bevy_ecs::{intern::Interned, schedule::ScheduleLabel};
use tracing::trace;

use crate::{
    CharacterControllerState, ClamberSystems,
    ballistic::ArcSolver,
    collision::AvianQueries,
    grab_points::{AnchorView, LedgeAnchor},
    input::{AccumulatedInput, MovementBasis},
    montage::MontageDurations,
    movement::{Character, Ctx, Env, MovementEvent, NetRole, tick},
    physics::normalize_2d,
    prediction::{PredictionBuffer, SavedMove},
    prelude::*,
    water::WaterState,
};

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_message::<MovementMessage>()
            .add_systems(schedule, run_kcc.in_set(ClamberSystems::MoveCharacters));
    }
}

/// Something that happened to a character while it moved this tick.
#[derive(Message, Clone, Copy, Debug, PartialEq)]
pub struct MovementMessage {
    pub entity: Entity,
    pub event: MovementEvent,
}

fn run_kcc(
    mut kccs: Query<(
        Entity,
        &CharacterController,
        &mut CharacterControllerState,
        &mut AccumulatedInput,
        &mut Transform,
        &mut LinearVelocity,
        (
            &WaterState,
            &NetRole,
            Option<&MovementBasis>,
            Option<&MontageDurations>,
            Option<&mut PredictionBuffer>,
        ),
    )>,
    bases: Query<&Transform, Without<CharacterController>>,
    anchors: Query<(Entity, &LedgeAnchor, &GlobalTransform)>,
    time: Res<Time>,
    spatial: SpatialQuery,
    mut messages: MessageWriter<MovementMessage>,
) {
    let dt = time.delta_secs();
    let timestamp = time.elapsed_secs();
    let grab_points: Vec<AnchorView> = anchors
        .iter()
        .map(|(entity, anchor, transform)| AnchorView::from_anchor(entity, anchor, transform))
        .collect();
    let queries = AvianQueries { spatial: &spatial };
    let default_montages = MontageDurations::default();
    let mut events = Vec::new();

    for (entity, cfg, mut state, mut input, mut transform, mut velocity, extra) in &mut kccs {
        let (water, role, basis, montages, buffer) = extra;
        let orientation = basis
            .and_then(|basis| bases.get(**basis).ok())
            .unwrap_or(&*transform);
        let acceleration = wish_acceleration(orientation, &input, cfg);

        let mut ch = Character {
            transform: *transform,
            velocity: **velocity,
            state: core::mem::take(&mut *state),
        };
        apply_input(&mut ch.state, &mut input, acceleration, cfg);
        let wanted_jump = ch.state.flags.wants_to_jump;

        if *role == NetRole::AutonomousProxy
            && let Some(mut buffer) = buffer
        {
            buffer.push(SavedMove::new(&ch.state, dt, timestamp), &cfg.prediction);
        }

        let ctx = Ctx::new(
            cfg,
            Env {
                queries: &queries,
                grab_points: &grab_points,
                ballistics: &ArcSolver,
                montages: montages.unwrap_or(&default_montages),
                water: *water,
                role: *role,
            },
        );
        tick(&ctx, &mut ch, dt, &mut events);

        // A jump the core acted on is spent; one it refused stays buffered.
        if wanted_jump && !ch.state.flags.wants_to_jump {
            input.jumped = None;
        }
        ch.state.flags.wants_to_jump = false;

        *transform = ch.transform;
        velocity.0 = ch.velocity;
        *state = ch.state;

        if !events.is_empty() {
            trace!(?entity, count = events.len(), "movement events");
        }
        messages.write_batch(events.drain(..).map(|event| MovementMessage { entity, event }));
    }
}

/// World-space acceleration from the 2D movement input, relative to `orientation`.
fn wish_acceleration(orientation: &Transform, input: &AccumulatedInput, cfg: &CharacterController) -> Vec3 {
    let movement = input.last_movement.unwrap_or_default();
    let forward = normalize_2d(orientation.forward().into());
    let right = normalize_2d(orientation.right().into());
    let wish = (movement.y * forward + movement.x * right).clamp_length_max(1.0);
    wish * cfg.max_acceleration
}

/// Turns accumulated input into the intents of the coming tick.
fn apply_input(
    state: &mut CharacterControllerState,
    input: &mut AccumulatedInput,
    acceleration: Vec3,
    cfg: &CharacterController,
) {
    state.acceleration = acceleration;
    state.flags.wants_to_sprint = input.sprinting;
    if let Some(crouch) = input.crouch.take() {
        state.flags.wants_to_crouch = crouch;
    }
    state.flags.wants_to_roll |= core::mem::take(&mut input.rolled);
    state.flags.wants_to_drop |= core::mem::take(&mut input.dropped);

    let buffered = input
        .jumped
        .as_ref()
        .map(|jumped| jumped.elapsed() <= cfg.jump_input_buffer);
    match buffered {
        Some(true) => state.flags.wants_to_jump = true,
        Some(false) => input.jumped = None,
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use bevy_time::Stopwatch;
    use core::time::Duration;

    use super::*;

    #[test]
    fn movement_input_follows_the_basis_yaw() {
        let cfg = CharacterController::default();
        let input = AccumulatedInput {
            last_movement: Some(Vec2::new(0.0, 1.0)),
            ..default()
        };
        let basis = Transform::from_rotation(Quat::from_rotation_y(core::f32::consts::FRAC_PI_2))
            * Transform::from_rotation(Quat::from_rotation_x(-0.4));
        let acceleration = wish_acceleration(&basis, &input, &cfg);
        assert!(acceleration.abs_diff_eq(Vec3::NEG_X * cfg.max_acceleration, 1.0e-3));
    }

    #[test]
    fn diagonal_input_is_not_faster() {
        let cfg = CharacterController::default();
        let input = AccumulatedInput {
            last_movement: Some(Vec2::ONE),
            ..default()
        };
        let acceleration = wish_acceleration(&Transform::default(), &input, &cfg);
        assert!((acceleration.length() - cfg.max_acceleration).abs() < 1.0e-3);
    }

    #[test]
    fn stale_jumps_are_dropped() {
        let cfg = CharacterController::default();
        let mut state = CharacterControllerState::default();
        let mut fresh = Stopwatch::new();
        fresh.tick(Duration::from_millis(20));
        let mut input = AccumulatedInput {
            jumped: Some(fresh),
            rolled: true,
            crouch: Some(true),
            ..default()
        };
        apply_input(&mut state, &mut input, Vec3::ZERO, &cfg);
        assert!(state.flags.wants_to_jump && state.flags.wants_to_roll && state.flags.wants_to_crouch);
        assert!(input.jumped.is_some());
        assert!(!input.rolled && input.crouch.is_none());

        let mut state = CharacterControllerState::default();
        if let Some(jumped) = input.jumped.as_mut() {
            jumped.tick(Duration::from_secs(1));
        }
        apply_input(&mut state, &mut input, Vec3::ZERO, &cfg);
        assert!(!state.flags.wants_to_jump);
        assert!(input.jumped.is_none());
    }
}
