//! A timed, crouched dash in a fixed direction.

use crate::{
    CharacterControllerState,
    climbing::Deadline,
    mode::MovementMode,
    movement::{
        Character, Ctx, MovementEvent, NetRole, set_mode,
        walk::{GroundDrive, walk_along_ground},
    },
    physics::{MIN_TICK_TIME, level_rotation, normalize_2d, rotation_from_forward_up, try_normalize_2d},
    prelude::*,
};

#[derive(Clone, Debug, PartialEq, Reflect)]
pub struct RollSettings {
    /// Length of a roll, in seconds.
    pub duration: f32,
    /// Time after a roll before the next one can start, in seconds.
    pub delay_between_rolls: f32,
    pub max_speed: f32,
    pub braking_deceleration: f32,
    /// Rolling off a ledge falls instead of following the edge.
    pub can_walk_off_ledges: bool,
}

impl Default for RollSettings {
    fn default() -> Self {
        Self {
            duration: 1.3,
            delay_between_rolls: 0.25,
            max_speed: 6.0,
            braking_deceleration: 20.0,
            can_walk_off_ledges: true,
        }
    }
}

/// Per-roll data, present only while rolling.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct RollState {
    pub time_left: f32,
    /// Horizontal, normalized.
    pub direction: Vec3,
}

pub fn can_roll(state: &CharacterControllerState) -> bool {
    state.mode == MovementMode::Walking && state.roll_cooldown.is_none()
}

/// Starts a roll if allowed. A refused request is dropped.
pub(crate) fn try_roll(ctx: &Ctx, ch: &mut Character, events: &mut Vec<MovementEvent>) {
    if !can_roll(&ch.state) {
        return;
    }
    set_mode(ctx, ch, MovementMode::ROLL, events);
    if ctx.env.role == NetRole::AutonomousProxy {
        events.push(MovementEvent::ServerEnterRoll);
    }
}

pub(crate) fn enter_roll(ctx: &Ctx, ch: &mut Character) {
    let forward = normalize_2d(ch.transform.rotation * Vec3::NEG_Z);
    let direction = try_normalize_2d(ch.state.acceleration)
        .or_else(|| forward.try_normalize())
        .unwrap_or(Vec3::NEG_Z);
    ch.state.flags.wants_to_crouch = true;
    ch.state.roll = Some(RollState {
        time_left: ctx.cfg.roll.duration,
        direction,
    });
    ch.velocity = direction * ctx.cfg.roll.max_speed;
    ch.state.floor = ctx
        .mover(&ch.state)
        .find_floor(
            ch.transform.translation,
            ctx.cfg.ground_distance,
            ctx.cfg.min_walk_cos,
        )
        .filter(|floor| floor.walkable);
}

/// Runs on every exit from the roll, before the new mode is entered.
pub(crate) fn exit_roll(ctx: &Ctx, ch: &mut Character) {
    ch.state.flags.wants_to_crouch = false;
    ch.state.roll = None;
    ch.state.roll_cooldown = Some(Deadline::after(ctx.cfg.roll.delay_between_rolls));
    ch.transform.rotation = level_rotation(ch.transform.rotation);
}

pub(crate) fn phys_roll(
    ctx: &Ctx,
    ch: &mut Character,
    dt: f32,
    iterations: u32,
    events: &mut Vec<MovementEvent>,
) {
    if dt < MIN_TICK_TIME {
        return;
    }
    let Some(roll) = ch.state.roll.as_mut() else {
        unreachable!("rolling without roll state");
    };
    roll.time_left -= dt;
    if roll.time_left <= 0.0 {
        set_mode(ctx, ch, MovementMode::Walking, events);
        return;
    }
    let direction = roll.direction;

    walk_along_ground(
        ctx,
        ch,
        dt,
        iterations,
        events,
        GroundDrive::Fixed(direction * ctx.cfg.roll.max_speed),
        ctx.cfg.roll.can_walk_off_ledges,
    );
    if ch.state.mode == MovementMode::ROLL
        && let Some(rotation) = rotation_from_forward_up(direction, Vec3::Y)
    {
        ch.transform.rotation = rotation;
    }
}
