//! The movement state machine.
//!
//! [`tick`] advances one character by one step: it evaluates mode transitions from the pending
//! input, then runs the integrator of the active mode. It works on plain data so the same code
//! runs in the ECS system, in server-side replays and in tests.

use core::time::Duration;

use tracing::debug;

use crate::{
    CharacterController, CharacterControllerState,
    ballistic::BallisticSolver,
    collision::CollisionQueries,
    grab_points::GrabPointRegistry,
    ledge::{Probe, ProbeFrame},
    mode::{CustomMode, MovementMode},
    montage::{MontageClip, MontagePlayer},
    physics::{MIN_TICK_TIME, VelocityLimits, try_normalize_2d, validate_velocity, yaw_toward},
    prelude::*,
    sweep::Mover,
    water::{WaterLevel, WaterState},
};

pub mod climb;
pub mod roll;
pub mod slide;
pub mod walk;

/// Which side of the network a simulation runs on.
#[derive(Component, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
#[reflect(Component)]
pub enum NetRole {
    #[default]
    Standalone,
    /// A client predicting its own character.
    AutonomousProxy,
    Authority,
}

/// The collaborators a tick consults. All of them are read-only.
#[derive(Clone, Copy)]
pub struct Env<'a> {
    pub queries: &'a dyn CollisionQueries,
    pub grab_points: &'a dyn GrabPointRegistry,
    pub ballistics: &'a dyn BallisticSolver,
    pub montages: &'a dyn MontagePlayer,
    pub water: WaterState,
    pub role: NetRole,
}

#[derive(Clone, Copy)]
pub struct Ctx<'a> {
    pub cfg: &'a CharacterController,
    pub env: Env<'a>,
}

impl<'a> Ctx<'a> {
    pub fn new(cfg: &'a CharacterController, env: Env<'a>) -> Self {
        Self { cfg, env }
    }

    pub(crate) fn mover(&self, state: &CharacterControllerState) -> Mover<'a> {
        Mover::new(
            self.env.queries,
            self.cfg.capsule(state.crouching),
            &self.cfg.filter,
            self.cfg.skin_width,
        )
    }

    pub(crate) fn probe(&self) -> Probe<'a> {
        self.cfg.ledge.bind(self.env.queries, &self.cfg.filter.ignore)
    }

    pub(crate) fn limits(&self, state: &CharacterControllerState) -> VelocityLimits {
        VelocityLimits {
            max_speed: max_speed(self, state),
            max_acceleration: self.cfg.max_acceleration,
            braking_friction_factor: self.cfg.braking_friction_factor,
        }
    }

    pub(crate) fn play(&self, clip: MontageClip, events: &mut Vec<MovementEvent>) -> f32 {
        let duration = self.env.montages.play(clip);
        events.push(MovementEvent::MontageStarted { clip, duration });
        duration
    }
}

/// Everything a tick mutates.
#[derive(Clone, Debug, Default)]
pub struct Character {
    pub transform: Transform,
    pub velocity: Vec3,
    pub state: CharacterControllerState,
}

impl Character {
    pub fn new(transform: Transform) -> Self {
        Self {
            transform,
            ..default()
        }
    }
}

/// Things that happened during a tick, drained by the caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MovementEvent {
    ModeChanged { from: MovementMode, to: MovementMode },
    Jumped,
    MontageStarted { clip: MontageClip, duration: f32 },
    MontageStopped(MontageClip),
    ClimbStarted { ledge: Entity },
    ClimbUp,
    CornerStart,
    ClimbJumpStart,
    Launched { velocity: Vec3 },
    /// A predicting client entered a roll and the authority should follow.
    ServerEnterRoll,
}

/// Advances `ch` by one step of `dt` seconds.
pub fn tick(ctx: &Ctx, ch: &mut Character, dt: f32, events: &mut Vec<MovementEvent>) {
    // Also rejects NaN.
    if !(dt >= MIN_TICK_TIME) {
        return;
    }
    let cfg = ctx.cfg;

    ch.state.last_ground.tick(Duration::from_secs_f32(dt));
    if let Some(cooldown) = ch.state.roll_cooldown.as_mut()
        && cooldown.tick(dt)
    {
        ch.state.roll_cooldown = None;
    }

    if let Some(mode) = ch.state.requested_mode.take() {
        set_mode(ctx, ch, mode, events);
    }
    update_water_mode(ctx, ch, events);
    handle_crouching(ctx, ch);

    if core::mem::take(&mut ch.state.flags.wants_to_roll) {
        roll::try_roll(ctx, ch, events);
    }
    if ch.state.mode == MovementMode::Walking && slide::slide_surface(ctx, ch).is_some() {
        slide::enter_slide(ctx, ch, events);
    }
    update_ledge_grab(ctx, ch, events);
    if core::mem::take(&mut ch.state.flags.wants_to_drop) {
        climb::drop_climb(ctx, ch, events);
    }
    handle_jump(ctx, ch, events);

    dispatch(ctx, ch, dt, 0, events);

    ch.state.flags.previous_wants_to_crouch = ch.state.flags.wants_to_crouch;
    if ch.state.mode.is_moving_on_ground() {
        ch.state.last_ground.reset();
    }
    physics_rotation(ctx, ch, dt);
    validate_velocity(&mut ch.velocity, cfg.max_speed);
}

/// Runs the integrator of the active mode.
pub(crate) fn dispatch(
    ctx: &Ctx,
    ch: &mut Character,
    dt: f32,
    iterations: u32,
    events: &mut Vec<MovementEvent>,
) {
    match ch.state.mode {
        MovementMode::Walking => walk::phys_walking(ctx, ch, dt, iterations, events),
        MovementMode::Falling => walk::phys_falling(ctx, ch, dt, iterations, events),
        MovementMode::Swimming => walk::phys_swimming(ctx, ch, dt, iterations, events),
        MovementMode::Custom(CustomMode::Slide) => slide::phys_slide(ctx, ch, dt, iterations, events),
        MovementMode::Custom(CustomMode::Roll) => roll::phys_roll(ctx, ch, dt, iterations, events),
        MovementMode::Custom(CustomMode::Climbing) => {
            climb::phys_climbing(ctx, ch, dt, iterations, events);
        }
    }
}

/// Hands the rest of the step to the integrator of the mode just entered.
pub(crate) fn start_new_physics(
    ctx: &Ctx,
    ch: &mut Character,
    remaining: f32,
    iterations: u32,
    events: &mut Vec<MovementEvent>,
) {
    if remaining >= MIN_TICK_TIME && iterations < ctx.cfg.max_simulation_iterations {
        dispatch(ctx, ch, remaining, iterations + 1, events);
    }
}

/// Switches modes, running the exit hook of the old mode and the enter hook of the new one.
pub fn set_mode(ctx: &Ctx, ch: &mut Character, mode: MovementMode, events: &mut Vec<MovementEvent>) {
    let from = ch.state.mode;
    if from == mode {
        return;
    }
    match from {
        MovementMode::Custom(CustomMode::Roll) => roll::exit_roll(ctx, ch),
        MovementMode::Custom(CustomMode::Slide) => slide::exit_slide(ch),
        MovementMode::Custom(CustomMode::Climbing) => ch.state.climbing = None,
        MovementMode::Walking | MovementMode::Falling | MovementMode::Swimming => {}
    }

    ch.state.mode = mode;
    match mode {
        MovementMode::Walking => {
            ch.velocity.y = 0.0;
            ch.state.floor = ctx
                .mover(&ch.state)
                .find_floor(ch.transform.translation, ctx.cfg.ground_distance, ctx.cfg.min_walk_cos)
                .filter(|floor| floor.walkable);
        }
        MovementMode::Falling | MovementMode::Swimming => ch.state.floor = None,
        MovementMode::Custom(CustomMode::Roll) => roll::enter_roll(ctx, ch),
        MovementMode::Custom(CustomMode::Climbing) => ch.state.climbing = Some(default()),
        MovementMode::Custom(CustomMode::Slide) => {}
    }
    debug!(?from, to = ?mode, "movement mode");
    events.push(MovementEvent::ModeChanged { from, to: mode });
}

/// Top speed of the active mode.
pub fn max_speed(ctx: &Ctx, state: &CharacterControllerState) -> f32 {
    let cfg = ctx.cfg;
    match state.mode {
        MovementMode::Walking | MovementMode::Falling => {
            if state.crouching {
                cfg.max_walk_speed_crouched
            } else if state.flags.wants_to_sprint {
                cfg.max_sprint_speed
            } else {
                state.locomotion.max_walk_speed.unwrap_or(cfg.max_walk_speed)
            }
        }
        MovementMode::Swimming => cfg.max_swim_speed.min(ctx.env.water.speed),
        MovementMode::Custom(CustomMode::Slide) => cfg.slide.max_speed,
        MovementMode::Custom(CustomMode::Roll) => cfg.roll.max_speed,
        MovementMode::Custom(CustomMode::Climbing) => cfg.climb.max_shimmy_speed,
    }
}

/// Deceleration applied when there is no input, for the active mode.
pub fn max_braking_deceleration(ctx: &Ctx, state: &CharacterControllerState) -> f32 {
    let cfg = ctx.cfg;
    match state.mode {
        MovementMode::Walking => cfg.braking_deceleration_walking,
        MovementMode::Falling => cfg.braking_deceleration_falling,
        MovementMode::Swimming => cfg.braking_deceleration_swimming,
        MovementMode::Custom(CustomMode::Slide) => cfg.slide.braking_deceleration,
        MovementMode::Custom(CustomMode::Roll) => cfg.roll.braking_deceleration,
        MovementMode::Custom(CustomMode::Climbing) => cfg.climb.braking_deceleration,
    }
}

fn update_water_mode(ctx: &Ctx, ch: &mut Character, events: &mut Vec<MovementEvent>) {
    if ctx.env.water.level == WaterLevel::Center
        && matches!(ch.state.mode, MovementMode::Walking | MovementMode::Falling)
    {
        set_mode(ctx, ch, MovementMode::Swimming, events);
    }
}

fn handle_crouching(ctx: &Ctx, ch: &mut Character) {
    let offset = ctx.cfg.crouch_offset();
    let can_crouch = ch.state.mode.is_moving_on_ground();
    if ch.state.flags.wants_to_crouch && can_crouch {
        if !ch.state.crouching {
            ch.state.crouching = true;
            ch.transform.translation.y -= offset;
        }
        return;
    }
    if !ch.state.crouching {
        return;
    }
    let standing = ch.transform.translation + Vec3::Y * offset;
    let mover = ctx.mover(&ch.state).with_shape(ctx.cfg.capsule(false));
    if !mover.is_blocked_at(standing) {
        ch.state.crouching = false;
        ch.transform.translation = standing;
    }
}

fn update_ledge_grab(ctx: &Ctx, ch: &mut Character, events: &mut Vec<MovementEvent>) {
    match ch.state.mode {
        MovementMode::Falling if ch.velocity.y <= 0.0 => {
            let probe = ctx.probe();
            let frame = ProbeFrame::from_transform(&ch.transform);
            if let Some(ledge) = probe.found_ledge(&frame)
                && ch.state.current_ledge != Some(ledge.top.entity)
            {
                climb::start_climb(ctx, ch, &frame, &ledge, events);
            }
        }
        MovementMode::Falling | MovementMode::Custom(CustomMode::Climbing) => {}
        _ => ch.state.current_ledge = None,
    }
}

fn handle_jump(ctx: &Ctx, ch: &mut Character, events: &mut Vec<MovementEvent>) {
    if !ch.state.flags.wants_to_jump {
        return;
    }
    let cfg = ctx.cfg;
    let mode = ch.state.mode;
    if mode == MovementMode::CLIMBING {
        ch.state.flags.wants_to_jump = false;
        climb::climb_jump(ctx, ch, events);
        return;
    }
    let coyote = mode == MovementMode::Falling && ch.state.last_ground.elapsed() <= cfg.coyote_time;
    if !(mode.is_moving_on_ground() || coyote) {
        return;
    }
    ch.state.flags.wants_to_jump = false;
    if climb::launch_to_ledge(ctx, ch, events) {
        return;
    }
    ch.velocity.y = (2.0 * cfg.gravity * cfg.jump_height).max(0.0).sqrt();
    set_mode(ctx, ch, MovementMode::Falling, events);
    // No second coyote jump off the same ground.
    ch.state.last_ground.set_elapsed(cfg.coyote_time + Duration::from_millis(1));
    events.push(MovementEvent::Jumped);
}

fn physics_rotation(ctx: &Ctx, ch: &mut Character, dt: f32) {
    if !ch.state.locomotion.orient_rotation_to_movement
        || !matches!(ch.state.mode, MovementMode::Walking | MovementMode::Swimming)
    {
        return;
    }
    if let Some(direction) = try_normalize_2d(ch.state.acceleration) {
        let max_radians = ctx.cfg.rotation_rate.to_radians() * dt;
        ch.transform.rotation = yaw_toward(ch.transform.rotation, direction, max_radians);
    }
}
