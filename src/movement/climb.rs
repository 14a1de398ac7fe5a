//! Ledge climbing: grabbing, hanging, shimmying and the transitions out of a hang.
//!
//! The session sub-state picks the integrator each tick. Montage-gated transitions arm the
//! session deadline; it is checked after the sub-state step, so a warp always reaches its
//! target before the deadline resolves.

use tracing::trace;

use crate::{
    climbing::{ClimbingSession, ClimbingState, DeadlineOutcome, Warp},
    ledge::{HangPose, LedgeHit, ProbeFrame, ShimmyTarget},
    mode::MovementMode,
    montage::MontageClip,
    movement::{Character, Ctx, MovementEvent, max_braking_deceleration, set_mode},
    physics::{
        MIN_TICK_TIME, calc_velocity, interp_to, normalize_2d, rotation_from_forward_up,
        rotation_interp_to, try_normalize_2d,
    },
    prelude::*,
};

#[derive(Clone, Debug, PartialEq, Reflect)]
pub struct ClimbSettings {
    /// Rate of the exponential approach onto a freshly grabbed ledge.
    pub interp_speed: f32,
    /// The approach snaps to the hang pose once this close.
    pub snap_distance: f32,
    pub max_shimmy_speed: f32,
    pub friction: f32,
    pub braking_deceleration: f32,
    /// Lateral input below this does not shimmy.
    pub shimmy_threshold: f32,
    /// Lateral input above this turns a climb jump into a side jump when shimmying is blocked.
    pub side_jump_input_threshold: f32,
    /// How much earlier than the climb-up montage the climb ends, in seconds.
    pub climb_up_lead: f32,
    /// How long a launch toward a grab point lasts before falling takes over, in seconds.
    pub launch_lockout: f32,
}

impl Default for ClimbSettings {
    fn default() -> Self {
        Self {
            interp_speed: 15.0,
            snap_distance: 0.001,
            max_shimmy_speed: 1.5,
            friction: 0.5,
            braking_deceleration: 0.0,
            shimmy_threshold: 0.1,
            side_jump_input_threshold: 0.5,
            climb_up_lead: 0.1,
            launch_lockout: 0.5,
        }
    }
}

/// Grabs `ledge` and starts easing into the hang pose.
pub(crate) fn start_climb(
    ctx: &Ctx,
    ch: &mut Character,
    frame: &ProbeFrame,
    ledge: &LedgeHit,
    events: &mut Vec<MovementEvent>,
) {
    let pose = ctx.probe().hang_pose(frame, ledge);
    ch.state.current_ledge = Some(ledge.top.entity);
    set_mode(ctx, ch, MovementMode::CLIMBING, events);
    ch.state.climbing = Some(ClimbingSession::interpolating(pose, ledge.top.point.y));
    ch.velocity = Vec3::ZERO;
    events.push(MovementEvent::MontageStopped(MontageClip::DropClimb));
    events.push(MovementEvent::ClimbStarted {
        ledge: ledge.top.entity,
    });
}

/// Leaves climbing for walking or falling, depending on the floor below.
pub(crate) fn exit_climbing(ctx: &Ctx, ch: &mut Character, events: &mut Vec<MovementEvent>) {
    let cfg = ctx.cfg;
    let standing = ctx.mover(&ch.state).with_shape(cfg.capsule(false));
    let floor = standing
        .find_floor(ch.transform.translation, cfg.ground_distance, cfg.min_walk_cos)
        .filter(|floor| floor.walkable);
    let mode = if floor.is_some() {
        MovementMode::Walking
    } else {
        MovementMode::Falling
    };
    set_mode(ctx, ch, mode, events);
}

pub(crate) fn phys_climbing(
    ctx: &Ctx,
    ch: &mut Character,
    dt: f32,
    _iterations: u32,
    events: &mut Vec<MovementEvent>,
) {
    if dt < MIN_TICK_TIME {
        return;
    }
    let Some(state) = ch.state.climbing_state() else {
        unreachable!("climbing without a session");
    };
    match state {
        ClimbingState::Interpolating => interpolate(ctx, ch, dt),
        ClimbingState::Hanging => hang(ctx, ch, dt, events),
        ClimbingState::Warping | ClimbingState::Leaving => follow_warp(ch, dt),
        ClimbingState::Launching => fly(ctx, ch, dt),
        ClimbingState::Idle => ch.velocity = Vec3::ZERO,
    }
    resolve_deadline(ctx, ch, dt, events);
}

fn session(ch: &mut Character) -> &mut ClimbingSession {
    match ch.state.climbing.as_mut() {
        Some(session) => session,
        None => unreachable!("climbing without a session"),
    }
}

fn resolve_deadline(ctx: &Ctx, ch: &mut Character, dt: f32, events: &mut Vec<MovementEvent>) {
    let Some(session) = ch.state.climbing.as_mut() else {
        return;
    };
    let Some(outcome) = session.tick_deadline(dt) else {
        return;
    };
    if let Some(warp) = session.warp.take() {
        warp.to.apply(&mut ch.transform);
    }
    match outcome {
        DeadlineOutcome::ExitClimbing => exit_climbing(ctx, ch, events),
        DeadlineOutcome::ResumeHanging => ch.velocity = Vec3::ZERO,
    }
}

fn interpolate(ctx: &Ctx, ch: &mut Character, dt: f32) {
    let cfg = &ctx.cfg.climb;
    let position = ch.transform.translation;
    let rotation = ch.transform.rotation;
    let session = session(ch);
    let Some(target) = session.target else {
        session.set_state(ClimbingState::Hanging);
        return;
    };
    session.horizontal_direction = 0.0;
    if position.distance(target.location) <= cfg.snap_distance {
        session.target = None;
        session.set_state(ClimbingState::Hanging);
        target.apply(&mut ch.transform);
        ch.velocity = Vec3::ZERO;
        return;
    }
    let next = interp_to(position, target.location, dt, cfg.interp_speed);
    ch.transform.rotation = rotation_interp_to(rotation, target.rotation, dt, cfg.interp_speed);
    ch.transform.translation = next;
    ch.velocity = (next - position) / dt;
}

fn hang(ctx: &Ctx, ch: &mut Character, dt: f32, events: &mut Vec<MovementEvent>) {
    let cfg = ctx.cfg;
    let can_shimmy = session(ch).can_shimmy;
    let right = ProbeFrame::from_transform(&ch.transform).right;
    let acceleration = if can_shimmy {
        right * ch.state.acceleration.dot(right)
    } else {
        Vec3::ZERO
    };
    if let Some(root_motion) = ch.state.root_motion {
        ch.velocity = root_motion;
    } else {
        calc_velocity(
            &mut ch.velocity,
            acceleration,
            dt,
            cfg.climb.friction,
            true,
            max_braking_deceleration(ctx, &ch.state),
            ctx.limits(&ch.state),
        );
    }

    let old_location = ch.transform.translation;
    let delta = ch.velocity * dt;
    let mover = ctx.mover(&ch.state);
    let mut position = old_location;
    if let Some(hit) = mover.safe_move(&mut position, delta)
        && !hit.start_penetrating
    {
        let time_left = 1.0 - hit.fraction;
        let downward = Vec3::NEG_Y.dot(ch.velocity.normalize_or_zero());
        let stepped = hit.normal.y.abs() < 0.2
            && downward < 0.5
            && downward > -0.2
            && mover.step_up(&mut position, delta * time_left, cfg.step_size, cfg.min_walk_cos);
        if !stepped {
            mover.slide_along_surface(&mut position, delta, time_left, &hit);
        }
    }
    ch.transform.translation = position;
    if ch.state.root_motion.is_none() {
        ch.velocity = (position - old_location) / dt;
    }
    update_after_movement(ctx, ch, old_location, events);
}

/// Re-probes the ledge after moving, snaps back onto it and decides how lateral input is used.
fn update_after_movement(
    ctx: &Ctx,
    ch: &mut Character,
    old_location: Vec3,
    events: &mut Vec<MovementEvent>,
) {
    let probe = ctx.probe();
    let frame = ProbeFrame::from_transform(&ch.transform);
    let Some(ledge) = probe.found_ledge(&frame) else {
        ch.transform.translation = old_location;
        stop_shimmy(ch);
        return;
    };
    ch.state.current_ledge = Some(ledge.top.entity);
    probe.hang_pose(&frame, &ledge).apply(&mut ch.transform);
    session(ch).ledge_height = ledge.top.point.y;

    let frame = ProbeFrame::from_transform(&ch.transform);
    let direction = try_normalize_2d(ch.state.acceleration).map_or(0.0, |input| input.dot(frame.right));
    if direction.abs() < ctx.cfg.climb.shimmy_threshold {
        session(ch).horizontal_direction = 0.0;
        return;
    }
    match probe.can_move_in_direction(&frame, direction, ledge.top.entity) {
        Some(ShimmyTarget::Along { .. }) => {
            let session = session(ch);
            session.horizontal_direction = direction;
            session.can_shimmy = true;
        }
        Some(ShimmyTarget::InnerCorner(pose)) => {
            trace!(?pose, "turning into an inner corner");
            ch.velocity = Vec3::ZERO;
            let session = session(ch);
            session.horizontal_direction = direction;
            session.target = Some(pose);
            session.set_state(ClimbingState::Interpolating);
        }
        None => {
            if !try_corner_out(ctx, ch, &frame, direction, events) {
                stop_shimmy(ch);
            }
        }
    }
}

fn stop_shimmy(ch: &mut Character) {
    session(ch).stop_shimmy();
    ch.velocity = Vec3::ZERO;
}

fn try_corner_out(
    ctx: &Ctx,
    ch: &mut Character,
    frame: &ProbeFrame,
    direction: f32,
    events: &mut Vec<MovementEvent>,
) -> bool {
    let ledge_height = session(ch).ledge_height;
    let Some(pose) = ctx.probe().can_corner_out(frame, direction, ledge_height) else {
        return false;
    };
    let clip = if direction > 0.0 {
        MontageClip::RightCornerOut
    } else {
        MontageClip::LeftCornerOut
    };
    events.push(MovementEvent::CornerStart);
    begin_warp(ctx, ch, pose, clip, ClimbingState::Warping, 0.0, events);
    true
}

/// Plays `clip` and moves to `target` over its duration, minus `lead`.
fn begin_warp(
    ctx: &Ctx,
    ch: &mut Character,
    target: HangPose,
    clip: MontageClip,
    state: ClimbingState,
    lead: f32,
    events: &mut Vec<MovementEvent>,
) {
    let duration = (ctx.play(clip, events) - lead).max(0.0);
    let from = HangPose::of(&ch.transform);
    ch.velocity = Vec3::ZERO;
    let session = session(ch);
    session.warp = Some(Warp::new(from, target, duration));
    session.target = None;
    session.horizontal_direction = 0.0;
    session.arm(duration, state);
}

fn follow_warp(ch: &mut Character, dt: f32) {
    let old_location = ch.transform.translation;
    let Some(warp) = session(ch).warp.as_mut() else {
        ch.velocity = Vec3::ZERO;
        return;
    };
    let pose = warp.advance(dt);
    pose.apply(&mut ch.transform);
    ch.velocity = (pose.location - old_location) / dt;
}

fn fly(ctx: &Ctx, ch: &mut Character, dt: f32) {
    let gravity = ctx.cfg.gravity;
    ch.velocity.y -= gravity * 0.5 * dt;
    let mut position = ch.transform.translation;
    ctx.mover(&ch.state)
        .move_and_slide(&mut position, &mut ch.velocity, dt);
    ch.transform.translation = position;
    ch.velocity.y -= gravity * 0.5 * dt;
}

fn launch(ch: &mut Character, velocity: Vec3, duration: f32, events: &mut Vec<MovementEvent>) {
    let session = session(ch);
    session.warp = None;
    session.target = None;
    session.horizontal_direction = 0.0;
    session.arm(duration.max(0.0), ClimbingState::Launching);
    ch.velocity = velocity;
    events.push(MovementEvent::Launched { velocity });
}

/// The jump action while hanging: climb up, hop up, jump up or jump to the side.
pub(crate) fn climb_jump(ctx: &Ctx, ch: &mut Character, events: &mut Vec<MovementEvent>) {
    let cfg = ctx.cfg;
    let Some(session) = ch.state.climbing.as_ref() else {
        return;
    };
    if session.state != ClimbingState::Hanging {
        return;
    }
    let can_shimmy = session.can_shimmy;
    let horizontal_direction = session.horizontal_direction;
    let ledge_height = session.ledge_height;

    let frame = ProbeFrame::from_transform(&ch.transform);
    let input = normalize_2d(ch.state.acceleration).dot(frame.right);
    if !can_shimmy && input.abs() > cfg.climb.side_jump_input_threshold {
        jump_side(ctx, ch, &frame, input, events);
        return;
    }
    if horizontal_direction.abs() >= cfg.climb.shimmy_threshold {
        return;
    }

    let probe = ctx.probe();
    let stand = probe
        .found_ledge(&frame)
        .and_then(|ledge| probe.can_climb_up(&frame, &ledge, cfg.capsule(false), cfg.min_walk_cos));
    match stand {
        Some(stand) => climb_up(ctx, ch, stand, events),
        None => jump_up(ctx, ch, &frame, ledge_height, events),
    }
}

fn climb_up(ctx: &Ctx, ch: &mut Character, stand: Vec3, events: &mut Vec<MovementEvent>) {
    events.push(MovementEvent::ClimbUp);
    let target = HangPose {
        location: stand,
        rotation: ch.transform.rotation,
    };
    let lead = ctx.cfg.climb.climb_up_lead;
    begin_warp(ctx, ch, target, MontageClip::ClimbUp, ClimbingState::Leaving, lead, events);
}

fn jump_up(
    ctx: &Ctx,
    ch: &mut Character,
    frame: &ProbeFrame,
    ledge_height: f32,
    events: &mut Vec<MovementEvent>,
) {
    let probe = ctx.probe();
    events.push(MovementEvent::ClimbJumpStart);
    if let Some(pose) = probe.can_hop_up(frame, ledge_height) {
        begin_warp(ctx, ch, pose, MontageClip::HopUp, ClimbingState::Warping, 0.0, events);
        return;
    }
    let gravity = ctx.cfg.gravity;
    let velocity = probe.jump_up_velocity(gravity);
    launch(ch, velocity, velocity.y / gravity, events);
}

/// Warps onto the next ledge to the side, or lets go when there is none.
fn jump_side(
    ctx: &Ctx,
    ch: &mut Character,
    frame: &ProbeFrame,
    input: f32,
    events: &mut Vec<MovementEvent>,
) {
    let clip = if input > 0.0 {
        MontageClip::ClimbJumpRight
    } else {
        MontageClip::ClimbJumpLeft
    };
    let direction = frame.right * input.signum();
    match ctx.probe().found_side_ledge(frame, ch.state.current_ledge, direction) {
        Some(target) => {
            events.push(MovementEvent::ClimbJumpStart);
            begin_warp(ctx, ch, target, clip, ClimbingState::Warping, 0.0, events);
        }
        None => leave(ctx, ch, clip, events),
    }
}

/// Lets go of the ledge.
pub(crate) fn drop_climb(ctx: &Ctx, ch: &mut Character, events: &mut Vec<MovementEvent>) {
    if ch
        .state
        .climbing
        .as_ref()
        .is_none_or(|session| session.state != ClimbingState::Hanging)
    {
        return;
    }
    leave(ctx, ch, MontageClip::DropClimb, events);
}

/// Holds still while `clip` plays, then exits climbing.
fn leave(ctx: &Ctx, ch: &mut Character, clip: MontageClip, events: &mut Vec<MovementEvent>) {
    let duration = ctx.play(clip, events);
    ch.velocity = Vec3::ZERO;
    let session = session(ch);
    session.warp = None;
    session.target = None;
    session.horizontal_direction = 0.0;
    session.arm(duration, ClimbingState::Leaving);
}

/// Launches toward the nearest reachable grab point ahead. Returns `false` if there is none.
pub(crate) fn launch_to_ledge(ctx: &Ctx, ch: &mut Character, events: &mut Vec<MovementEvent>) -> bool {
    let probe = ctx.probe();
    let frame = ProbeFrame::from_transform(&ch.transform);
    let points = probe.reachable_grab_points(&frame, ch.state.acceleration, ctx.env.grab_points);
    let Some((velocity, target)) =
        probe.valid_launch_velocity(frame.origin, &points, ctx.cfg.gravity, ctx.env.ballistics)
    else {
        return false;
    };
    trace!(?target, "launching to a grab point");
    set_mode(ctx, ch, MovementMode::CLIMBING, events);
    if let Some(rotation) = rotation_from_forward_up(normalize_2d(velocity), Vec3::Y) {
        ch.transform.rotation = rotation;
    }
    launch(ch, velocity, ctx.cfg.climb.launch_lockout, events);
    true
}
