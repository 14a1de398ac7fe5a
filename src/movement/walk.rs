//! The base modes: walking, falling and swimming.

use crate::{
    collision::ShapeHit,
    mode::MovementMode,
    movement::{Character, Ctx, MovementEvent, max_braking_deceleration, set_mode, start_new_physics},
    physics::{MIN_TICK_TIME, calc_velocity},
    prelude::*,
    water::WaterLevel,
};

/// What drives the velocity of a ground move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum GroundDrive {
    /// Acceleration from input, with friction and braking.
    Input,
    /// A fixed velocity that ignores input.
    Fixed(Vec3),
}

pub(crate) fn phys_walking(
    ctx: &Ctx,
    ch: &mut Character,
    dt: f32,
    iterations: u32,
    events: &mut Vec<MovementEvent>,
) {
    let can_walk_off_ledges = !ch.state.crouching;
    walk_along_ground(ctx, ch, dt, iterations, events, GroundDrive::Input, can_walk_off_ledges);
}

/// Sub-stepped movement along the floor with step-up, ground snapping and ledge handling.
///
/// Shared by walking and rolling. Losing the floor hands the rest of the step to falling,
/// unless `can_walk_off_ledges` is off, in which case the move is redirected along the edge.
pub(crate) fn walk_along_ground(
    ctx: &Ctx,
    ch: &mut Character,
    dt: f32,
    mut iterations: u32,
    events: &mut Vec<MovementEvent>,
    drive: GroundDrive,
    can_walk_off_ledges: bool,
) {
    if dt < MIN_TICK_TIME {
        return;
    }
    let cfg = ctx.cfg;
    let mut remaining = dt;
    let mut tried_ledge_move = false;

    while remaining >= MIN_TICK_TIME && iterations < cfg.max_simulation_iterations {
        iterations += 1;
        let step = remaining.min(cfg.max_simulation_time_step);
        remaining -= step;

        let old_location = ch.transform.translation;
        ch.velocity.y = 0.0;
        match (drive, ch.state.root_motion) {
            (_, Some(root_motion)) => ch.velocity = root_motion,
            (GroundDrive::Fixed(velocity), None) => ch.velocity = velocity,
            (GroundDrive::Input, None) => {
                let acceleration = ch.state.acceleration.with_y(0.0);
                calc_velocity(
                    &mut ch.velocity,
                    acceleration,
                    step,
                    cfg.ground_friction,
                    false,
                    max_braking_deceleration(ctx, &ch.state),
                    ctx.limits(&ch.state),
                );
            }
        }

        let delta = ch.velocity * step;
        move_along_floor(ctx, ch, delta);

        let mover = ctx.mover(&ch.state);
        let floor = mover.find_floor(
            ch.transform.translation,
            cfg.step_size + cfg.ground_distance,
            cfg.min_walk_cos,
        );
        match floor {
            Some(floor) if floor.walkable => {
                if floor.distance > cfg.skin_width {
                    ch.transform.translation.y -= floor.distance - cfg.skin_width;
                }
                ch.state.floor = Some(floor);
            }
            _ if !can_walk_off_ledges => {
                ch.transform.translation = old_location;
                if !tried_ledge_move
                    && let Some(side) = ledge_move(ctx, ch, old_location, delta)
                {
                    tried_ledge_move = true;
                    ch.transform.translation += side;
                } else {
                    ch.velocity = Vec3::ZERO;
                    break;
                }
            }
            _ => {
                ch.state.floor = None;
                set_mode(ctx, ch, MovementMode::Falling, events);
                start_new_physics(ctx, ch, remaining, iterations, events);
                return;
            }
        }

        if ch.state.root_motion.is_none() && matches!(drive, GroundDrive::Input) {
            ch.velocity = ((ch.transform.translation - old_location) / step).with_y(0.0);
        }
    }
}

/// Moves by `delta` along the floor: follows ramps, steps up low obstacles and slides along walls.
pub(crate) fn move_along_floor(ctx: &Ctx, ch: &mut Character, delta: Vec3) {
    if delta.length_squared() <= f32::EPSILON {
        return;
    }
    let cfg = ctx.cfg;
    let mover = ctx.mover(&ch.state);
    let ramp_delta = match ch.state.floor {
        Some(floor) if floor.walkable => ground_movement_delta(delta, floor.normal),
        _ => delta,
    };

    let mut position = ch.transform.translation;
    let Some(hit) = mover.safe_move(&mut position, ramp_delta) else {
        ch.transform.translation = position;
        return;
    };
    if hit.start_penetrating {
        return;
    }
    let time_left = 1.0 - hit.fraction;
    if hit.is_walkable(cfg.min_walk_cos) && hit.normal.y < 1.0 {
        // Ran into a ramp.
        let along = ground_movement_delta(delta * time_left, hit.normal);
        mover.safe_move(&mut position, along);
    } else if !(can_step_up(ctx, ch, &hit)
        && mover.step_up(&mut position, delta * time_left, cfg.step_size, cfg.min_walk_cos))
    {
        mover.slide_along_surface(&mut position, ramp_delta, time_left, &hit);
    }
    ch.transform.translation = position;
}

/// Steps only over obstacles whose contact is below the step height.
fn can_step_up(ctx: &Ctx, ch: &Character, hit: &ShapeHit) -> bool {
    let bottom = ch.transform.translation.y - ctx.cfg.capsule(ch.state.crouching).half_height;
    hit.point.y - bottom <= ctx.cfg.step_size
}

/// Tilts a horizontal `delta` onto the plane of `normal`, keeping its horizontal part.
fn ground_movement_delta(delta: Vec3, normal: Vec3) -> Vec3 {
    if normal.y <= f32::EPSILON || normal.y >= 1.0 - f32::EPSILON {
        return delta;
    }
    let y = -(normal.x * delta.x + normal.z * delta.z) / normal.y;
    Vec3::new(delta.x, y, delta.z)
}

/// A sideways move along the edge the character would have walked off, if one keeps it grounded.
fn ledge_move(ctx: &Ctx, ch: &Character, old_location: Vec3, delta: Vec3) -> Option<Vec3> {
    let side = Vec3::new(delta.z, 0.0, -delta.x);
    if side.length_squared() <= f32::EPSILON {
        return None;
    }
    [side, -side]
        .into_iter()
        .find(|side| check_ledge_direction(ctx, ch, old_location, *side))
}

fn check_ledge_direction(ctx: &Ctx, ch: &Character, old_location: Vec3, side: Vec3) -> bool {
    let cfg = ctx.cfg;
    let mover = ctx.mover(&ch.state);
    if mover.sweep(old_location, side).is_some() {
        return false;
    }
    mover
        .find_floor(old_location + side, cfg.step_size + cfg.ground_distance, cfg.min_walk_cos)
        .is_some_and(|floor| floor.walkable)
}

pub(crate) fn phys_falling(
    ctx: &Ctx,
    ch: &mut Character,
    dt: f32,
    mut iterations: u32,
    events: &mut Vec<MovementEvent>,
) {
    if dt < MIN_TICK_TIME {
        return;
    }
    let cfg = ctx.cfg;
    let mut remaining = dt;
    while remaining >= MIN_TICK_TIME && iterations < cfg.max_simulation_iterations {
        iterations += 1;
        let step = remaining.min(cfg.max_simulation_time_step);
        remaining -= step;

        if let Some(root_motion) = ch.state.root_motion {
            ch.velocity = root_motion;
        } else {
            let mut horizontal = ch.velocity.with_y(0.0);
            let acceleration = ch.state.acceleration.with_y(0.0) * cfg.air_control;
            calc_velocity(
                &mut horizontal,
                acceleration,
                step,
                0.0,
                false,
                max_braking_deceleration(ctx, &ch.state),
                ctx.limits(&ch.state),
            );
            ch.velocity = horizontal.with_y(ch.velocity.y);
        }

        // Half the gravity before the move and half after keeps the arc exact.
        ch.velocity.y -= cfg.gravity * 0.5 * step;
        let mover = ctx.mover(&ch.state);
        let mut position = ch.transform.translation;
        mover.move_and_slide(&mut position, &mut ch.velocity, step);
        ch.transform.translation = position;
        ch.velocity.y -= cfg.gravity * 0.5 * step;

        if ch.velocity.y <= 0.0
            && let Some(floor) =
                mover.find_floor(position, cfg.ground_distance, cfg.min_walk_cos)
            && floor.walkable
        {
            ch.state.floor = Some(floor);
            set_mode(ctx, ch, MovementMode::Walking, events);
            start_new_physics(ctx, ch, remaining, iterations, events);
            return;
        }
    }
}

pub(crate) fn phys_swimming(
    ctx: &Ctx,
    ch: &mut Character,
    dt: f32,
    iterations: u32,
    events: &mut Vec<MovementEvent>,
) {
    if dt < MIN_TICK_TIME {
        return;
    }
    let cfg = ctx.cfg;
    if ctx.env.water.level != WaterLevel::Center {
        set_mode(ctx, ch, MovementMode::Falling, events);
        start_new_physics(ctx, ch, dt, iterations, events);
        return;
    }
    if let Some(root_motion) = ch.state.root_motion {
        ch.velocity = root_motion;
    } else {
        calc_velocity(
            &mut ch.velocity,
            ch.state.acceleration,
            dt,
            cfg.swim_friction,
            true,
            max_braking_deceleration(ctx, &ch.state),
            ctx.limits(&ch.state),
        );
    }
    let mut position = ch.transform.translation;
    ctx.mover(&ch.state)
        .move_and_slide(&mut position, &mut ch.velocity, dt);
    ch.transform.translation = position;
}
