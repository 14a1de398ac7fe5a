//! Velocity model and small pose helpers shared by every movement mode.

use tracing::warn;

use crate::prelude::*;

/// Ticks shorter than this are skipped entirely.
pub const MIN_TICK_TIME: f32 = 1.0e-6;

/// Below this speed braking snaps the velocity to zero.
pub const BRAKE_TO_STOP_VELOCITY: f32 = 0.1;

/// Braking is integrated in sub-steps of at most this length to stay stable at low frame rates.
const BRAKING_SUB_STEP_TIME: f32 = 1.0 / 33.0;

/// Limits that [`calc_velocity`] works against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VelocityLimits {
    pub max_speed: f32,
    pub max_acceleration: f32,
    pub braking_friction_factor: f32,
}

/// Integrates `acceleration` into `velocity` with friction and braking.
///
/// - Zero acceleration, or a velocity above `max_speed`, brakes with `braking_deceleration`
///   and `friction * braking_friction_factor`.
/// - Otherwise friction turns the velocity toward the acceleration direction.
/// - `fluid` applies an additional drag proportional to `friction`.
/// - Speed is clamped to `max_speed`, unless the character was already faster than that.
pub fn calc_velocity(
    velocity: &mut Vec3,
    acceleration: Vec3,
    dt: f32,
    friction: f32,
    fluid: bool,
    braking_deceleration: f32,
    limits: VelocityLimits,
) {
    if dt < MIN_TICK_TIME {
        return;
    }
    let friction = friction.max(0.0);
    let max_speed = limits.max_speed.max(0.0);

    let acceleration = acceleration.clamp_length_max(limits.max_acceleration);
    let zero_acceleration = acceleration.length_squared() <= f32::EPSILON;
    let over_max_speed = velocity.length_squared() > max_speed * max_speed;

    if zero_acceleration || over_max_speed {
        let old_velocity = *velocity;
        apply_velocity_braking(
            velocity,
            dt,
            friction * limits.braking_friction_factor,
            braking_deceleration,
        );
        // Braking must not bring us below max speed while we still accelerate along it.
        if over_max_speed
            && velocity.length_squared() < max_speed * max_speed
            && acceleration.dot(old_velocity) > 0.0
        {
            *velocity = old_velocity.normalize_or_zero() * max_speed;
        }
    } else {
        let accel_dir = acceleration.normalize_or_zero();
        let speed = velocity.length();
        *velocity -= (*velocity - accel_dir * speed) * f32::min(dt * friction, 1.0);
    }

    if fluid {
        *velocity *= 1.0 - f32::min(friction * dt, 1.0);
    }

    if !zero_acceleration {
        let new_max_speed = if velocity.length_squared() > max_speed * max_speed {
            velocity.length()
        } else {
            max_speed
        };
        *velocity += acceleration * dt;
        *velocity = velocity.clamp_length_max(new_max_speed);
    }
}

/// Slows `velocity` down by `friction` and a constant `braking_deceleration`.
pub fn apply_velocity_braking(
    velocity: &mut Vec3,
    dt: f32,
    friction: f32,
    braking_deceleration: f32,
) {
    if velocity.length_squared() <= f32::EPSILON || dt < MIN_TICK_TIME {
        return;
    }
    let friction = friction.max(0.0);
    let braking_deceleration = braking_deceleration.max(0.0);
    let zero_friction = friction == 0.0;
    let zero_braking = braking_deceleration == 0.0;
    if zero_friction && zero_braking {
        return;
    }

    let old_velocity = *velocity;
    let reverse_accel = -braking_deceleration * velocity.normalize_or_zero();
    let mut remaining = dt;
    while remaining >= MIN_TICK_TIME {
        let step = if remaining > BRAKING_SUB_STEP_TIME && !zero_friction {
            f32::min(BRAKING_SUB_STEP_TIME, remaining * 0.5)
        } else {
            remaining
        };
        remaining -= step;

        *velocity += (-friction * *velocity + reverse_accel) * step;

        // Don't reverse direction.
        if velocity.dot(old_velocity) <= 0.0 {
            *velocity = Vec3::ZERO;
            return;
        }
    }

    if velocity.length_squared() < BRAKE_TO_STOP_VELOCITY * BRAKE_TO_STOP_VELOCITY {
        *velocity = Vec3::ZERO;
    }
}

/// Zeroes non-finite components and clamps the speed.
pub fn validate_velocity(velocity: &mut Vec3, max_speed: f32) {
    for i in 0..3 {
        if !velocity[i].is_finite() {
            warn!("velocity[{i}] is not finite: {}, setting to 0", velocity[i]);
            velocity[i] = 0.0;
        }
    }
    *velocity = velocity.clamp_length(0.0, max_speed);
}

/// The horizontal part of `v`, normalized, or zero.
pub fn normalize_2d(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z).normalize_or_zero()
}

/// The horizontal part of `v`, normalized, if it has one.
pub fn try_normalize_2d(v: Vec3) -> Option<Vec3> {
    Vec3::new(v.x, 0.0, v.z).try_normalize()
}

/// Builds a rotation whose forward axis is `forward` exactly and whose up axis is as close to
/// `up` as an orthonormal basis allows.
///
/// Returns `None` when the two vectors are degenerate or parallel.
pub fn rotation_from_forward_up(forward: Vec3, up: Vec3) -> Option<Quat> {
    let forward = forward.try_normalize()?;
    let back = -forward;
    let right = up.cross(back).try_normalize()?;
    let up = back.cross(right);
    Some(Quat::from_mat3(&Mat3::from_cols(right, up, back)).normalize())
}

/// Yaw-only version of `rotation`, with its up axis on world up.
pub fn level_rotation(rotation: Quat) -> Quat {
    let forward = normalize_2d(rotation * Vec3::NEG_Z);
    rotation_from_forward_up(forward, Vec3::Y).unwrap_or(rotation)
}

/// Exponential approach of `current` toward `target`.
pub fn interp_to(current: Vec3, target: Vec3, dt: f32, speed: f32) -> Vec3 {
    if speed <= 0.0 {
        return target;
    }
    let dist = target - current;
    if dist.length_squared() < 1.0e-8 {
        return target;
    }
    current + dist * (dt * speed).clamp(0.0, 1.0)
}

/// Exponential approach of `current` toward `target` for rotations.
pub fn rotation_interp_to(current: Quat, target: Quat, dt: f32, speed: f32) -> Quat {
    if speed <= 0.0 {
        return target;
    }
    current.slerp(target, (dt * speed).clamp(0.0, 1.0))
}

/// Rotates the yaw of `rotation` toward `direction` by at most `max_radians`.
pub fn yaw_toward(rotation: Quat, direction: Vec3, max_radians: f32) -> Quat {
    let Some(target) = rotation_from_forward_up(normalize_2d(direction), Vec3::Y) else {
        return rotation;
    };
    let current = level_rotation(rotation);
    let angle = current.angle_between(target);
    if angle <= max_radians || angle <= f32::EPSILON {
        return target;
    }
    current.slerp(target, max_radians / angle)
}
