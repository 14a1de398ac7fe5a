//! Sliding down steep surfaces while crouched.

use crate::{
    collision::{QueryFilter, ShapeHit},
    mode::MovementMode,
    movement::{Character, Ctx, MovementEvent, max_braking_deceleration, set_mode, start_new_physics},
    physics::{MIN_TICK_TIME, calc_velocity, level_rotation, normalize_2d, rotation_from_forward_up},
    prelude::*,
};

#[derive(Clone, Debug, PartialEq, Reflect)]
pub struct SlideSettings {
    pub max_speed: f32,
    /// Speed added along the current horizontal velocity when a slide starts.
    pub enter_impulse: f32,
    /// Downward acceleration while sliding.
    pub gravity_force: f32,
    pub friction: f32,
    pub braking_deceleration: f32,
    /// Only surfaces on these layers can be slid on.
    pub surface_layers: u32,
    /// Minimum slope of a slide surface, in radians.
    pub min_surface_angle: f32,
    /// Length of the downward surface probe, in capsule half heights.
    pub probe_depth: f32,
    /// Lateral input is ignored unless it lines up with the right axis at least this much.
    pub lateral_input_threshold: f32,
}

impl Default for SlideSettings {
    fn default() -> Self {
        Self {
            max_speed: 3.0,
            enter_impulse: 5.0,
            gravity_force: 50.0,
            friction: 1.3,
            braking_deceleration: 5.0,
            surface_layers: LayerMask::ALL.0,
            min_surface_angle: 35.0_f32.to_radians(),
            probe_depth: 3.0,
            lateral_input_threshold: 0.5,
        }
    }
}

/// The steep, slidable surface below the character, if any.
pub fn slide_surface(ctx: &Ctx, ch: &Character) -> Option<ShapeHit> {
    let settings = &ctx.cfg.slide;
    if settings.surface_layers == 0 {
        return None;
    }
    let half_height = ctx.cfg.capsule(ch.state.crouching).half_height;
    let start = ch.transform.translation;
    let end = start - Vec3::Y * half_height * settings.probe_depth;
    let filter = QueryFilter::from_mask(settings.surface_layers)
        .with_ignored(ctx.cfg.filter.ignore.iter().copied());
    let hit = ctx.env.queries.line_trace(start, end, &filter)?;
    let steep = hit.normal.y > 0.0 && hit.normal.y <= settings.min_surface_angle.cos();
    (!hit.start_penetrating && steep).then_some(hit)
}

pub(crate) fn enter_slide(ctx: &Ctx, ch: &mut Character, events: &mut Vec<MovementEvent>) {
    ch.state.flags.wants_to_crouch = true;
    ch.velocity += normalize_2d(ch.velocity) * ctx.cfg.slide.enter_impulse;
    set_mode(ctx, ch, MovementMode::SLIDE, events);
}

/// Runs on every exit from the slide, before the new mode is entered.
pub(crate) fn exit_slide(ch: &mut Character) {
    ch.state.flags.wants_to_crouch = false;
    ch.transform.rotation = level_rotation(ch.transform.rotation);
}

pub(crate) fn phys_slide(
    ctx: &Ctx,
    ch: &mut Character,
    dt: f32,
    iterations: u32,
    events: &mut Vec<MovementEvent>,
) {
    if dt < MIN_TICK_TIME {
        return;
    }
    let Some(surface) = slide_surface(ctx, ch) else {
        set_mode(ctx, ch, MovementMode::Walking, events);
        start_new_physics(ctx, ch, dt, iterations, events);
        return;
    };
    let settings = &ctx.cfg.slide;

    if let Some(root_motion) = ch.state.root_motion {
        ch.velocity = root_motion;
    }
    ch.velocity += Vec3::NEG_Y * settings.gravity_force * dt;

    let right = ch.transform.right().as_vec3();
    let input = normalize_2d(ch.state.acceleration);
    let acceleration = if input.dot(right).abs() > settings.lateral_input_threshold {
        right * ch.state.acceleration.dot(right)
    } else {
        Vec3::ZERO
    };
    if ch.state.root_motion.is_none() {
        calc_velocity(
            &mut ch.velocity,
            acceleration,
            dt,
            settings.friction,
            false,
            max_braking_deceleration(ctx, &ch.state),
            ctx.limits(&ch.state),
        );
    }

    let old_location = ch.transform.translation;
    let mover = ctx.mover(&ch.state);
    let mut position = old_location;
    let delta = ch.velocity * dt;
    if let Some(hit) = mover.safe_move(&mut position, delta)
        && !hit.start_penetrating
    {
        mover.slide_along_surface(&mut position, delta, 1.0 - hit.fraction, &hit);
    }
    ch.transform.translation = position;

    let along_surface = ch.velocity.reject_from_normalized(surface.normal);
    if let Some(rotation) = rotation_from_forward_up(along_surface, surface.normal) {
        ch.transform.rotation = rotation;
    }
    if slide_surface(ctx, ch).is_none() {
        set_mode(ctx, ch, MovementMode::Walking, events);
    }
    if ch.state.root_motion.is_none() {
        ch.velocity = (position - old_location) / dt;
    }
}
