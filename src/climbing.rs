//! Per-character climbing session: sub-state, targets and the single pending deadline.

use tracing::debug;

use crate::{ledge::HangPose, prelude::*};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
pub enum ClimbingState {
    #[default]
    Idle,
    /// Easing into the hang pose after grabbing a ledge.
    Interpolating,
    Hanging,
    /// Ballistic flight toward another ledge, or away from one.
    Launching,
    /// Animation-driven move to a new hang pose.
    Warping,
    /// Climbing up or dropping off; ends by leaving the climbing mode.
    Leaving,
}

/// A one-shot countdown.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct Deadline {
    remaining: f32,
}

impl Deadline {
    pub fn after(seconds: f32) -> Self {
        Self { remaining: seconds }
    }

    /// Advances by `dt`. Returns `true` once the deadline has passed.
    pub fn tick(&mut self, dt: f32) -> bool {
        self.remaining -= dt;
        self.elapsed()
    }

    pub fn elapsed(&self) -> bool {
        self.remaining <= 0.0
    }

    pub fn remaining(&self) -> f32 {
        self.remaining.max(0.0)
    }
}

/// A kinematic move between two poses over a fixed duration.
#[derive(Clone, Copy, Debug, PartialEq, Reflect)]
pub struct Warp {
    pub from: HangPose,
    pub to: HangPose,
    pub duration: f32,
    pub elapsed: f32,
}

impl Warp {
    pub fn new(from: HangPose, to: HangPose, duration: f32) -> Self {
        Self {
            from,
            to,
            duration,
            elapsed: 0.0,
        }
    }

    /// Advances the warp and returns the pose for the new time.
    pub fn advance(&mut self, dt: f32) -> HangPose {
        self.elapsed += dt;
        let alpha = if self.duration <= 0.0 {
            1.0
        } else {
            (self.elapsed / self.duration).clamp(0.0, 1.0)
        };
        HangPose {
            location: self.from.location.lerp(self.to.location, alpha),
            rotation: self.from.rotation.slerp(self.to.rotation, alpha),
        }
    }
}

/// What a deadline resolves to when it elapses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeadlineOutcome {
    ExitClimbing,
    ResumeHanging,
}

#[derive(Clone, Debug, Default, PartialEq, Reflect)]
pub struct ClimbingSession {
    pub state: ClimbingState,
    /// Pose approached while [`ClimbingState::Interpolating`].
    pub target: Option<HangPose>,
    pub warp: Option<Warp>,
    /// Lateral input along the character's right axis, `[-1, 1]`.
    pub horizontal_direction: f32,
    pub can_shimmy: bool,
    /// Height of the top of the ledge currently held.
    pub ledge_height: f32,
    pub deadline: Option<Deadline>,
}

impl ClimbingSession {
    pub fn interpolating(target: HangPose, ledge_height: f32) -> Self {
        Self {
            state: ClimbingState::Interpolating,
            target: Some(target),
            can_shimmy: true,
            ledge_height,
            ..default()
        }
    }

    pub fn set_state(&mut self, state: ClimbingState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "climbing state");
            self.state = state;
        }
    }

    /// Enters `state` until `seconds` from now.
    pub fn arm(&mut self, seconds: f32, state: ClimbingState) {
        self.deadline = Some(Deadline::after(seconds));
        self.set_state(state);
    }

    /// Ticks the deadline and reports what it resolves to, once.
    pub fn tick_deadline(&mut self, dt: f32) -> Option<DeadlineOutcome> {
        let deadline = self.deadline.as_mut()?;
        if !deadline.tick(dt) {
            return None;
        }
        self.deadline = None;
        match self.state {
            ClimbingState::Leaving | ClimbingState::Launching => Some(DeadlineOutcome::ExitClimbing),
            ClimbingState::Warping => {
                self.set_state(ClimbingState::Hanging);
                Some(DeadlineOutcome::ResumeHanging)
            }
            ClimbingState::Idle | ClimbingState::Interpolating | ClimbingState::Hanging => None,
        }
    }

    /// Freezes in place at the end of a ledge.
    pub fn stop_shimmy(&mut self) {
        self.horizontal_direction = 0.0;
        self.can_shimmy = false;
    }
}
