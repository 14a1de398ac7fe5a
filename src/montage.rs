use crate::prelude::*;

/// One-shot animations that gate climbing transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
pub enum MontageClip {
    ClimbUp,
    HopUp,
    DropClimb,
    LeftCornerOut,
    RightCornerOut,
    ClimbJumpLeft,
    ClimbJumpRight,
}

/// Plays montages on behalf of the movement core.
pub trait MontagePlayer {
    /// Starts `clip` and returns how long it lasts, in seconds.
    fn play(&self, clip: MontageClip) -> f32;
}

/// Montage lengths used when no animation system reports them.
#[derive(Component, Clone, Copy, Debug, PartialEq, Reflect)]
#[reflect(Component)]
pub struct MontageDurations {
    pub climb_up: f32,
    pub hop_up: f32,
    pub drop_climb: f32,
    pub corner_out: f32,
    /// Sideways jump off a ledge, either direction.
    pub climb_jump: f32,
}

impl Default for MontageDurations {
    fn default() -> Self {
        Self {
            climb_up: 1.2,
            hop_up: 0.6,
            drop_climb: 0.35,
            corner_out: 0.8,
            climb_jump: 0.9,
        }
    }
}

impl MontagePlayer for MontageDurations {
    fn play(&self, clip: MontageClip) -> f32 {
        match clip {
            MontageClip::ClimbUp => self.climb_up,
            MontageClip::HopUp => self.hop_up,
            MontageClip::DropClimb => self.drop_climb,
            MontageClip::LeftCornerOut | MontageClip::RightCornerOut => self.corner_out,
            MontageClip::ClimbJumpLeft | MontageClip::ClimbJumpRight => self.climb_jump,
        }
    }
}
