use crate::prelude::*;

/// Which of the two launch angles reaching a target to prefer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect)]
pub enum ArcPreference {
    #[default]
    Low,
    High,
}

/// Solves for a launch velocity that carries a point mass from `start` to `target`.
pub trait BallisticSolver {
    /// `gravity` is the downward acceleration magnitude.
    /// Returns `None` when `speed` is not enough to reach the target.
    fn launch_velocity(
        &self,
        start: Vec3,
        target: Vec3,
        speed: f32,
        gravity: f32,
        arc: ArcPreference,
    ) -> Option<Vec3>;
}

/// Closed-form solver for a fixed launch speed and no drag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Reflect)]
pub struct ArcSolver;

impl BallisticSolver for ArcSolver {
    fn launch_velocity(
        &self,
        start: Vec3,
        target: Vec3,
        speed: f32,
        gravity: f32,
        arc: ArcPreference,
    ) -> Option<Vec3> {
        if speed <= 0.0 || gravity <= 0.0 {
            return None;
        }
        let delta = target - start;
        let horizontal = Vec3::new(delta.x, 0.0, delta.z);
        let x = horizontal.length();
        let y = delta.y;
        let v2 = speed * speed;

        if x < 1.0e-4 {
            // Straight up: just enough speed to reach the target height.
            let needed = (2.0 * gravity * y.max(0.0)).sqrt();
            return (needed <= speed).then_some(Vec3::Y * needed);
        }

        let discriminant = v2 * v2 - gravity * (gravity * x * x + 2.0 * y * v2);
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        let tan = match arc {
            ArcPreference::Low => (v2 - root) / (gravity * x),
            ArcPreference::High => (v2 + root) / (gravity * x),
        };
        let angle = tan.atan();
        let direction = horizontal / x;
        Some(direction * speed * angle.cos() + Vec3::Y * speed * angle.sin())
    }
}
