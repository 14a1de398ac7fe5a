//! Mutually exclusive gameplay behaviors layered over the movement modes.
//!
//! An [`AbilitySystem`] runs the highest-priority ready [`Ability`] each tick. Abilities only
//! tune the movement core through [`LocomotionTuning`]; mode changes stay with the core.

use core::fmt;

use bevy_ecs::{intern::Interned, schedule::ScheduleLabel};
use tracing::debug;

use crate::{CharacterControllerState, ClamberSystems, input::AccumulatedInput, mode::MovementMode, prelude::*};

pub(super) fn plugin(schedule: Interned<dyn ScheduleLabel>) -> impl Fn(&mut App) {
    move |app: &mut App| {
        app.add_systems(schedule, run_abilities.in_set(ClamberSystems::Abilities));
    }
}

/// Knobs abilities turn on the movement core.
#[derive(Clone, Debug, PartialEq, Reflect)]
pub struct LocomotionTuning {
    /// Overrides [`CharacterController::max_walk_speed`](crate::CharacterController::max_walk_speed).
    pub max_walk_speed: Option<f32>,
    /// Turn toward the movement direction while walking or swimming.
    pub orient_rotation_to_movement: bool,
}

impl Default for LocomotionTuning {
    fn default() -> Self {
        Self {
            max_walk_speed: None,
            orient_rotation_to_movement: true,
        }
    }
}

/// What an ability sees and may change.
pub struct AbilityCtx<'a> {
    pub mode: MovementMode,
    pub sprinting: bool,
    pub walking: bool,
    pub tuning: &'a mut LocomotionTuning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbilityStatus {
    Running,
    /// Stop this ability; the next tick picks a new one.
    Finished,
}

pub trait Ability: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Higher wins. Ties keep the ability found first.
    fn priority(&self) -> i32 {
        0
    }

    fn ready(&self, ctx: &AbilityCtx) -> bool;

    fn enter(&mut self, _ctx: &mut AbilityCtx) {}

    fn update(&mut self, _ctx: &mut AbilityCtx, _dt: f32) -> AbilityStatus {
        AbilityStatus::Running
    }

    fn exit(&mut self, _ctx: &mut AbilityCtx) {}
}

/// Picks walking or jogging speed. Always ready.
#[derive(Clone, Debug, PartialEq)]
pub struct Locomotion {
    pub walk_speed: f32,
    pub jog_speed: f32,
}

impl Default for Locomotion {
    fn default() -> Self {
        Self {
            walk_speed: 2.3,
            jog_speed: 5.0,
        }
    }
}

impl Ability for Locomotion {
    fn name(&self) -> &'static str {
        "locomotion"
    }

    fn ready(&self, _ctx: &AbilityCtx) -> bool {
        true
    }

    fn enter(&mut self, ctx: &mut AbilityCtx) {
        ctx.tuning.max_walk_speed = Some(self.jog_speed);
    }

    fn update(&mut self, ctx: &mut AbilityCtx, _dt: f32) -> AbilityStatus {
        // Sprinting is resolved by the movement core from the input flags.
        let speed = if ctx.walking && !ctx.sprinting {
            self.walk_speed
        } else {
            self.jog_speed
        };
        ctx.tuning.max_walk_speed = Some(speed);
        AbilityStatus::Running
    }
}

/// Active while falling. Keeps the character from turning toward its input in the air.
#[derive(Clone, Debug, PartialEq)]
pub struct Airborne {
    pub priority: i32,
    cached_orient: Option<bool>,
}

impl Default for Airborne {
    fn default() -> Self {
        Self {
            priority: 10,
            cached_orient: None,
        }
    }
}

impl Ability for Airborne {
    fn name(&self) -> &'static str {
        "airborne"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn ready(&self, ctx: &AbilityCtx) -> bool {
        ctx.mode.is_falling()
    }

    fn enter(&mut self, ctx: &mut AbilityCtx) {
        self.cached_orient = Some(ctx.tuning.orient_rotation_to_movement);
        ctx.tuning.orient_rotation_to_movement = false;
    }

    fn update(&mut self, ctx: &mut AbilityCtx, _dt: f32) -> AbilityStatus {
        if ctx.mode.is_falling() {
            AbilityStatus::Running
        } else {
            AbilityStatus::Finished
        }
    }

    fn exit(&mut self, ctx: &mut AbilityCtx) {
        if let Some(orient) = self.cached_orient.take() {
            ctx.tuning.orient_rotation_to_movement = orient;
        }
    }
}

/// Priority-ordered selector over a character's abilities.
#[derive(Component)]
pub struct AbilitySystem {
    abilities: Vec<Box<dyn Ability>>,
    active: Option<usize>,
}

impl Default for AbilitySystem {
    fn default() -> Self {
        Self::empty()
            .with(Locomotion::default())
            .with(Airborne::default())
    }
}

impl fmt::Debug for AbilitySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbilitySystem")
            .field(
                "abilities",
                &self.abilities.iter().map(|ability| ability.name()).collect::<Vec<_>>(),
            )
            .field("active", &self.active_name())
            .finish()
    }
}

impl AbilitySystem {
    pub fn empty() -> Self {
        Self {
            abilities: Vec::new(),
            active: None,
        }
    }

    pub fn with(mut self, ability: impl Ability) -> Self {
        self.abilities.push(Box::new(ability));
        self
    }

    pub fn active_name(&self) -> Option<&'static str> {
        self.active.map(|index| self.abilities[index].name())
    }

    /// Switches to the best ready ability, then updates the active one.
    pub fn tick(&mut self, ctx: &mut AbilityCtx, dt: f32) {
        let mut next = self.active;
        for (index, ability) in self.abilities.iter().enumerate() {
            if !ability.ready(ctx) {
                continue;
            }
            match next {
                Some(best) if ability.priority() <= self.abilities[best].priority() => {}
                _ => next = Some(index),
            }
        }
        if next != self.active
            && let Some(index) = next
        {
            self.stop_active(ctx);
            self.active = Some(index);
            self.abilities[index].enter(ctx);
            debug!(ability = self.abilities[index].name(), "ability started");
        }

        let Some(index) = self.active else {
            return;
        };
        if self.abilities[index].update(ctx, dt) == AbilityStatus::Finished {
            self.stop_active(ctx);
        }
    }

    pub fn stop_active(&mut self, ctx: &mut AbilityCtx) {
        if let Some(index) = self.active.take() {
            debug!(ability = self.abilities[index].name(), "ability stopped");
            self.abilities[index].exit(ctx);
        }
    }
}

fn run_abilities(
    time: Res<Time>,
    mut characters: Query<(&mut AbilitySystem, &mut CharacterControllerState, &AccumulatedInput)>,
) {
    let dt = time.delta_secs();
    for (mut abilities, mut state, input) in &mut characters {
        let state = &mut *state;
        let mut ctx = AbilityCtx {
            mode: state.mode,
            sprinting: state.flags.wants_to_sprint,
            walking: input.walking,
            tuning: &mut state.locomotion,
        };
        abilities.tick(&mut ctx, dt);
    }
}

/// A state driven by explicit transitions, see [`StateMachine`].
pub trait State: Send + Sync + 'static {
    fn enter(&mut self, ctx: &mut AbilityCtx);
    fn tick(&mut self, ctx: &mut AbilityCtx, dt: f32);
    fn exit(&mut self, ctx: &mut AbilityCtx);
}

impl<A: Ability> State for A {
    fn enter(&mut self, ctx: &mut AbilityCtx) {
        Ability::enter(self, ctx);
    }

    fn tick(&mut self, ctx: &mut AbilityCtx, dt: f32) {
        self.update(ctx, dt);
    }

    fn exit(&mut self, ctx: &mut AbilityCtx) {
        Ability::exit(self, ctx);
    }
}

/// Keyed states switched by the caller rather than by readiness.
pub struct StateMachine<K> {
    states: Vec<(K, Box<dyn State>)>,
    current: Option<usize>,
}

impl<K> Default for StateMachine<K> {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            current: None,
        }
    }
}

impl<K: PartialEq + fmt::Debug> StateMachine<K> {
    pub fn with(mut self, id: K, state: impl State) -> Self {
        self.states.push((id, Box::new(state)));
        self
    }

    pub fn current(&self) -> Option<&K> {
        self.current.map(|index| &self.states[index].0)
    }

    /// Exits the current state and enters `id`. Unknown ids are ignored.
    pub fn set_state(&mut self, id: &K, ctx: &mut AbilityCtx) -> bool {
        let Some(index) = self.states.iter().position(|(key, _)| key == id) else {
            return false;
        };
        if let Some(current) = self.current.take() {
            self.states[current].1.exit(ctx);
        }
        debug!(state = ?id, "state entered");
        self.current = Some(index);
        self.states[index].1.enter(ctx);
        true
    }

    pub fn tick(&mut self, ctx: &mut AbilityCtx, dt: f32) {
        if let Some(index) = self.current {
            self.states[index].1.tick(ctx, dt);
        }
    }
}
