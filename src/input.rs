use bevy_time::Stopwatch;

use crate::prelude::*;

pub(super) fn plugin(app: &mut App) {
    app.init_resource::<DidFixedTimestepRunThisFrame>()
        .add_observer(apply_movement)
        .add_observer(apply_jump)
        .add_observer(press_crouch)
        .add_observer(release_crouch)
        .add_observer(press_sprint)
        .add_observer(release_sprint)
        .add_observer(press_walk)
        .add_observer(release_walk)
        .add_observer(apply_roll)
        .add_observer(apply_drop_climb)
        .add_systems(
            PreUpdate,
            (
                clear_fixed_timestep_flag,
                tick_timers.in_set(EnhancedInputSystems::Update),
            ),
        )
        .add_systems(FixedPreUpdate, set_fixed_timestep_flag)
        .add_systems(
            RunFixedMainLoop,
            clear_accumulated_input
                .run_if(did_fixed_timestep_run_this_frame)
                .in_set(RunFixedMainLoopSystems::AfterFixedMainLoop),
        );
}

#[derive(Debug, InputAction)]
#[action_output(Vec2)]
pub struct Movement;

#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Jump;

#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Crouch;

#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Sprint;

/// Held to move at walking speed instead of jogging.
#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Walk;

#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct Roll;

/// Lets go of the ledge while hanging.
#[derive(Debug, InputAction)]
#[action_output(bool)]
pub struct DropClimb;

/// Entity whose orientation turns the 2D movement input into a world direction, usually the
/// camera. Without it, the character's own orientation is used.
#[derive(Component, Clone, Copy, Reflect, Debug, Deref, DerefMut)]
#[reflect(Component)]
pub struct MovementBasis(pub Entity);

/// Intents the movement core reads every tick.
///
/// Roll, jump and drop are one-shots: the tick that acts on them clears them, and a request
/// that can't be honored is dropped.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Reflect, Debug)]
pub struct PendingInputFlags {
    pub wants_to_sprint: bool,
    pub wants_to_roll: bool,
    pub wants_to_crouch: bool,
    /// `wants_to_crouch` at the end of the previous tick.
    pub previous_wants_to_crouch: bool,
    pub wants_to_jump: bool,
    pub wants_to_drop: bool,
}

/// Input accumulated since the last fixed update loop.
#[derive(Component, Clone, Reflect, Default, Debug)]
#[reflect(Component)]
pub struct AccumulatedInput {
    // The last non-zero move that was input since the last fixed update loop
    pub last_movement: Option<Vec2>,
    // Time since the last jump input. Will be `None` once the jump was processed.
    pub jumped: Option<Stopwatch>,
    // Latest crouch press (`true`) or release (`false`) not yet seen by the movement core
    pub crouch: Option<bool>,
    pub sprinting: bool,
    pub walking: bool,
    pub rolled: bool,
    pub dropped: bool,
}

fn apply_movement(movement: On<Fire<Movement>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(movement.context) {
        input.last_movement = Some(movement.value);
    }
}

fn apply_jump(jump: On<Start<Jump>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(jump.context) {
        input.jumped = Some(Stopwatch::new());
    }
}

fn press_crouch(crouch: On<Start<Crouch>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(crouch.context) {
        input.crouch = Some(true);
    }
}

fn release_crouch(crouch: On<Complete<Crouch>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(crouch.context) {
        input.crouch = Some(false);
    }
}

fn press_sprint(sprint: On<Start<Sprint>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(sprint.context) {
        input.sprinting = true;
    }
}

fn release_sprint(sprint: On<Complete<Sprint>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(sprint.context) {
        input.sprinting = false;
    }
}

fn press_walk(walk: On<Start<Walk>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(walk.context) {
        input.walking = true;
    }
}

fn release_walk(walk: On<Complete<Walk>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(walk.context) {
        input.walking = false;
    }
}

fn apply_roll(roll: On<Start<Roll>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(roll.context) {
        input.rolled = true;
    }
}

fn apply_drop_climb(drop: On<Start<DropClimb>>, mut inputs: Query<&mut AccumulatedInput>) {
    if let Ok(mut input) = inputs.get_mut(drop.context) {
        input.dropped = true;
    }
}

fn clear_accumulated_input(mut inputs: Query<&mut AccumulatedInput>) {
    for mut input in &mut inputs {
        input.last_movement = None;
    }
}

fn tick_timers(mut inputs: Query<&mut AccumulatedInput>, time: Res<Time>) {
    for mut input in &mut inputs {
        if let Some(jumped) = input.jumped.as_mut() {
            jumped.tick(time.delta());
        }
    }
}

/// Whether the fixed timestep ran this frame.
#[derive(Resource, Debug, Deref, DerefMut, Default)]
pub(crate) struct DidFixedTimestepRunThisFrame(bool);

fn clear_fixed_timestep_flag(mut did_run: ResMut<DidFixedTimestepRunThisFrame>) {
    did_run.0 = false;
}

fn set_fixed_timestep_flag(mut did_run: ResMut<DidFixedTimestepRunThisFrame>) {
    did_run.0 = true;
}

pub(crate) fn did_fixed_timestep_run_this_frame(did_run: Res<DidFixedTimestepRunThisFrame>) -> bool {
    did_run.0
}
