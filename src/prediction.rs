//! Client-side prediction support.
//!
//! A predicting client captures a [`SavedMove`] before every tick and keeps the ones the
//! authority has not acknowledged yet in a [`PredictionBuffer`]. When an authoritative state
//! arrives, the unacknowledged moves are replayed on top of it with [`apply_move`], which runs
//! the same [`tick`] the client predicted with.
//!
//! Only the input needed to re-run a tick travels: the acceleration, the delta time and one
//! byte of [`CompressedFlags`].

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::{
    CharacterControllerState,
    input::PendingInputFlags,
    mode::MovementMode,
    movement::{Character, Ctx, MovementEvent, tick},
    prelude::*,
};

#[derive(Clone, Debug, PartialEq, Reflect)]
pub struct PredictionSettings {
    /// Corrections up to this distance are smoothed out visually.
    pub max_smooth_net_update_dist: f32,
    /// Corrections beyond this distance teleport.
    pub no_smooth_net_update_dist: f32,
    /// Mispredictions up to this distance are not corrected at all.
    pub correction_tolerance: f32,
    /// Oldest moves are dropped past this many.
    pub max_saved_moves: usize,
    /// Two moves are only combined if their total delta time stays below this.
    pub max_combined_delta_time: f32,
    /// Minimum cosine between the accelerations of two combined moves.
    pub combine_accel_dot: f32,
    /// Maximum difference between the acceleration magnitudes of two combined moves.
    pub combine_accel_magnitude: f32,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            max_smooth_net_update_dist: 0.92,
            no_smooth_net_update_dist: 1.40,
            correction_tolerance: 0.01,
            max_saved_moves: 96,
            max_combined_delta_time: 0.125,
            combine_accel_dot: 0.996,
            combine_accel_magnitude: 0.01,
        }
    }
}

/// Input flags packed into one byte.
///
/// The low nibble holds the built-in actions, `0x10` the sprint intent. The three high bits are
/// reserved for game-specific flags and never decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
pub struct CompressedFlags(pub u8);

impl CompressedFlags {
    pub const JUMP_PRESSED: u8 = 0x01;
    pub const WANTS_TO_CROUCH: u8 = 0x02;
    pub const RESERVED_1: u8 = 0x04;
    pub const RESERVED_2: u8 = 0x08;
    pub const SPRINT: u8 = 0x10;
    pub const CUSTOM_1: u8 = 0x20;
    pub const CUSTOM_2: u8 = 0x40;
    pub const CUSTOM_3: u8 = 0x80;

    pub fn encode(flags: &PendingInputFlags) -> Self {
        let mut byte = 0;
        if flags.wants_to_jump {
            byte |= Self::JUMP_PRESSED;
        }
        if flags.wants_to_crouch {
            byte |= Self::WANTS_TO_CROUCH;
        }
        if flags.wants_to_sprint {
            byte |= Self::SPRINT;
        }
        Self(byte)
    }

    /// Writes the encoded intents into `flags`, leaving the others untouched.
    pub fn decode(self, flags: &mut PendingInputFlags) {
        flags.wants_to_jump = self.contains(Self::JUMP_PRESSED);
        flags.wants_to_crouch = self.contains(Self::WANTS_TO_CROUCH);
        flags.wants_to_sprint = self.contains(Self::SPRINT);
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// The input of one simulated tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Reflect)]
pub struct MoveStep {
    pub delta_time: f32,
    pub acceleration: Vec3,
    pub flags: PendingInputFlags,
}

impl MoveStep {
    fn prep(&self, state: &mut CharacterControllerState) {
        state.flags = self.flags;
        state.acceleration = self.acceleration;
    }
}

/// A captured client move, possibly folding several ticks into one.
#[derive(Clone, Debug, Default, PartialEq, Reflect)]
pub struct SavedMove {
    /// Client time at the end of the move.
    pub timestamp: f32,
    pub delta_time: f32,
    /// Acceleration of the most recent step.
    pub acceleration: Vec3,
    pub compressed_flags: CompressedFlags,
    pub flags: PendingInputFlags,
    pub start_mode: MovementMode,
    /// Every tick folded into this move, oldest first.
    pub steps: Vec<MoveStep>,
}

impl SavedMove {
    pub fn new(state: &CharacterControllerState, delta_time: f32, timestamp: f32) -> Self {
        let mut saved = Self::default();
        saved.set_move_for(state, delta_time, timestamp);
        saved
    }

    /// Captures the input of the tick about to run.
    pub fn set_move_for(&mut self, state: &CharacterControllerState, delta_time: f32, timestamp: f32) {
        let step = MoveStep {
            delta_time,
            acceleration: state.acceleration,
            flags: state.flags,
        };
        *self = Self {
            timestamp,
            delta_time,
            acceleration: step.acceleration,
            compressed_flags: CompressedFlags::encode(&state.flags),
            flags: state.flags,
            start_mode: state.mode,
            steps: vec![step],
        };
    }

    /// Writes the captured input back into `state` before a replay.
    ///
    /// For a combined move this restores the most recent step.
    pub fn prep_move_for(&self, state: &mut CharacterControllerState) {
        state.flags = self.flags;
        state.acceleration = self.acceleration;
    }

    fn has_one_shot(&self) -> bool {
        self.flags.wants_to_jump || self.flags.wants_to_roll || self.flags.wants_to_drop
    }

    /// Whether `next` can be folded into this move.
    pub fn can_combine_with(&self, next: &SavedMove, settings: &PredictionSettings) -> bool {
        if self.steps.is_empty() || next.steps.is_empty() {
            return false;
        }
        if self.flags != next.flags || self.compressed_flags != next.compressed_flags {
            return false;
        }
        if self.has_one_shot() || next.has_one_shot() || self.start_mode != next.start_mode {
            return false;
        }
        if self.delta_time + next.delta_time > settings.max_combined_delta_time {
            return false;
        }
        let (a, b) = (self.acceleration, next.acceleration);
        if a == Vec3::ZERO && b == Vec3::ZERO {
            return true;
        }
        let aligned = match (a.try_normalize(), b.try_normalize()) {
            (Some(a), Some(b)) => a.dot(b) >= settings.combine_accel_dot,
            _ => false,
        };
        aligned && (a.length() - b.length()).abs() <= settings.combine_accel_magnitude
    }

    pub fn combine_with(&mut self, next: SavedMove) {
        self.timestamp = next.timestamp;
        self.delta_time += next.delta_time;
        self.acceleration = next.acceleration;
        self.steps.extend(next.steps);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Replays `saved` on top of `snapshot`, one folded step at a time.
pub fn apply_move(ctx: &Ctx, snapshot: &Character, saved: &SavedMove) -> (Character, Vec<MovementEvent>) {
    let mut ch = snapshot.clone();
    let mut events = Vec::new();
    for step in &saved.steps {
        step.prep(&mut ch.state);
        tick(ctx, &mut ch, step.delta_time, &mut events);
    }
    (ch, events)
}

/// What the wire carries for one move.
#[derive(Clone, Copy, Debug, Default, PartialEq, Reflect)]
pub struct ServerMove {
    pub timestamp: f32,
    pub delta_time: f32,
    pub acceleration: Vec3,
    pub compressed_flags: CompressedFlags,
}

impl From<&SavedMove> for ServerMove {
    fn from(saved: &SavedMove) -> Self {
        Self {
            timestamp: saved.timestamp,
            delta_time: saved.delta_time,
            acceleration: saved.acceleration,
            compressed_flags: saved.compressed_flags,
        }
    }
}

/// Runs a client move on the authority.
pub fn server_move(ctx: &Ctx, ch: &mut Character, server_move: &ServerMove, events: &mut Vec<MovementEvent>) {
    server_move.compressed_flags.decode(&mut ch.state.flags);
    ch.state.acceleration = server_move.acceleration;
    tick(ctx, ch, server_move.delta_time, events);
}

/// The authority side of [`MovementEvent::ServerEnterRoll`]: the roll starts on its next tick.
pub fn server_enter_roll(state: &mut CharacterControllerState) {
    state.flags.wants_to_roll = true;
}

/// How far a misprediction was and how it should be presented.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Correction {
    None,
    /// Blend the visuals away from `offset`, the predicted minus the corrected position.
    Smooth { offset: Vec3 },
    Snap,
}

impl Correction {
    pub fn classify(error: Vec3, settings: &PredictionSettings) -> Self {
        let distance = error.length();
        if distance <= settings.correction_tolerance {
            Self::None
        } else if distance > settings.no_smooth_net_update_dist {
            Self::Snap
        } else {
            Self::Smooth {
                offset: error.clamp_length_max(settings.max_smooth_net_update_dist),
            }
        }
    }
}

/// Result of [`PredictionBuffer::reconcile`].
#[derive(Clone, Debug)]
pub struct Reconciled {
    /// The authoritative state with every unacknowledged move replayed on top.
    pub character: Character,
    pub correction: Correction,
    pub events: Vec<MovementEvent>,
}

/// Moves predicted by this client and not yet acknowledged by the authority.
#[derive(Component, Clone, Debug, Default, Reflect)]
#[reflect(Component)]
pub struct PredictionBuffer {
    moves: VecDeque<SavedMove>,
}

impl PredictionBuffer {
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn moves(&self) -> impl Iterator<Item = &SavedMove> {
        self.moves.iter()
    }

    /// Appends `saved`, folding it into the newest move when they can be combined.
    pub fn push(&mut self, saved: SavedMove, settings: &PredictionSettings) {
        if let Some(last) = self.moves.back_mut()
            && last.can_combine_with(&saved, settings)
        {
            last.combine_with(saved);
            return;
        }
        self.moves.push_back(saved);
        while self.moves.len() > settings.max_saved_moves.max(1) {
            if let Some(dropped) = self.moves.pop_front() {
                warn!(timestamp = dropped.timestamp, "prediction buffer full, dropping the oldest move");
            }
        }
    }

    /// Forgets every move up to and including `timestamp`.
    pub fn acknowledge(&mut self, timestamp: f32) {
        while self.moves.front().is_some_and(|saved| saved.timestamp <= timestamp) {
            self.moves.pop_front();
        }
    }

    /// Rebuilds the present from an authoritative state valid at `timestamp`.
    ///
    /// `predicted` is the state the client currently shows; the correction compares it with the
    /// replayed one.
    pub fn reconcile(
        &mut self,
        ctx: &Ctx,
        authoritative: &Character,
        timestamp: f32,
        predicted: &Character,
    ) -> Reconciled {
        self.acknowledge(timestamp);
        let mut character = authoritative.clone();
        let mut events = Vec::new();
        for saved in &self.moves {
            let (replayed, replay_events) = apply_move(ctx, &character, saved);
            character = replayed;
            events.extend(replay_events);
        }
        let error = predicted.transform.translation - character.transform.translation;
        let correction = Correction::classify(error, &ctx.cfg.prediction);
        trace!(replayed = self.moves.len(), ?correction, "reconciled");
        Reconciled {
            character,
            correction,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CharacterController,
        movement::tests::{DT, flat_world, standing},
    };

    #[test]
    fn flags_encode_into_their_bits() {
        let flags = PendingInputFlags {
            wants_to_sprint: true,
            wants_to_crouch: true,
            ..default()
        };
        let byte = CompressedFlags::encode(&flags);
        assert_eq!(byte.0, CompressedFlags::SPRINT | CompressedFlags::WANTS_TO_CROUCH);

        let mut decoded = PendingInputFlags {
            wants_to_roll: true,
            ..default()
        };
        byte.decode(&mut decoded);
        assert!(decoded.wants_to_sprint && decoded.wants_to_crouch && !decoded.wants_to_jump);
        assert!(decoded.wants_to_roll);
    }

    #[test]
    fn encoded_flags_decode_to_the_same_intents() {
        for sprint in [false, true] {
            for crouch in [false, true] {
                for jump in [false, true] {
                    let flags = PendingInputFlags {
                        wants_to_sprint: sprint,
                        wants_to_crouch: crouch,
                        wants_to_jump: jump,
                        ..default()
                    };
                    let mut decoded = PendingInputFlags::default();
                    CompressedFlags::encode(&flags).decode(&mut decoded);
                    assert_eq!(decoded, flags);
                }
            }
        }
    }

    #[test]
    fn custom_bits_are_ignored_on_decode() {
        let mut flags = PendingInputFlags::default();
        CompressedFlags(CompressedFlags::CUSTOM_1 | CompressedFlags::CUSTOM_3 | CompressedFlags::RESERVED_1)
            .decode(&mut flags);
        assert_eq!(flags, PendingInputFlags::default());
    }

    fn capture(ch: &Character, timestamp: f32) -> SavedMove {
        SavedMove::new(&ch.state, DT, timestamp)
    }

    #[test]
    fn capture_and_prep_round_trip_the_input() {
        let mut state = CharacterControllerState::default();
        state.acceleration = Vec3::X * 3.0;
        state.flags.wants_to_sprint = true;
        state.flags.previous_wants_to_crouch = true;
        let saved = SavedMove::new(&state, DT, 1.0);

        let mut replayed = CharacterControllerState::default();
        saved.prep_move_for(&mut replayed);
        assert_eq!(replayed.flags, state.flags);
        assert_eq!(replayed.acceleration, state.acceleration);
    }

    #[test]
    fn combined_moves_replay_like_separate_ones() {
        let world = flat_world();
        let cfg = CharacterController::default();
        let ctx = Ctx::new(&cfg, world.env());
        let mut start = standing(&cfg, 0.0, 0.0, 0.0);
        start.state.acceleration = Vec3::new(0.6, 0.0, -0.8) * cfg.max_acceleration;
        start.state.flags.wants_to_sprint = true;

        let first = capture(&start, DT);
        let (after_first, _) = apply_move(&ctx, &start, &first);
        let second = capture(&after_first, 2.0 * DT);
        let (separate, _) = apply_move(&ctx, &after_first, &second);

        let mut combined = first.clone();
        assert!(combined.can_combine_with(&second, &cfg.prediction));
        combined.combine_with(second);
        assert_eq!(combined.steps.len(), 2);
        assert!((combined.delta_time - 2.0 * DT).abs() < 1.0e-6);
        let (together, _) = apply_move(&ctx, &start, &combined);

        assert_eq!(together.transform, separate.transform);
        assert_eq!(together.velocity, separate.velocity);
        assert_eq!(together.state.mode, separate.state.mode);
    }

    #[test]
    fn moves_with_different_intents_do_not_combine() {
        let settings = PredictionSettings::default();
        let mut state = CharacterControllerState::default();
        let first = SavedMove::new(&state, DT, DT);

        state.flags.wants_to_sprint = true;
        assert!(!first.can_combine_with(&SavedMove::new(&state, DT, 2.0 * DT), &settings));

        state.flags.wants_to_sprint = false;
        state.flags.wants_to_jump = true;
        assert!(!first.can_combine_with(&SavedMove::new(&state, DT, 2.0 * DT), &settings));

        state.flags.wants_to_jump = false;
        state.acceleration = Vec3::X;
        assert!(!first.can_combine_with(&SavedMove::new(&state, DT, 2.0 * DT), &settings));

        state.acceleration = Vec3::ZERO;
        let long = SavedMove::new(&state, 0.12, 2.0 * DT);
        assert!(!first.can_combine_with(&long, &settings));
        assert!(first.can_combine_with(&SavedMove::new(&state, DT, 2.0 * DT), &settings));
    }

    #[test]
    fn buffer_combines_acknowledges_and_caps() {
        let settings = PredictionSettings {
            max_saved_moves: 3,
            ..default()
        };
        let mut state = CharacterControllerState::default();
        let mut buffer = PredictionBuffer::default();
        buffer.push(SavedMove::new(&state, DT, DT), &settings);
        buffer.push(SavedMove::new(&state, DT, 2.0 * DT), &settings);
        assert_eq!(buffer.len(), 1);

        state.flags.wants_to_jump = true;
        for i in 3..8 {
            buffer.push(SavedMove::new(&state, DT, i as f32 * DT), &settings);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.moves().next().map(|saved| saved.timestamp), Some(5.0 * DT));

        buffer.acknowledge(6.0 * DT);
        assert_eq!(buffer.len(), 1);
        buffer.acknowledge(10.0);
        assert!(buffer.is_empty());
    }

    /// Predicts `ticks` walking moves from `start`, filling `buffer`.
    fn predict(ctx: &Ctx, start: &Character, ticks: usize, buffer: &mut PredictionBuffer) -> Character {
        let mut ch = start.clone();
        for i in 0..ticks {
            let saved = capture(&ch, (i + 1) as f32 * DT);
            (ch, _) = apply_move(ctx, &ch, &saved);
            buffer.push(saved, &ctx.cfg.prediction);
        }
        ch
    }

    #[test]
    fn reconcile_replays_unacknowledged_moves() {
        let world = flat_world();
        let cfg = CharacterController::default();
        let ctx = Ctx::new(&cfg, world.env());
        let mut start = standing(&cfg, 0.0, 0.0, 0.0);
        start.state.acceleration = Vec3::NEG_Z * cfg.max_acceleration;
        let mut buffer = PredictionBuffer::default();
        let predicted = predict(&ctx, &start, 12, &mut buffer);
        assert!(!buffer.is_empty());

        // The authority agrees with the prediction so far.
        let reconciled = buffer.reconcile(&ctx, &start, 0.0, &predicted);
        assert_eq!(reconciled.correction, Correction::None);
        assert!(
            reconciled
                .character
                .transform
                .translation
                .abs_diff_eq(predicted.transform.translation, 1.0e-4)
        );

        // The authority saw the character half a meter to the side.
        let mut moved = start.clone();
        moved.transform.translation.x += 0.5;
        let reconciled = buffer.reconcile(&ctx, &moved, 0.0, &predicted);
        let Correction::Smooth { offset } = reconciled.correction else {
            panic!("expected a smooth correction, got {:?}", reconciled.correction);
        };
        assert!((offset.x + 0.5).abs() < 1.0e-3);

        let mut far = start.clone();
        far.transform.translation.x += 3.0;
        let reconciled = buffer.reconcile(&ctx, &far, 0.0, &predicted);
        assert_eq!(reconciled.correction, Correction::Snap);
    }

    #[test]
    fn smoothing_offset_is_clamped() {
        let settings = PredictionSettings::default();
        let Correction::Smooth { offset } = Correction::classify(Vec3::X * 1.2, &settings) else {
            panic!("expected a smooth correction");
        };
        assert!((offset.length() - settings.max_smooth_net_update_dist).abs() < 1.0e-5);
        assert_eq!(Correction::classify(Vec3::X * 0.001, &settings), Correction::None);
        assert_eq!(Correction::classify(Vec3::X * 2.0, &settings), Correction::Snap);
    }

    #[test]
    fn server_applies_decoded_input_and_roll_requests() {
        let world = flat_world();
        let cfg = CharacterController::default();
        let ctx = Ctx::new(&cfg, world.env());
        let mut client = standing(&cfg, 0.0, 0.0, 0.0);
        client.state.acceleration = Vec3::NEG_Z * cfg.max_acceleration;
        client.state.flags.wants_to_sprint = true;
        let saved = capture(&client, DT);

        let mut server = standing(&cfg, 0.0, 0.0, 0.0);
        let mut events = Vec::new();
        server_move(&ctx, &mut server, &ServerMove::from(&saved), &mut events);
        assert!(server.state.flags.wants_to_sprint);
        assert!(server.velocity.z < 0.0);

        server_enter_roll(&mut server.state);
        server_move(&ctx, &mut server, &ServerMove::from(&saved), &mut events);
        assert_eq!(server.state.mode, MovementMode::ROLL);
    }
}
