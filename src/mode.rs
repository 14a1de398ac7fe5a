use thiserror::Error;

use crate::prelude::*;

/// Movement modes layered on top of the built-in ones.
///
/// The discriminants are part of the replication format and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Reflect)]
#[repr(u8)]
pub enum CustomMode {
    Slide = 1,
    Roll = 2,
    Climbing = 3,
}

impl TryFrom<u8> for CustomMode {
    type Error = InvalidModeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Slide),
            2 => Ok(Self::Roll),
            3 => Ok(Self::Climbing),
            other => Err(InvalidModeError::Custom(other)),
        }
    }
}

impl CustomMode {
    /// # Panics
    ///
    /// Panics on a value that names no custom mode.
    pub fn from_raw(value: u8) -> Self {
        match Self::try_from(value) {
            Ok(mode) => mode,
            Err(err) => panic!("invalid movement mode: {err}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Reflect)]
pub enum MovementMode {
    #[default]
    Walking,
    Falling,
    Swimming,
    Custom(CustomMode),
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum InvalidModeError {
    #[error("unknown movement mode {0}")]
    Base(u8),
    #[error("unknown custom movement mode {0}")]
    Custom(u8),
}

const RAW_WALKING: u8 = 1;
const RAW_FALLING: u8 = 2;
const RAW_SWIMMING: u8 = 3;
const RAW_CUSTOM: u8 = 4;

impl MovementMode {
    pub const SLIDE: Self = Self::Custom(CustomMode::Slide);
    pub const ROLL: Self = Self::Custom(CustomMode::Roll);
    pub const CLIMBING: Self = Self::Custom(CustomMode::Climbing);

    pub fn is_moving_on_ground(self) -> bool {
        matches!(
            self,
            Self::Walking | Self::Custom(CustomMode::Slide | CustomMode::Roll)
        )
    }

    pub fn is_falling(self) -> bool {
        self == Self::Falling
    }

    /// Wire form of the mode: a base mode byte and a custom sub-mode byte.
    pub fn to_raw(self) -> (u8, u8) {
        match self {
            Self::Walking => (RAW_WALKING, 0),
            Self::Falling => (RAW_FALLING, 0),
            Self::Swimming => (RAW_SWIMMING, 0),
            Self::Custom(custom) => (RAW_CUSTOM, custom as u8),
        }
    }

    pub fn try_from_raw(mode: u8, custom: u8) -> Result<Self, InvalidModeError> {
        match mode {
            RAW_WALKING => Ok(Self::Walking),
            RAW_FALLING => Ok(Self::Falling),
            RAW_SWIMMING => Ok(Self::Swimming),
            RAW_CUSTOM => Ok(Self::Custom(CustomMode::try_from(custom)?)),
            other => Err(InvalidModeError::Base(other)),
        }
    }

    /// Like [`Self::try_from_raw`], but an unknown value is a programming error.
    ///
    /// # Panics
    ///
    /// Panics if the pair does not name a mode.
    pub fn from_raw(mode: u8, custom: u8) -> Self {
        match Self::try_from_raw(mode, custom) {
            Ok(mode) => mode,
            Err(err) => panic!("invalid movement mode ({mode}, {custom}): {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_modes_keep_their_wire_values() {
        assert_eq!(MovementMode::SLIDE.to_raw(), (RAW_CUSTOM, 1));
        assert_eq!(MovementMode::ROLL.to_raw(), (RAW_CUSTOM, 2));
        assert_eq!(MovementMode::CLIMBING.to_raw(), (RAW_CUSTOM, 3));
        assert_eq!(MovementMode::from_raw(RAW_CUSTOM, 3), MovementMode::CLIMBING);
        assert_eq!(MovementMode::from_raw(RAW_FALLING, 0), MovementMode::Falling);
    }

    #[test]
    fn ground_modes() {
        assert!(MovementMode::Walking.is_moving_on_ground());
        assert!(MovementMode::SLIDE.is_moving_on_ground());
        assert!(MovementMode::ROLL.is_moving_on_ground());
        assert!(!MovementMode::CLIMBING.is_moving_on_ground());
        assert!(!MovementMode::Falling.is_moving_on_ground());
    }

    #[test]
    fn unknown_custom_mode_is_rejected() {
        assert_eq!(
            MovementMode::try_from_raw(RAW_CUSTOM, 9),
            Err(InvalidModeError::Custom(9))
        );
        assert_eq!(
            MovementMode::try_from_raw(42, 0),
            Err(InvalidModeError::Base(42))
        );
    }

    #[test]
    #[should_panic(expected = "invalid movement mode")]
    fn unknown_custom_mode_panics() {
        MovementMode::from_raw(RAW_CUSTOM, 0);
    }

    #[test]
    #[should_panic(expected = "invalid movement mode")]
    fn raw_custom_byte_out_of_range_panics() {
        CustomMode::from_raw(4);
    }
}
