//! Protocol definitions for the earbud serial link.
//!
//! This module contains the wire constants captured from the vendor app's
//! traffic, the closed preset/side/toggle enums, frame encoding, and the
//! registry that maps logical commands to their wire frames.

use smallvec::SmallVec;

use crate::error::{BudsError, Result};

/// Packet buffer type; most frames fit inline.
pub type Packet = SmallVec<[u8; 32]>;

/// Fixed frame header length: sequence, opcode, client id (2), payload length.
pub const HEADER_LEN: usize = 5;
/// Largest payload expressible in the 1-byte length field.
pub const MAX_PAYLOAD: usize = 255;

/// Client id stamped on every outgoing frame.
pub const CLIENT_ID: [u8; 2] = [0x01, 0x00];

// Command opcodes.
pub const OP_PAIR: u8 = 0x27;
pub const OP_GAME_MODE: u8 = 0x25;
pub const OP_SPATIAL_AUDIO: u8 = 0x36;
pub const OP_EARBUD_FUNCTION: u8 = 0x22;
pub const OP_SOUND_PROFILE: u8 = 0x20;

// Fixed payloads for the three handshake frames.
pub const PAIR_0: &[u8] = &[0xff, 0x00];
pub const PAIR_1: &[u8] = &[
   0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00, 0x05, 0x00, 0x06, 0x00, 0x07, 0x00, 0x08, 0x00,
   0x09, 0x00, 0x0a, 0x00, 0x0b, 0x00, 0x0c, 0x00, 0x0d, 0x00, 0x0e, 0x00, 0x0f, 0x00, 0x10, 0x00,
   0x11, 0x00, 0x12, 0x00, 0x13, 0x00, 0x14, 0x00, 0x15, 0x00, 0x16, 0x00, 0x17, 0x00, 0x18, 0x00,
   0xfe, 0x00, 0x20, 0x00,
];
pub const PAIR_2: &[u8] = &[0x0c, 0x00];

// Two-byte tap action codes. 0x0101 and 0x0102 exist in captures but their
// meaning is unconfirmed, so they are not exposed.
const ACT_NONE: [u8; 2] = [0x01, 0x00];
const ACT_PLAY_PAUSE: [u8; 2] = [0x01, 0x07];
const ACT_PREV_TRACK: [u8; 2] = [0x01, 0x03];
const ACT_NEXT_TRACK: [u8; 2] = [0x01, 0x04];
const ACT_VOL_UP: [u8; 2] = [0x01, 0x05];
const ACT_VOL_DOWN: [u8; 2] = [0x01, 0x06];

/// Selector offsets for the single/double/triple tap slots.
const TAP_SLOTS: [u8; 3] = [0, 2, 4];

/// One step of the pairing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairStep {
   Init = 0,
   Exchange = 1,
   Confirm = 2,
}

impl PairStep {
   pub const ALL: [Self; 3] = [Self::Init, Self::Exchange, Self::Confirm];

   pub const fn index(self) -> u8 {
      self as u8
   }

   /// Fixed payload sent for this step.
   pub const fn payload(self) -> &'static [u8] {
      match self {
         Self::Init => PAIR_0,
         Self::Exchange => PAIR_1,
         Self::Confirm => PAIR_2,
      }
   }
}

/// On/off state for boolean features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum Toggle {
   #[strum(serialize = "on")]
   On = 0x01,
   #[strum(serialize = "off")]
   Off = 0x00,
}

impl Toggle {
   pub fn parse(s: &str) -> Result<Self> {
      s.parse()
         .map_err(|_| BudsError::InvalidArgument(format!("expected ON or OFF, got `{s}`")))
   }

   pub const fn byte(self) -> u8 {
      self as u8
   }
}

/// Which earbud a tap remap targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum Side {
   #[strum(serialize = "left")]
   Left = 1,
   #[strum(serialize = "right")]
   Right = 2,
}

impl Side {
   pub fn parse(s: &str) -> Result<Self> {
      s.parse()
         .map_err(|_| BudsError::InvalidArgument(format!("expected left or right, got `{s}`")))
   }

   pub const fn selector(self) -> u8 {
      self as u8
   }
}

/// Tap-function preset for one earbud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum FnPreset {
   Control,
   Volume,
   None,
}

impl FnPreset {
   pub fn parse(s: &str) -> Result<Self> {
      s.parse().map_err(|_| BudsError::UnknownPreset(s.into()))
   }

   /// Tap actions for the three tap slots (single, double, triple).
   ///
   /// `control` is side-dependent: triple tap skips backwards on the left
   /// bud and forwards on the right bud.
   pub const fn actions(self, side: Side) -> [[u8; 2]; 3] {
      match (self, side) {
         (Self::Control, Side::Left) => [ACT_NONE, ACT_PLAY_PAUSE, ACT_PREV_TRACK],
         (Self::Control, Side::Right) => [ACT_NONE, ACT_PLAY_PAUSE, ACT_NEXT_TRACK],
         (Self::Volume, _) => [ACT_VOL_DOWN, ACT_VOL_UP, ACT_NONE],
         (Self::None, _) => [ACT_NONE, ACT_NONE, ACT_NONE],
      }
   }
}

/// EQ curve preset.
///
/// The payload bytes are device-specific constants in table order; the
/// sound-profile opcode is confirmed from captures, the per-preset bytes
/// are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[repr(u8)]
pub enum EqPreset {
   Standard = 0x00,
   HeavyBass = 0x01,
   Rock = 0x02,
   Jazz = 0x03,
   Vocal = 0x04,
}

impl EqPreset {
   pub fn parse(s: &str) -> Result<Self> {
      s.parse().map_err(|_| BudsError::UnknownPreset(s.into()))
   }

   pub const fn byte(self) -> u8 {
      self as u8
   }
}

/// A parsed frame, either outbound or inbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
   pub sequence: u8,
   pub opcode: u8,
   pub client_id: [u8; 2],
   pub payload: Packet,
}

/// Encodes a frame: `[seq, opcode, client id, len, payload..]`.
///
/// The sequence occupies the low nibble of byte 0; the upper nibble is
/// reserved and sent as zero.
pub fn encode_frame(sequence: u8, opcode: u8, payload: &[u8]) -> Result<Packet> {
   if payload.len() > MAX_PAYLOAD {
      return Err(BudsError::FrameTooLarge { len: payload.len() });
   }
   let mut bytes = Packet::with_capacity(HEADER_LEN + payload.len());
   bytes.push(sequence & 0x0f);
   bytes.push(opcode);
   bytes.extend_from_slice(&CLIENT_ID);
   bytes.push(payload.len() as u8);
   bytes.extend_from_slice(payload);
   Ok(bytes)
}

/// Wrapping mod-16 counter stamped on every outgoing frame.
///
/// Fresh per session; every sent frame consumes one value, including
/// retries of the same logical command.
#[derive(Debug, Default)]
pub struct SequenceCounter(u8);

impl SequenceCounter {
   pub const fn new() -> Self {
      Self(0)
   }

   /// Returns the current value, then advances mod 16.
   pub fn next(&mut self) -> u8 {
      let value = self.0;
      self.0 = (value + 1) & 0x0f;
      value
   }
}

/// A logical request against the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
   Pair,
   SetGameMode(Toggle),
   SetSpatial(Toggle),
   SetFunction(Side, FnPreset),
   SetEqPreset(EqPreset),
}

/// The `(opcode, payload)` frames a command expands to, in send order.
pub type FrameList = SmallVec<[(u8, Packet); 3]>;

impl Command {
   /// Resolves a command to its wire frames.
   ///
   /// Toggles and EQ presets are single frames. Pairing is the three fixed
   /// handshake steps. A tap remap writes all three tap slots of the chosen
   /// bud, one frame per slot, each payload being the slot selector byte
   /// followed by the two-byte action code.
   pub fn resolve(&self) -> FrameList {
      match *self {
         Self::Pair => PairStep::ALL
            .iter()
            .map(|step| (OP_PAIR, Packet::from_slice(step.payload())))
            .collect(),
         Self::SetGameMode(state) => {
            let mut frames = FrameList::new();
            frames.push((OP_GAME_MODE, Packet::from_slice(&[state.byte()])));
            frames
         },
         Self::SetSpatial(state) => {
            let mut frames = FrameList::new();
            frames.push((OP_SPATIAL_AUDIO, Packet::from_slice(&[state.byte()])));
            frames
         },
         Self::SetFunction(side, preset) => {
            let actions = preset.actions(side);
            TAP_SLOTS
               .iter()
               .zip(actions)
               .map(|(slot, action)| {
                  let payload =
                     Packet::from_slice(&[side.selector() + slot, action[0], action[1]]);
                  (OP_EARBUD_FUNCTION, payload)
               })
               .collect()
         },
         Self::SetEqPreset(preset) => {
            let mut frames = FrameList::new();
            frames.push((OP_SOUND_PROFILE, Packet::from_slice(&[preset.byte()])));
            frames
         },
      }
   }
}
