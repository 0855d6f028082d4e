//! Inbound frame decoding for the earbud serial link.
//!
//! The transport is a byte stream with no message boundaries: one read may
//! carry a partial frame or several frames back to back. `FrameDecoder`
//! accumulates bytes and yields complete frames; `interpret` maps a decoded
//! frame to a typed event.

use log::debug;
use smol_str::SmolStr;

use crate::{
   buds::protocol::{
      Frame, HEADER_LEN, OP_EARBUD_FUNCTION, OP_GAME_MODE, OP_PAIR, OP_SOUND_PROFILE,
      OP_SPATIAL_AUDIO, Packet,
   },
   error::{BudsError, Result},
};

/// Streaming decoder over an accumulating buffer.
///
/// Trailing bytes after a complete frame stay buffered for the next call,
/// so a single read carrying two frames yields both.
#[derive(Debug, Default)]
pub struct FrameDecoder {
   buf: Vec<u8>,
}

impl FrameDecoder {
   pub fn new() -> Self {
      Self::default()
   }

   /// Appends freshly read bytes to the buffer.
   pub fn extend(&mut self, bytes: &[u8]) {
      self.buf.extend_from_slice(bytes);
   }

   #[cfg(test)]
   fn buffered(&self) -> usize {
      self.buf.len()
   }

   /// Attempts to decode the next frame.
   ///
   /// Returns `Ok(None)` until the 5-byte header and the full declared
   /// payload are buffered. A nonzero reserved nibble in byte 0 is
   /// `Malformed`; the buffer is discarded on malformed input since there
   /// is no way to resynchronize within a corrupted stream.
   pub fn next_frame(&mut self) -> Result<Option<Frame>> {
      if self.buf.len() < HEADER_LEN {
         return Ok(None);
      }
      if self.buf[0] & 0xf0 != 0 {
         self.buf.clear();
         return Err(BudsError::Malformed {
            reason: "reserved bits set in sequence byte",
         });
      }
      let payload_len = self.buf[4] as usize;
      let total = HEADER_LEN + payload_len;
      if self.buf.len() < total {
         return Ok(None);
      }

      let frame = Frame {
         sequence: self.buf[0] & 0x0f,
         opcode: self.buf[1],
         client_id: [self.buf[2], self.buf[3]],
         payload: Packet::from_slice(&self.buf[HEADER_LEN..total]),
      };
      self.buf.drain(..total);
      Ok(Some(frame))
   }
}

/// Battery percentages reported during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryLevels {
   pub left: u8,
   pub right: u8,
   pub case: u8,
}

/// Device details learned when the handshake completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMetadata {
   pub name: SmolStr,
   pub battery: BatteryLevels,
}

// Offsets inside a metadata-bearing pairing ack payload.
const BATTERY_OFFSET: usize = 2;
const NAME_LEN_OFFSET: usize = 12;

/// Parses the metadata-bearing pairing ack payload.
///
/// Layout (from a captured handshake): battery percentages for left, right,
/// and case at offsets 2..5, then a length-prefixed UTF-8 device name at
/// offset 12. The meaning of the remaining bytes is unconfirmed and they
/// are left alone.
pub fn parse_pair_metadata(payload: &[u8]) -> Result<DeviceMetadata> {
   const MALFORMED: BudsError = BudsError::Malformed {
      reason: "pairing metadata payload too short",
   };

   if payload.len() <= NAME_LEN_OFFSET {
      return Err(MALFORMED);
   }
   let battery = BatteryLevels {
      left: payload[BATTERY_OFFSET],
      right: payload[BATTERY_OFFSET + 1],
      case: payload[BATTERY_OFFSET + 2],
   };
   let name_len = payload[NAME_LEN_OFFSET] as usize;
   let name_bytes = payload
      .get(NAME_LEN_OFFSET + 1..NAME_LEN_OFFSET + 1 + name_len)
      .ok_or(MALFORMED)?;
   let name = str::from_utf8(name_bytes).map_err(|_| BudsError::Malformed {
      reason: "device name is not valid UTF-8",
   })?;
   Ok(DeviceMetadata {
      name: name.into(),
      battery,
   })
}

/// Typed view of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalEvent {
   /// Ack for a handshake step; carries metadata when the payload holds it.
   PairingAck { metadata: Option<DeviceMetadata> },
   /// Ack for a feature command.
   Ack { opcode: u8 },
   /// Undocumented telemetry; informational only, never fatal.
   Unrecognized { opcode: u8 },
}

/// Maps an inbound frame to a logical event.
///
/// The device emits vendor telemetry outside the documented surface;
/// unknown opcodes are reported, not rejected.
pub fn interpret(frame: &Frame) -> LogicalEvent {
   match frame.opcode {
      OP_PAIR => LogicalEvent::PairingAck {
         metadata: parse_pair_metadata(&frame.payload).ok(),
      },
      OP_GAME_MODE | OP_SPATIAL_AUDIO | OP_EARBUD_FUNCTION | OP_SOUND_PROFILE => {
         LogicalEvent::Ack {
            opcode: frame.opcode,
         }
      },
      opcode => {
         debug!("Unrecognized frame: {}", hex::encode(&frame.payload));
         LogicalEvent::Unrecognized { opcode }
      },
   }
}
