//! Earbud protocol engine.
//!
//! Frame codec, sequence discipline, pairing state machine, and
//! command/response dispatch for the device's binary serial protocol.

pub mod codec;
pub mod protocol;
pub mod session;
