//! Bluetooth transport layer.

pub mod rfcomm;
