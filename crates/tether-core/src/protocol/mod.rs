//! Protocol module containing the reserved control-byte framing.

pub mod control;

pub use control::{classify_device_payload, state_frame, DevicePayload, STATE_COMMAND_BYTE};
