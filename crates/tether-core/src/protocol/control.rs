//! Reserved control-byte framing shared by the relay and its peers.
//!
//! Relay payloads are opaque.  Exactly one byte value is reserved on the
//! device → client channel:
//!
//! ```text
//! Relay → client:   [0x0F, 0x00]   device offline
//!                   [0x0F, 0x01]   device online
//!
//! Device → relay:   [0x0F, ...]    liveness marker, consumed by the relay
//!                   [anything else] forwarded verbatim to every client
//! ```
//!
//! Because a device frame that starts with `0x0F` is never forwarded, the
//! only `0x0F`-prefixed frames a client can observe are the state frames built
//! by [`state_frame`].

/// First byte of every relay-originated device-state frame, and of the
/// in-band liveness marker a device may send.
pub const STATE_COMMAND_BYTE: u8 = 0x0F;

/// Builds the 2-byte device-state frame sent to clients.
///
/// ```rust
/// use tether_core::protocol::control::{state_frame, STATE_COMMAND_BYTE};
///
/// assert_eq!(state_frame(true), [STATE_COMMAND_BYTE, 1]);
/// assert_eq!(state_frame(false), [STATE_COMMAND_BYTE, 0]);
/// ```
pub fn state_frame(device_online: bool) -> [u8; 2] {
    [STATE_COMMAND_BYTE, u8::from(device_online)]
}

/// How the relay must treat one inbound device payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePayload<'a> {
    /// In-band liveness marker; feeds the heartbeat and is never forwarded.
    Liveness,
    /// Opaque content to fan out to every client unmodified.
    Relay(&'a [u8]),
}

/// Classifies a device payload by its first byte.
///
/// An empty payload has no first byte and is therefore relayed as-is.
pub fn classify_device_payload(payload: &[u8]) -> DevicePayload<'_> {
    match payload.first() {
        Some(&STATE_COMMAND_BYTE) => DevicePayload::Liveness,
        _ => DevicePayload::Relay(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_frame_online_is_command_byte_then_one() {
        assert_eq!(state_frame(true), [0x0F, 0x01]);
    }

    #[test]
    fn test_state_frame_offline_is_command_byte_then_zero() {
        assert_eq!(state_frame(false), [0x0F, 0x00]);
    }

    #[test]
    fn test_marker_byte_alone_is_liveness() {
        assert_eq!(classify_device_payload(&[0x0F]), DevicePayload::Liveness);
    }

    #[test]
    fn test_marker_byte_with_trailing_data_is_still_liveness() {
        // Anything after the marker byte is ignored; the frame is consumed.
        assert_eq!(
            classify_device_payload(&[0x0F, 0x01, 0xFF]),
            DevicePayload::Liveness
        );
    }

    #[test]
    fn test_ordinary_payload_is_relayed_unmodified() {
        let payload = [0x01, 0x02, 0x03];
        assert_eq!(
            classify_device_payload(&payload),
            DevicePayload::Relay(&[0x01, 0x02, 0x03])
        );
    }

    #[test]
    fn test_marker_byte_in_later_position_is_relayed() {
        // Only the first byte is reserved.
        let payload = [0x01, 0x0F];
        assert_eq!(
            classify_device_payload(&payload),
            DevicePayload::Relay(&[0x01, 0x0F])
        );
    }

    #[test]
    fn test_empty_payload_is_relayed() {
        assert_eq!(classify_device_payload(&[]), DevicePayload::Relay(&[]));
    }
}
