// crates/vireo-core/src/events.rs
//
// Event channel from the engine back to the host. The wire shape is fixed:
// a message type with a stable integer code plus one f32 payload, so a thin
// FFI shell can forward events without any translation table of its own.

/// Messages a player emits through its [`EventSink`].
///
/// The discriminants are part of the host contract — they must not change.
/// `code` (the f32 carried next to the message) is the frame PTS in
/// milliseconds for `DecodingTime` and 0 for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PlayerMessage {
    DecoderInitError = 0,
    DecoderReady     = 1,
    DecoderDone      = 2,
    RequestRender    = 3,
    DecodingTime     = 4,
}

impl PlayerMessage {
    /// Stable integer code handed to host callbacks.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Host-implemented event receiver.
///
/// `emit` is called from engine worker threads; implementations must be
/// cheap and must not call back into the player (the worker that emits may
/// hold its own control lock's neighborhood).
pub trait EventSink: Send + Sync {
    fn emit(&self, msg: PlayerMessage, code: f32);
}

/// Sink that drops every event. Installed by default so workers never have
/// to branch on "is a callback set".
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _msg: PlayerMessage, _code: f32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_codes_are_stable() {
        assert_eq!(PlayerMessage::DecoderInitError.code(), 0);
        assert_eq!(PlayerMessage::DecoderReady.code(), 1);
        assert_eq!(PlayerMessage::DecoderDone.code(), 2);
        assert_eq!(PlayerMessage::RequestRender.code(), 3);
        assert_eq!(PlayerMessage::DecodingTime.code(), 4);
    }
}
