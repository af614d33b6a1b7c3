//! The radio as the protocol sees it: an unreliable, unordered frame pipe.

use bytes::Bytes;

/// One frame pulled off the radio.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub data: Bytes,
    /// Received signal strength in dBm, when the radio reports it.
    pub rssi: Option<i16>,
}

impl InboundFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            rssi: None,
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Opaque send/receive channel. Frames may be dropped, duplicated or
/// reordered; `send` returning `true` only means the radio took the frame.
pub trait Transport: Send {
    fn send(&mut self, frame: Bytes) -> bool;

    /// Non-blocking receive.
    fn try_receive(&mut self) -> Option<InboundFrame>;
}
