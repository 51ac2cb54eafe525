//! Events reported out of the real-time context
//!
//! The period callback never logs. It posts small `Copy` values into a
//! bounded channel with `try_send`; when the queue is full the event is
//! dropped. The main task drains and logs them.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;

use super::role::Direction;
use crate::error::PacketError;
use crate::protocol::ConfigPacket;

/// Something the period loop wants the outside world to know
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A channel dropped; audio is paused
    Paused,
    /// Both audio channels are open again
    Resumed,
    /// Ports were rebuilt for new channel counts
    Reconfigured { play: usize, record: usize },
    /// Peer runs a different period size (not corrected)
    PeriodMismatch { local: u32, remote: u32 },
    /// Peer runs a different sample rate (not corrected)
    SampleRateMismatch { local: u32, remote: u32 },
    /// A control packet failed framing and was discarded
    MalformedPacket(PacketError),
    /// Client asked the server for its config
    QuerySent,
    /// Server pushed its config
    ConfigSent(ConfigPacket),
    /// The engine refused a port
    PortUnavailable { direction: Direction, index: usize },
}

impl fmt::Display for BridgeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeEvent::Paused => write!(f, "Paused: audio channel closed"),
            BridgeEvent::Resumed => write!(f, "Resumed"),
            BridgeEvent::Reconfigured { play, record } => {
                write!(f, "Reconfigured: {} playback, {} record channels", play, record)
            }
            BridgeEvent::PeriodMismatch { local, remote } => write!(
                f,
                "Period size mismatch: local {} frames, peer {} frames",
                local, remote
            ),
            BridgeEvent::SampleRateMismatch { local, remote } => write!(
                f,
                "Sample rate mismatch: local {} Hz, peer {} Hz",
                local, remote
            ),
            BridgeEvent::MalformedPacket(e) => write!(f, "Discarded control packet: {}", e),
            BridgeEvent::QuerySent => write!(f, "Queried peer config"),
            BridgeEvent::ConfigSent(p) => write!(
                f,
                "Sent config: {} playback, {} record, {} frames @ {} Hz, {} underruns",
                p.play_count,
                p.record_count,
                p.period_size(),
                p.sample_rate,
                p.underruns
            ),
            BridgeEvent::PortUnavailable { direction, index } => {
                write!(f, "Engine refused {} port {}", direction, index)
            }
        }
    }
}

impl BridgeEvent {
    /// Events worth a warning rather than an info line
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            BridgeEvent::PeriodMismatch { .. }
                | BridgeEvent::SampleRateMismatch { .. }
                | BridgeEvent::MalformedPacket(_)
                | BridgeEvent::PortUnavailable { .. }
        )
    }
}

/// Sending half used by the period loop
#[derive(Clone)]
pub struct EventSink {
    tx: Option<Sender<BridgeEvent>>,
}

impl EventSink {
    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Post an event without blocking
    pub fn emit(&self, event: BridgeEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }
}

/// Create a bounded event queue
pub fn event_channel(capacity: usize) -> (EventSink, Receiver<BridgeEvent>) {
    let (tx, rx) = bounded(capacity);
    (EventSink { tx: Some(tx) }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops_events() {
        let (sink, rx) = event_channel(2);
        sink.emit(BridgeEvent::Paused);
        sink.emit(BridgeEvent::Resumed);
        sink.emit(BridgeEvent::QuerySent);

        let drained: Vec<_> = rx.try_iter().collect();
        assert_eq!(drained, vec![BridgeEvent::Paused, BridgeEvent::Resumed]);
    }

    #[test]
    fn test_disabled_sink() {
        EventSink::disabled().emit(BridgeEvent::Paused);
    }

    #[test]
    fn test_display() {
        let event = BridgeEvent::SampleRateMismatch {
            local: 48000,
            remote: 44100,
        };
        assert_eq!(
            event.to_string(),
            "Sample rate mismatch: local 48000 Hz, peer 44100 Hz"
        );
    }

    #[test]
    fn test_warning_classification() {
        assert!(BridgeEvent::MalformedPacket(PacketError::BadEndMarker(0)).is_warning());
        assert!(!BridgeEvent::Reconfigured { play: 1, record: 1 }.is_warning());
    }
}
