//! The per-period bridge loop
//!
//! Runs inside the engine's real-time callback. Nothing in here blocks or
//! allocates: transports are asked how much they hold before every read or
//! write, and all frame data passes through one fixed scratch buffer.

use std::sync::Arc;

use super::control::{ControlHandler, ControlPoll, LocalConfig};
use super::events::{BridgeEvent, EventSink};
use super::role::{Direction, Role};
use super::scratch::ScratchBuffer;
use super::session::{governor, Session};
use super::topology::PortTopology;
use crate::codec::{deinterleave_channel, frame_bytes, interleave_channel, silence_channel};
use crate::engine::{PeriodBuffers, PortRegistry, ProcessHandler, ProcessScope};
use crate::protocol::ConfigPacket;
use crate::transport::{Transport, TransportSet};

/// One side of the bridge
pub struct Bridge<T: Transport> {
    role: Role,
    session: Arc<Session>,
    topology: PortTopology,
    control: ControlHandler,
    transports: TransportSet<T>,
    scratch: ScratchBuffer,
    events: EventSink,
}

impl<T: Transport> Bridge<T> {
    pub fn new(
        session: Arc<Session>,
        transports: TransportSet<T>,
        max_channels: usize,
        events: EventSink,
    ) -> Self {
        let role = session.role();
        let topology = PortTopology::new(role, session.clone(), max_channels, events.clone());
        let control = ControlHandler::new(topology.max_channels());

        Self {
            role,
            session,
            topology,
            control,
            transports,
            scratch: ScratchBuffer::new(),
            events,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn topology(&self) -> &PortTopology {
        &self.topology
    }

    pub fn transports_mut(&mut self) -> &mut TransportSet<T> {
        &mut self.transports
    }

    /// Create the initial ports, before the engine starts calling us
    pub fn open_ports<R>(&mut self, registry: &mut R, play: usize, record: usize)
    where
        R: PortRegistry + ?Sized,
    {
        self.topology.open(registry, play, record);
    }

    fn update_pause(&mut self) -> bool {
        let record_open = self.transports.record.is_open();
        let play_open = self.transports.playback.is_open();
        let paused = governor(record_open, play_open);

        if self.session.set_paused(paused) != paused {
            self.events.emit(if paused {
                BridgeEvent::Paused
            } else {
                BridgeEvent::Resumed
            });
        }
        paused
    }

    fn service_control<S>(&mut self, scope: &mut S)
    where
        S: ProcessScope + ?Sized,
    {
        let control = &mut self.transports.control;
        let connected = self.control.on_connect_edge(control);

        if self.role.owns_topology() {
            // Publish our layout on connect and whenever the peer asks
            let queried = self.control.try_drain_query(control);
            if connected || queried {
                let packet = ConfigPacket::describe(
                    self.session.play_count(),
                    self.session.record_count(),
                    self.session.period_size(),
                    self.session.sample_rate(),
                    self.session.underrun_total(),
                );
                if self.control.push_config(control, &packet) {
                    self.events.emit(BridgeEvent::ConfigSent(packet));
                }
            }
            return;
        }

        if connected && self.control.send_query(control) {
            self.events.emit(BridgeEvent::QuerySent);
        }
        match self.control.try_drain_one_packet(control) {
            ControlPoll::Idle => {}
            ControlPoll::Malformed(e) => self.events.emit(BridgeEvent::MalformedPacket(e)),
            ControlPoll::Packet(packet) => self.apply_packet(scope, &packet),
        }
    }

    fn apply_packet<S>(&mut self, scope: &mut S, packet: &ConfigPacket)
    where
        S: ProcessScope + ?Sized,
    {
        let local = LocalConfig {
            play_count: self.session.play_count(),
            record_count: self.session.record_count(),
            period_size: self.session.period_size(),
            sample_rate: self.session.sample_rate(),
        };
        let decision = self.control.decide(packet, local);

        if let Some(remote) = decision.period_mismatch {
            self.events.emit(BridgeEvent::PeriodMismatch {
                local: local.period_size,
                remote,
            });
        }
        if let Some(remote) = decision.rate_mismatch {
            self.events.emit(BridgeEvent::SampleRateMismatch {
                local: local.sample_rate,
                remote,
            });
        }
        if let Some((play, record)) = decision.reconfigure {
            self.topology.rebuild(scope, play, record);
        }
        self.session.overwrite_underruns(decision.underruns);
    }

    fn silence_outputs<S>(&mut self, scope: &mut S, direction: Direction)
    where
        S: ProcessScope + ?Sized,
    {
        for port in self.topology.bank(direction).ports().iter().flatten() {
            if let Some(out) = scope.output(*port) {
                out.fill(0.0);
            }
        }
    }

    /// Peer audio into the engine's output ports, or silence if short
    fn receive<S>(&mut self, scope: &mut S, frames: usize)
    where
        S: ProcessScope + ?Sized,
    {
        let direction = self.role.incoming();
        let bank = *self.topology.bank(direction);
        let channels = bank.count();
        let len = frame_bytes(channels, frames);

        let transport = self.transports.channel_mut(direction.channel());
        let buf = self.scratch.prefix_mut(len);
        let received = len > 0 && transport.data_ready() >= len && transport.read(buf).is_ok();
        if !received {
            self.silence_outputs(scope, direction);
            return;
        }

        for (channel, port) in bank.ports().iter().enumerate() {
            if let Some(out) = port.and_then(|p| scope.output(p)) {
                deinterleave_channel(buf, channel, channels, &mut out[..frames]);
            }
        }
    }

    /// The engine's input ports out to the peer, dropped (and counted) if there
    /// is no room or the write fails
    fn send<S>(&mut self, scope: &mut S, frames: usize)
    where
        S: ProcessScope + ?Sized,
    {
        let direction = self.role.outgoing();
        let bank = *self.topology.bank(direction);
        let channels = bank.count();
        let len = frame_bytes(channels, frames);
        if len == 0 {
            return;
        }

        let buf = self.scratch.prefix_mut(len);
        for (channel, port) in bank.ports().iter().enumerate() {
            match port.and_then(|p| scope.input(p)) {
                Some(samples) => interleave_channel(buf, channel, channels, &samples[..frames]),
                None => silence_channel(buf, channel, channels, frames),
            }
        }

        let transport = self.transports.channel_mut(direction.channel());
        let sent = transport.buffer_space() >= len && transport.write(buf).is_ok();
        if !sent {
            self.session.count_dropped();
        }
    }

    fn run_period<S>(&mut self, scope: &mut S)
    where
        S: ProcessScope + ?Sized,
    {
        let paused = self.update_pause();

        // Underrun debt is reported, never used to skip frames
        let _ = self.session.take_underrun_debt();

        if !self.session.is_ready() {
            return;
        }

        self.service_control(scope);

        let frames = scope.frames();
        if paused {
            self.silence_outputs(scope, self.role.incoming());
            let outgoing = self.topology.bank(self.role.outgoing()).count();
            self.scratch.prefix_mut(frame_bytes(outgoing, frames)).fill(0);
        } else {
            self.receive(scope, frames);
            self.send(scope, frames);
        }

        self.session.count_period();
    }
}

impl<T: Transport + 'static> ProcessHandler for Bridge<T> {
    fn process<S: ProcessScope>(&mut self, scope: &mut S) {
        self.run_period(scope);
    }

    fn shutdown<R: PortRegistry>(&mut self, registry: &mut R) {
        self.session.begin_shutdown();
        self.topology.close(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::events::event_channel;
    use crate::codec::{decode_float, encode_float};
    use crate::engine::{ManualEngine, PortFlow};
    use crate::protocol::PACKET_SIZE;
    use crate::transport::memory::{channel_set, MemoryTransport};

    const FRAMES: usize = 4;

    struct Rig {
        bridge: Bridge<MemoryTransport>,
        engine: ManualEngine,
        peer: TransportSet<MemoryTransport>,
        events: crossbeam_channel::Receiver<BridgeEvent>,
    }

    fn rig(role: Role) -> Rig {
        rig_with_period(role, FRAMES)
    }

    fn rig_with_period(role: Role, period: usize) -> Rig {
        let (local, peer) = channel_set(4096);
        let session = Arc::new(Session::new(role, 48000, period as u32));
        let (sink, events) = event_channel(64);
        let mut bridge = Bridge::new(session, local, 2, sink);
        let mut engine = ManualEngine::new(48000, period);
        bridge.open_ports(&mut engine, 2, 2);
        Rig {
            bridge,
            engine,
            peer,
            events,
        }
    }

    fn interleaved(channels: usize, frames: usize, value: impl Fn(usize, usize) -> f32) -> Vec<u8> {
        let mut buf = vec![0u8; frame_bytes(channels, frames)];
        for f in 0..frames {
            for c in 0..channels {
                encode_float(&mut buf, c + f * channels, value(c, f));
            }
        }
        buf
    }

    #[test]
    fn test_client_receives_record_audio() {
        let mut rig = rig(Role::Client);
        let frame = interleaved(2, FRAMES, |c, f| (c * 10 + f) as f32);
        rig.peer.record.write(&frame).unwrap();

        rig.bridge.process(&mut rig.engine);

        assert!(!rig.bridge.session().is_paused());
        assert_eq!(rig.engine.captured("record_1").unwrap(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(rig.engine.captured("record_2").unwrap(), &[10.0, 11.0, 12.0, 13.0]);
        assert_eq!(rig.peer.record.in_flight(), 0);
    }

    #[test]
    fn test_short_input_gives_silence() {
        let mut rig = rig(Role::Client);
        rig.engine.fill_port("record_1", 0.7);
        rig.peer.record.write(&[0u8; 8]).unwrap();

        rig.bridge.process(&mut rig.engine);

        assert!(rig.engine.captured("record_1").unwrap().iter().all(|s| *s == 0.0));
        // Partial frame data stays queued
        assert_eq!(rig.bridge.transports_mut().record.data_ready(), 8);
    }

    #[test]
    fn test_client_sends_playback_audio() {
        let mut rig = rig(Role::Client);
        rig.engine.feed("playback_1", &[0.25; FRAMES]);
        rig.engine.feed("playback_2", &[-0.5; FRAMES]);

        rig.bridge.process(&mut rig.engine);

        let len = frame_bytes(2, FRAMES);
        assert_eq!(rig.peer.playback.data_ready(), len);
        let mut buf = vec![0u8; len];
        rig.peer.playback.read(&mut buf).unwrap();
        assert_eq!(decode_float(&buf, 0), 0.25);
        assert_eq!(decode_float(&buf, 1), -0.5);
        assert_eq!(decode_float(&buf, 7), -0.5);
    }

    #[test]
    fn test_no_room_drops_output() {
        let (local, mut peer) = {
            let (control_a, control_b) = crate::transport::memory::pair(64);
            let (play_a, play_b) = crate::transport::memory::pair(8);
            let (rec_a, rec_b) = crate::transport::memory::pair(64);
            (
                TransportSet::new(control_a, play_a, rec_a),
                TransportSet::new(control_b, play_b, rec_b),
            )
        };
        let session = Arc::new(Session::new(Role::Client, 48000, FRAMES as u32));
        let mut bridge = Bridge::new(session, local, 2, EventSink::disabled());
        let mut engine = ManualEngine::new(48000, FRAMES);
        bridge.open_ports(&mut engine, 2, 2);

        bridge.process(&mut engine);
        assert_eq!(peer.playback.data_ready(), 0);
        assert_eq!(bridge.session().stats().dropped_periods, 1);
    }

    #[test]
    fn test_pause_follows_liveness() {
        let mut rig = rig(Role::Client);
        rig.bridge.process(&mut rig.engine);
        assert!(!rig.bridge.session().is_paused());

        rig.engine.fill_port("record_1", 0.9);
        rig.peer.record.write(&interleaved(2, FRAMES, |_, _| 1.0)).unwrap();
        rig.peer.playback.set_open(false);

        rig.bridge.process(&mut rig.engine);
        assert!(rig.bridge.session().is_paused());
        assert!(rig.engine.captured("record_1").unwrap().iter().all(|s| *s == 0.0));
        assert_eq!(rig.bridge.transports_mut().record.data_ready(), frame_bytes(2, FRAMES));

        rig.peer.playback.set_open(true);
        rig.bridge.process(&mut rig.engine);
        assert!(!rig.bridge.session().is_paused());
        assert_eq!(rig.engine.captured("record_1").unwrap(), &[1.0; FRAMES]);

        let events: Vec<_> = rig.events.try_iter().collect();
        assert!(events.contains(&BridgeEvent::Paused));
        assert!(events.contains(&BridgeEvent::Resumed));
    }

    #[test]
    fn test_not_ready_touches_nothing() {
        let mut rig = rig(Role::Client);
        rig.bridge.shutdown(&mut rig.engine);
        let mut engine = ManualEngine::new(48000, FRAMES);
        rig.peer.record.write(&interleaved(2, FRAMES, |_, _| 1.0)).unwrap();

        rig.bridge.process(&mut engine);
        assert_eq!(rig.bridge.transports_mut().record.data_ready(), frame_bytes(2, FRAMES));
        assert_eq!(rig.bridge.session().stats().periods, 0);
    }

    #[test]
    fn test_underrun_debt_drained_every_period() {
        let mut rig = rig(Role::Server);
        rig.bridge.session().add_underruns(5);
        rig.bridge.process(&mut rig.engine);
        assert_eq!(rig.bridge.session().underrun_debt(), 0);
        assert_eq!(rig.bridge.session().underrun_total(), 5);
    }

    #[test]
    fn test_client_applies_packet() {
        let mut rig = rig(Role::Client);
        let packet = ConfigPacket::describe(1, 2, FRAMES as u32, 48000, 3);
        rig.peer.control.write(&packet.encode()).unwrap();

        rig.bridge.process(&mut rig.engine);

        assert_eq!(rig.bridge.session().play_count(), 1);
        assert_eq!(rig.bridge.session().record_count(), 2);
        assert_eq!(rig.engine.live_ports(PortFlow::Input), vec!["playback_1".to_string()]);
        assert_eq!(rig.bridge.session().underrun_debt(), 3);
        // Query sent on connect
        assert_eq!(rig.peer.control.data_ready(), 1);
    }

    #[test]
    fn test_client_ignores_bad_packet() {
        let mut rig = rig(Role::Client);
        rig.bridge.session().overwrite_underruns(0);
        let mut bytes = ConfigPacket::describe(1, 1, FRAMES as u32, 48000, 3).encode();
        bytes[12] = 0xAB;
        rig.peer.control.write(&bytes).unwrap();

        rig.bridge.process(&mut rig.engine);

        assert_eq!(rig.bridge.session().play_count(), 2);
        assert_eq!(rig.bridge.session().underrun_debt(), 0);
        assert_eq!(rig.bridge.session().stats().rebuilds, 0);
        assert!(rig
            .events
            .try_iter()
            .any(|e| matches!(e, BridgeEvent::MalformedPacket(_))));
    }

    #[test]
    fn test_server_answers_query() {
        let mut rig = rig(Role::Server);

        // Unsolicited push on connect
        rig.bridge.process(&mut rig.engine);
        assert_eq!(rig.peer.control.data_ready(), PACKET_SIZE);
        let mut buf = [0u8; PACKET_SIZE];
        rig.peer.control.read(&mut buf).unwrap();

        rig.bridge.process(&mut rig.engine);
        assert_eq!(rig.peer.control.data_ready(), 0);

        rig.peer.control.write(&[crate::protocol::QUERY_CMD]).unwrap();
        rig.bridge.process(&mut rig.engine);
        rig.peer.control.read(&mut buf).unwrap();
        let packet = ConfigPacket::decode(&buf).unwrap();
        assert_eq!((packet.play_count, packet.record_count), (2, 2));
        assert_eq!(packet.period_size(), FRAMES as u32);
    }

    #[test]
    fn test_server_round_trip_directions() {
        let mut rig = rig(Role::Server);
        rig.peer
            .playback
            .write(&interleaved(2, FRAMES, |c, _| c as f32 + 1.0))
            .unwrap();
        rig.engine.feed("in_1", &[0.5; FRAMES]);

        rig.bridge.process(&mut rig.engine);

        assert_eq!(rig.engine.captured("out_1").unwrap(), &[2.0; FRAMES]);
        let mut buf = vec![0u8; frame_bytes(2, FRAMES)];
        rig.peer.record.read(&mut buf).unwrap();
        assert_eq!(decode_float(&buf, 0), 0.0);
        assert_eq!(decode_float(&buf, 1), 0.5);
    }

    #[test]
    fn test_refused_port_skipped() {
        let (local, mut peer) = channel_set(4096);
        let session = Arc::new(Session::new(Role::Client, 48000, FRAMES as u32));
        let mut bridge = Bridge::new(session, local, 2, EventSink::disabled());
        let mut engine = ManualEngine::new(48000, FRAMES);
        engine.refuse_registrations(1);
        bridge.open_ports(&mut engine, 2, 2);

        peer.record
            .write(&interleaved(2, FRAMES, |c, _| c as f32))
            .unwrap();
        bridge.process(&mut engine);

        assert!(engine.port("record_1").is_none());
        assert_eq!(engine.captured("record_2").unwrap(), &[1.0; FRAMES]);
    }

    #[test]
    fn test_short_period_sizes_follow_frame_count() {
        let mut rig = rig_with_period(Role::Client, 8);
        rig.engine.set_frames(3);
        rig.engine.feed("playback_1", &[0.25; 8]);
        rig.engine.feed("playback_2", &[-0.25; 8]);

        // One 3-frame period of stereo is 24 bytes; the rest stays queued
        let mut payload = interleaved(2, 3, |c, f| (c * 10 + f) as f32);
        assert_eq!(payload.len(), 24);
        payload.extend_from_slice(&[0u8; 8]);
        rig.peer.record.write(&payload).unwrap();

        rig.bridge.process(&mut rig.engine);

        assert_eq!(rig.engine.captured("record_1").unwrap(), &[0.0, 1.0, 2.0]);
        assert_eq!(rig.engine.captured("record_2").unwrap(), &[10.0, 11.0, 12.0]);
        assert_eq!(rig.bridge.transports_mut().record.data_ready(), 8);

        assert_eq!(rig.peer.playback.data_ready(), 24);
        let mut buf = [0u8; 24];
        rig.peer.playback.read(&mut buf).unwrap();
        assert_eq!(decode_float(&buf, 4), 0.25);
        assert_eq!(decode_float(&buf, 5), -0.25);
    }

    #[test]
    fn test_short_period_with_partial_payload_is_silent() {
        let mut rig = rig_with_period(Role::Client, 8);
        rig.engine.set_frames(3);
        rig.engine.fill_port("record_1", 0.7);
        rig.engine.fill_port("record_2", 0.7);
        rig.peer.record.write(&[0x3F; 16]).unwrap();

        rig.bridge.process(&mut rig.engine);

        assert_eq!(rig.engine.captured("record_1").unwrap(), &[0.0; 3]);
        assert_eq!(rig.engine.captured("record_2").unwrap(), &[0.0; 3]);
        assert_eq!(rig.bridge.transports_mut().record.data_ready(), 16);
    }

    /// Memory pipe whose writes fail after the space check passes
    struct BrokenWrites(MemoryTransport);

    impl Transport for BrokenWrites {
        fn is_open(&mut self) -> bool {
            self.0.is_open()
        }

        fn data_ready(&mut self) -> usize {
            self.0.data_ready()
        }

        fn buffer_space(&mut self) -> usize {
            self.0.buffer_space()
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<(), crate::error::TransportError> {
            self.0.read(buf)
        }

        fn write(&mut self, _buf: &[u8]) -> Result<(), crate::error::TransportError> {
            Err(crate::error::TransportError::Closed)
        }
    }

    #[test]
    fn test_failed_write_counted_as_dropped() {
        let (local, _peer) = channel_set(4096);
        let local = TransportSet::new(
            BrokenWrites(local.control),
            BrokenWrites(local.playback),
            BrokenWrites(local.record),
        );
        let session = Arc::new(Session::new(Role::Client, 48000, FRAMES as u32));
        let mut bridge = Bridge::new(session, local, 2, EventSink::disabled());
        let mut engine = ManualEngine::new(48000, FRAMES);
        bridge.open_ports(&mut engine, 2, 2);

        bridge.process(&mut engine);
        bridge.process(&mut engine);

        let stats = bridge.session().stats();
        assert_eq!(stats.periods, 2);
        assert_eq!(stats.dropped_periods, 2);
    }
}
