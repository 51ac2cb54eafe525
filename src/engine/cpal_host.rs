//! Engine host backed by cpal
//!
//! The output stream callback is the period clock. Each callback:
//! 1. Pulls captured samples from the input stream's ring into input ports
//! 2. Runs the process handler
//! 3. Interleaves output ports into the device buffer
//!
//! Ports map onto physical channels in registration order. Ports beyond the
//! device's channel count still exist; they are just not connected.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, FromSample, Sample, SampleFormat, SizedSample, StreamConfig, StreamInstant};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::device;
use super::{
    EngineNotifications, LatencySource, PeriodBuffers, PortFlow, PortId, PortRegistry,
    ProcessHandler,
};
use crate::config::EngineConfig;
use crate::constants::{MAX_CHANNELS, MAX_PERIOD_FRAMES};
use crate::error::EngineError;

/// Port slots available (one full bank per direction)
pub const MAX_PORTS: usize = 2 * MAX_CHANNELS;

/// Capture ring size, in periods of the largest size
const CAPTURE_RING_PERIODS: usize = 4;

/// Latency figures written by the callback, readable from anywhere
pub struct HostLatency {
    sample_rate: u32,
    playback_frames: AtomicU32,
    live: [AtomicBool; MAX_PORTS],
}

impl HostLatency {
    fn new(sample_rate: u32, period_frames: u32) -> Self {
        Self {
            sample_rate,
            playback_frames: AtomicU32::new(period_frames),
            live: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }
}

impl LatencySource for HostLatency {
    fn playback_latency(&self, port: PortId) -> Option<u32> {
        let live = self.live.get(port.0 as usize)?;
        live.load(Ordering::Acquire)
            .then(|| self.playback_frames.load(Ordering::Relaxed))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

struct PortSlot {
    name: String,
    flow: Option<PortFlow>,
    channel: Option<usize>,
    buffer: Box<[f32]>,
}

/// Port table and per-period buffers of the cpal host
pub struct CpalPorts {
    slots: Vec<PortSlot>,
    frames: usize,
    capture_channels: usize,
    playback_channels: usize,
    capture_stage: Box<[f32]>,
    latency: Arc<HostLatency>,
    graph_changed: bool,
}

impl CpalPorts {
    fn new(capture_channels: usize, playback_channels: usize, latency: Arc<HostLatency>) -> Self {
        let slots = (0..MAX_PORTS)
            .map(|_| PortSlot {
                name: String::with_capacity(32),
                flow: None,
                channel: None,
                buffer: vec![0.0; MAX_PERIOD_FRAMES].into_boxed_slice(),
            })
            .collect();

        Self {
            slots,
            frames: 0,
            capture_channels,
            playback_channels,
            capture_stage: vec![0.0; MAX_PERIOD_FRAMES * capture_channels].into_boxed_slice(),
            latency,
            graph_changed: false,
        }
    }

    /// Physical channels on the device side of a port flow
    fn physical_channels(&self, flow: PortFlow) -> usize {
        match flow {
            PortFlow::Input => self.capture_channels,
            PortFlow::Output => self.playback_channels,
        }
    }

    /// Lowest physical channel not yet taken by a port of the same flow
    fn free_channel(&self, flow: PortFlow) -> Option<usize> {
        (0..self.physical_channels(flow)).find(|c| {
            !self
                .slots
                .iter()
                .any(|s| s.flow == Some(flow) && s.channel == Some(*c))
        })
    }

    /// Load input ports from the capture ring and clear output ports
    fn begin_period(&mut self, frames: usize, capture: Option<&mut HeapCons<f32>>) {
        self.frames = frames;
        let channels = self.capture_channels;
        let needed = frames * channels;
        let stage = &mut self.capture_stage[..needed];

        let got = match capture {
            Some(ring) => {
                // Drop backlog so capture latency cannot grow without bound
                let backlog = ring.occupied_len();
                if backlog > needed * CAPTURE_RING_PERIODS / 2 {
                    ring.skip(backlog - needed);
                }
                ring.pop_slice(stage)
            }
            None => 0,
        };
        stage[got..].fill(0.0);

        for slot in &mut self.slots {
            let buffer = &mut slot.buffer[..frames];
            match (slot.flow, slot.channel) {
                (Some(PortFlow::Input), Some(c)) => {
                    for (f, sample) in buffer.iter_mut().enumerate() {
                        *sample = stage[f * channels + c];
                    }
                }
                (Some(_), _) => buffer.fill(0.0),
                (None, _) => {}
            }
        }
    }

    /// Write output ports into an interleaved device buffer
    fn end_period<T>(&self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        data.fill(T::EQUILIBRIUM);
        for slot in &self.slots {
            let (Some(PortFlow::Output), Some(c)) = (slot.flow, slot.channel) else {
                continue;
            };
            if c >= channels {
                continue;
            }
            for (frame, sample) in data.chunks_mut(channels).zip(&slot.buffer[..self.frames]) {
                frame[c] = T::from_sample(*sample);
            }
        }
    }

    fn take_graph_changed(&mut self) -> bool {
        std::mem::take(&mut self.graph_changed)
    }
}

impl PortRegistry for CpalPorts {
    fn register_port(&mut self, name: &str, flow: PortFlow) -> Option<PortId> {
        let index = self.slots.iter().position(|s| s.flow.is_none())?;
        let channel = self.free_channel(flow);

        let slot = &mut self.slots[index];
        slot.name.clear();
        slot.name.push_str(name);
        slot.flow = Some(flow);
        slot.channel = channel;

        self.latency.live[index].store(true, Ordering::Release);
        self.graph_changed = true;
        Some(PortId(index as u32))
    }

    fn unregister_port(&mut self, port: PortId) {
        let index = port.0 as usize;
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        if slot.flow.take().is_some() {
            slot.channel = None;
            self.latency.live[index].store(false, Ordering::Release);
            self.graph_changed = true;
        }
    }
}

impl PeriodBuffers for CpalPorts {
    fn frames(&self) -> usize {
        self.frames
    }

    fn input(&self, port: PortId) -> Option<&[f32]> {
        self.slots
            .get(port.0 as usize)
            .filter(|s| s.flow == Some(PortFlow::Input))
            .map(|s| &s.buffer[..self.frames])
    }

    fn output(&mut self, port: PortId) -> Option<&mut [f32]> {
        let frames = self.frames;
        self.slots
            .get_mut(port.0 as usize)
            .filter(|s| s.flow == Some(PortFlow::Output))
            .map(|s| &mut s.buffer[..frames])
    }
}

/// Everything the output callback owns
struct CallbackState<H> {
    handler: H,
    ports: CpalPorts,
    capture: Option<HeapCons<f32>>,
    notify: Arc<dyn EngineNotifications>,
    sample_rate: u32,
    period_frames: usize,
    last_callback: Option<(StreamInstant, usize)>,
}

impl<H: ProcessHandler> CallbackState<H> {
    fn run<T>(&mut self, data: &mut [T], channels: usize, info: &cpal::OutputCallbackInfo)
    where
        T: Sample + FromSample<f32>,
    {
        let frames = data.len() / channels;
        self.track_timing(frames, info);
        self.render(data, channels);

        if self.ports.take_graph_changed() {
            self.notify.on_graph_changed();
        }
    }

    /// Run the handler once per configured period. Device buffers of any
    /// other size are split so no period exceeds the advertised one.
    fn render<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        let period = self.period_frames.clamp(1, MAX_PERIOD_FRAMES);
        for chunk in data.chunks_mut(period * channels) {
            self.ports.begin_period(chunk.len() / channels, self.capture.as_mut());
            self.handler.process(&mut self.ports);
            self.ports.end_period(chunk, channels);
        }
    }

    fn track_timing(&mut self, frames: usize, info: &cpal::OutputCallbackInfo) {
        let stamp = info.timestamp();
        let rate = self.sample_rate.max(1) as f64;

        if let Some((last, last_frames)) = self.last_callback {
            if let Some(gap) = stamp.callback.duration_since(&last) {
                let expected = Duration::from_secs_f64(last_frames as f64 / rate);
                if gap > expected * 2 {
                    let late = gap - expected;
                    self.notify.on_underrun(late.as_micros() as f32);
                }
            }
        }
        self.last_callback = Some((stamp.callback, frames));

        let ahead = stamp
            .playback
            .duration_since(&stamp.callback)
            .map(|d| (d.as_secs_f64() * rate) as u32)
            .unwrap_or(0);
        self.ports
            .latency
            .playback_frames
            .store(ahead.saturating_add(frames as u32), Ordering::Relaxed);
    }
}

/// An opened but not yet running cpal engine
pub struct CpalHost {
    output: cpal::Device,
    output_config: StreamConfig,
    output_format: SampleFormat,
    input: Option<(cpal::Device, StreamConfig, SampleFormat)>,
    ports: CpalPorts,
    latency: Arc<HostLatency>,
    sample_rate: u32,
    period_frames: u32,
}

impl CpalHost {
    /// Open the configured devices. Capture is optional; playback is not.
    pub fn open(config: &EngineConfig) -> Result<Self, EngineError> {
        let output = device::output_device(config.output_device.as_deref())?;
        let output_name = output.name().unwrap_or_else(|_| "Unknown".to_string());
        let supported = output.default_output_config()?;
        if supported.channels() == 0 {
            return Err(EngineError::NoPlaybackChannels(output_name));
        }

        let sample_rate = supported.sample_rate().0;
        let period_frames = config.period_frames.min(MAX_PERIOD_FRAMES as u32);
        let output_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: BufferSize::Fixed(period_frames),
        };
        tracing::info!(
            "Output device '{}': {} channels @ {} Hz ({:?})",
            output_name,
            output_config.channels,
            sample_rate,
            supported.sample_format()
        );

        let input = match device::input_device(config.input_device.as_deref())? {
            Some(device) => Self::capture_config(device, sample_rate, period_frames)?,
            None => {
                tracing::warn!("No input device; record ports will carry silence");
                None
            }
        };

        let capture_channels = input
            .as_ref()
            .map_or(0, |(_, config, _)| config.channels as usize);
        let latency = Arc::new(HostLatency::new(sample_rate, period_frames));
        let ports = CpalPorts::new(
            capture_channels,
            output_config.channels as usize,
            latency.clone(),
        );

        Ok(Self {
            output,
            output_config,
            output_format: supported.sample_format(),
            input,
            ports,
            latency,
            sample_rate,
            period_frames,
        })
    }

    fn capture_config(
        device: cpal::Device,
        sample_rate: u32,
        period_frames: u32,
    ) -> Result<Option<(cpal::Device, StreamConfig, SampleFormat)>, EngineError> {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let supported = device.default_input_config()?;

        if supported.sample_rate().0 != sample_rate {
            tracing::warn!(
                "Input device '{}' runs at {} Hz, output at {} Hz; capture disabled",
                name,
                supported.sample_rate().0,
                sample_rate
            );
            return Ok(None);
        }

        tracing::info!(
            "Input device '{}': {} channels @ {} Hz ({:?})",
            name,
            supported.channels(),
            sample_rate,
            supported.sample_format()
        );
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: BufferSize::Fixed(period_frames),
        };
        Ok(Some((device, config, supported.sample_format())))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Requested period size; the device may deliver other sizes
    pub fn period_frames(&self) -> u32 {
        self.period_frames
    }

    /// Physical channels available to ports of a flow
    pub fn physical_channels(&self, flow: PortFlow) -> usize {
        self.ports.physical_channels(flow)
    }

    pub fn latency_source(&self) -> Arc<HostLatency> {
        self.latency.clone()
    }

    /// Register ports before the streams start
    pub fn ports_mut(&mut self) -> &mut CpalPorts {
        &mut self.ports
    }

    /// Start the streams with `handler` as the period callback
    pub fn activate<H: ProcessHandler>(
        self,
        handler: H,
        notify: Arc<dyn EngineNotifications>,
    ) -> Result<ActiveHost<H>, EngineError> {
        let (capture_tx, capture_rx) = match &self.input {
            Some((_, config, _)) => {
                let ring = HeapRb::<f32>::new(
                    MAX_PERIOD_FRAMES * config.channels as usize * CAPTURE_RING_PERIODS,
                );
                let (tx, rx) = ring.split();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        let state = Arc::new(Mutex::new(CallbackState {
            handler,
            ports: self.ports,
            capture: capture_rx,
            notify,
            sample_rate: self.sample_rate,
            period_frames: self.period_frames as usize,
            last_callback: None,
        }));
        let (error_tx, error_rx) = bounded::<EngineError>(16);

        let output = match self.output_format {
            SampleFormat::F32 => {
                build_output::<f32, H>(&self.output, &self.output_config, &state, &error_tx)?
            }
            SampleFormat::I16 => {
                build_output::<i16, H>(&self.output, &self.output_config, &state, &error_tx)?
            }
            SampleFormat::U16 => {
                build_output::<u16, H>(&self.output, &self.output_config, &state, &error_tx)?
            }
            other => {
                return Err(EngineError::UnsupportedFormat(format!("{:?}", other)));
            }
        };

        let input = match (self.input, capture_tx) {
            (Some((device, config, format)), Some(ring)) => {
                let stream = match format {
                    SampleFormat::F32 => build_input::<f32>(&device, &config, ring, &error_tx)?,
                    SampleFormat::I16 => build_input::<i16>(&device, &config, ring, &error_tx)?,
                    SampleFormat::U16 => build_input::<u16>(&device, &config, ring, &error_tx)?,
                    other => {
                        return Err(EngineError::UnsupportedFormat(format!("{:?}", other)));
                    }
                };
                Some(stream)
            }
            _ => None,
        };

        if let Some(stream) = &input {
            stream.play()?;
        }
        output.play()?;
        tracing::info!("Engine running at {} Hz", self.sample_rate);

        Ok(ActiveHost {
            state,
            output,
            input,
            errors: error_rx,
            latency: self.latency,
        })
    }
}

fn build_output<T, H>(
    device: &cpal::Device,
    config: &StreamConfig,
    state: &Arc<Mutex<CallbackState<H>>>,
    errors: &Sender<EngineError>,
) -> Result<cpal::Stream, EngineError>
where
    T: SizedSample + FromSample<f32>,
    H: ProcessHandler,
{
    let attempt = |config: &StreamConfig| {
        let state = state.clone();
        let errors = errors.clone();
        let channels = config.channels as usize;
        device.build_output_stream(
            config,
            move |data: &mut [T], info: &cpal::OutputCallbackInfo| match state.try_lock() {
                Some(mut state) => state.run(data, channels, info),
                None => data.fill(T::EQUILIBRIUM),
            },
            move |err| {
                let _ = errors.try_send(EngineError::StreamError(err.to_string()));
            },
            None,
        )
    };

    match attempt(config) {
        Ok(stream) => Ok(stream),
        Err(e) if matches!(config.buffer_size, BufferSize::Fixed(_)) => {
            tracing::warn!("Fixed period rejected ({}); using device default", e);
            let fallback = StreamConfig {
                buffer_size: BufferSize::Default,
                ..config.clone()
            };
            Ok(attempt(&fallback)?)
        }
        Err(e) => Err(e.into()),
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    ring: HeapProd<f32>,
    errors: &Sender<EngineError>,
) -> Result<cpal::Stream, EngineError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let ring = Arc::new(Mutex::new(ring));
    let attempt = |config: &StreamConfig| {
        let ring = ring.clone();
        let errors = errors.clone();
        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Only this callback ever pushes, so the lock is uncontended
                let Some(mut ring) = ring.try_lock() else {
                    return;
                };
                for &sample in data {
                    if ring.try_push(sample.to_sample::<f32>()).is_err() {
                        break;
                    }
                }
            },
            move |err| {
                let _ = errors.try_send(EngineError::StreamError(err.to_string()));
            },
            None,
        )
    };

    match attempt(config) {
        Ok(stream) => Ok(stream),
        Err(e) if matches!(config.buffer_size, BufferSize::Fixed(_)) => {
            tracing::warn!("Fixed capture period rejected ({}); using device default", e);
            let fallback = StreamConfig {
                buffer_size: BufferSize::Default,
                ..config.clone()
            };
            Ok(attempt(&fallback)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Running cpal engine
pub struct ActiveHost<H> {
    state: Arc<Mutex<CallbackState<H>>>,
    output: cpal::Stream,
    input: Option<cpal::Stream>,
    errors: Receiver<EngineError>,
    latency: Arc<HostLatency>,
}

impl<H: ProcessHandler> ActiveHost<H> {
    /// Next stream error reported by cpal, if any
    pub fn check_errors(&self) -> Option<EngineError> {
        self.errors.try_recv().ok()
    }

    pub fn latency_source(&self) -> Arc<HostLatency> {
        self.latency.clone()
    }

    /// Release every port, then stop the streams
    pub fn shutdown(self) {
        {
            let mut state = self.state.lock();
            let CallbackState { handler, ports, .. } = &mut *state;
            handler.shutdown(ports);
        }

        if let Err(e) = self.output.pause() {
            tracing::debug!("Output stream pause failed: {}", e);
        }
        if let Some(input) = &self.input {
            if let Err(e) = input.pause() {
                tracing::debug!("Input stream pause failed: {}", e);
            }
        }
        drop(self.input);
        drop(self.output);
        tracing::info!("Engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ProcessScope;

    fn ports(capture: usize, playback: usize) -> CpalPorts {
        CpalPorts::new(capture, playback, Arc::new(HostLatency::new(48000, 256)))
    }

    #[test]
    fn test_ports_map_in_registration_order() {
        let mut ports = ports(2, 2);
        let a = ports.register_port("out_0", PortFlow::Output).unwrap();
        let b = ports.register_port("out_1", PortFlow::Output).unwrap();
        let c = ports.register_port("out_2", PortFlow::Output).unwrap();
        let d = ports.register_port("in_0", PortFlow::Input).unwrap();

        assert_eq!(ports.slots[a.0 as usize].channel, Some(0));
        assert_eq!(ports.slots[b.0 as usize].channel, Some(1));
        assert_eq!(ports.slots[c.0 as usize].channel, None);
        assert_eq!(ports.slots[d.0 as usize].channel, Some(0));
        assert!(ports.take_graph_changed());
        assert!(!ports.take_graph_changed());

        // A released channel is reused by the next port
        ports.unregister_port(a);
        let e = ports.register_port("out_3", PortFlow::Output).unwrap();
        assert_eq!(ports.slots[e.0 as usize].channel, Some(0));
    }

    #[test]
    fn test_slots_run_out() {
        let mut ports = ports(0, 2);
        for i in 0..MAX_PORTS {
            assert!(ports.register_port(&format!("p{}", i), PortFlow::Output).is_some());
        }
        assert!(ports.register_port("extra", PortFlow::Output).is_none());
    }

    #[test]
    fn test_end_period_interleaves_outputs() {
        let mut ports = ports(0, 2);
        let right = {
            let _left = ports.register_port("out_0", PortFlow::Output).unwrap();
            ports.register_port("out_1", PortFlow::Output).unwrap()
        };
        ports.begin_period(3, None);
        ports.output(right).unwrap().copy_from_slice(&[0.5, -0.5, 1.0]);

        let mut data = [9.0f32; 6];
        ports.end_period(&mut data, 2);
        assert_eq!(data, [0.0, 0.5, 0.0, -0.5, 0.0, 1.0]);

        let mut data = [0i16; 6];
        ports.end_period(&mut data, 2);
        assert_eq!(data[0], 0);
        assert!(data[1] > 0 && data[3] < 0);
    }

    #[test]
    fn test_begin_period_reads_capture() {
        let mut ports = ports(2, 2);
        let _left = ports.register_port("in_0", PortFlow::Input).unwrap();
        let right = ports.register_port("in_1", PortFlow::Input).unwrap();

        let (mut tx, mut rx) = HeapRb::<f32>::new(64).split();
        tx.push_slice(&[0.1, 0.2, 0.3, 0.4]);

        // Two frames captured, four requested: the tail is silence
        ports.begin_period(4, Some(&mut rx));
        assert_eq!(ports.input(right).unwrap(), &[0.2, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn test_latency_follows_port_liveness() {
        let mut ports = ports(0, 2);
        let latency = ports.latency.clone();
        let port = ports.register_port("out_0", PortFlow::Output).unwrap();
        assert_eq!(latency.playback_latency(port), Some(256));

        ports.unregister_port(port);
        assert_eq!(latency.playback_latency(port), None);
        assert_eq!(latency.sample_rate(), 48000);
    }

    struct PeriodLog {
        periods: Vec<usize>,
    }

    impl ProcessHandler for PeriodLog {
        fn process<S: ProcessScope>(&mut self, scope: &mut S) {
            self.periods.push(scope.frames());
            if let Some(out) = scope.output(PortId(0)) {
                out.fill(0.5);
            }
        }

        fn shutdown<R: PortRegistry>(&mut self, _registry: &mut R) {}
    }

    struct Quiet;

    impl EngineNotifications for Quiet {
        fn on_underrun(&self, _delay_us: f32) {}
        fn on_graph_changed(&self) {}
    }

    fn callback_state(period_frames: usize) -> CallbackState<PeriodLog> {
        let mut ports = ports(0, 2);
        ports.register_port("out_0", PortFlow::Output).unwrap();
        CallbackState {
            handler: PeriodLog {
                periods: Vec::new(),
            },
            ports,
            capture: None,
            notify: Arc::new(Quiet),
            sample_rate: 48000,
            period_frames,
            last_callback: None,
        }
    }

    #[test]
    fn test_device_buffer_split_into_periods() {
        let mut state = callback_state(256);
        let mut data = vec![0.0f32; 1024 * 2];
        state.render(&mut data, 2);
        assert_eq!(state.handler.periods, vec![256; 4]);
        assert!(data.chunks(2).all(|frame| frame == [0.5, 0.0]));

        // A ragged buffer ends with a short period
        state.handler.periods.clear();
        let mut data = vec![0.0f32; 600 * 2];
        state.render(&mut data, 2);
        assert_eq!(state.handler.periods, vec![256, 256, 88]);
        assert!(data.chunks(2).all(|frame| frame == [0.5, 0.0]));
    }

    #[test]
    fn test_short_device_buffer_is_one_period() {
        let mut state = callback_state(256);
        let mut data = vec![0i16; 64 * 2];
        state.render(&mut data, 2);
        assert_eq!(state.handler.periods, vec![64]);
    }
}
