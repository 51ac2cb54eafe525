//! # Domain Audio Bridge
//!
//! Moves real-time audio between an audio engine running in one isolated
//! domain and a peer bridge in another domain, over three byte-stream
//! channels (control, playback, record).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────── CLIENT DOMAIN ────────────────────────┐
//! │  engine graph                                                 │
//! │   playback_1..n (inputs) ──┐        ┌── record_1..n (outputs) │
//! │                            ▼        │                         │
//! │                ┌─────────────────────────────┐                │
//! │                │  Bridge::process (per period)│                │
//! │                │  governor → control → codec  │                │
//! │                └─────────────────────────────┘                │
//! │        playback chan ▼      ▲ record chan     ▲▼ control chan │
//! └──────────────────────┼──────┼─────────────────┼┼──────────────┘
//!                        │      │                 ││
//! ┌──────────────────────┼──────┼─────────────────┼┼──────────────┐
//! │                      ▼      │                 ││              │
//! │                ┌─────────────────────────────┐                │
//! │                │  Bridge::process (per period)│                │
//! │                └─────────────────────────────┘                │
//! │   out_0..n (outputs) ◄─┘        └── in_0..n (inputs)          │
//! │  engine graph (physical ports)                                │
//! └──────────────────────── SERVER DOMAIN ────────────────────────┘
//! ```
//!
//! Audio travels as interleaved big-endian `f32` frames. The server owns the
//! channel topology and pushes it to the client in a 13-byte config packet;
//! the client rebuilds its ports when the topology changes.

pub mod app;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Hard ceiling on channels per direction (wire format and port tables)
    pub const MAX_CHANNELS: usize = 8;

    /// Default channels per direction used by the executables
    pub const DEFAULT_MAX_CHANNELS: usize = 2;

    /// Largest period the scratch buffer can carry, in frames
    pub const MAX_PERIOD_FRAMES: usize = 8192;

    /// Bytes per sample on the wire
    pub const SAMPLE_BYTES: usize = 4;

    /// Scratch buffer capacity in bytes
    pub const SCRATCH_CAPACITY: usize = MAX_CHANNELS * MAX_PERIOD_FRAMES * SAMPLE_BYTES;

    /// Lower bound applied to reported playback latency, in frames
    pub const MIN_LATENCY_FRAMES: u32 = 16;

    /// Default period size requested from the engine
    pub const DEFAULT_PERIOD_FRAMES: u32 = 256;

    /// Capacity of the real-time event queue
    pub const EVENT_QUEUE_CAPACITY: usize = 256;

    /// Default TCP port for the control channel; playback and record follow
    pub const DEFAULT_BASE_PORT: u16 = 4715;
}
