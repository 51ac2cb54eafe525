//! Wire codec for interleaved audio frames

pub mod frame;

pub use frame::{
    decode_float, decode_u32, deinterleave_channel, encode_float, encode_u32, frame_bytes,
    interleave_channel, log2, silence_channel,
};
