//! Bridge Server
//!
//! Runs next to the audio hardware. Exposes `out_N` / `in_N` ports wired to
//! the physical device and tells the client how many channels it has.

use std::process::ExitCode;

use domain_audio_bridge::{app, bridge::Role};

#[tokio::main]
async fn main() -> ExitCode {
    app::run(Role::Server).await
}
