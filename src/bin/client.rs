//! Bridge Client
//!
//! Runs next to the applications. Exposes `playback_N` / `record_N` ports and
//! mirrors whatever channel layout the server reports.

use std::process::ExitCode;

use domain_audio_bridge::{app, bridge::Role};

#[tokio::main]
async fn main() -> ExitCode {
    app::run(Role::Client).await
}
