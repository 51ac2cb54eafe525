//! The real-time bridge
//!
//! [`Bridge`] is the period callback. It composes the pause governor, the
//! control handler, the port topology and the frame codec, and is shared by
//! both roles. [`XrunAccountant`] handles the engine's asynchronous
//! notifications against the same [`Session`].

pub mod accountant;
pub mod control;
pub mod events;
pub mod process;
pub mod role;
pub mod scratch;
pub mod session;
pub mod topology;

pub use accountant::XrunAccountant;
pub use events::{event_channel, BridgeEvent, EventSink};
pub use process::Bridge;
pub use role::{Direction, Role};
pub use session::{Session, SessionStats, TopologyState};
