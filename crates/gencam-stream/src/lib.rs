//! WebSocket streaming server for the capture facade.
//!
//! One producer thread owns the camera and encodes each frame exactly once;
//! the payload is shared by reference across every subscriber connection.
//! The camera is open only while at least one subscriber exists. Clients
//! drive the stream with three text messages on the WebSocket: `status`,
//! `start` and `stop`; frames arrive as binary messages.

mod config;
mod encode;
mod producer;
mod registry;
mod server;
mod status;

pub use config::StreamConfig;
pub use encode::encode_frame;
pub use server::StreamServer;
pub use status::StreamingStatus;
