//! Client module for talking to a running MOO server.
//!
//! [`MooClient`] owns one TCP connection to one server instance and drives
//! the line-oriented MOO protocol over it: sending evaluation requests,
//! classifying responses, requesting checkpoints, and optionally recording
//! a trace transcript of every send and receive for debugging.

mod moo;
mod transcript;

pub use moo::{ClientOptions, MooClient};
pub use transcript::{Direction, Transcript, TranscriptEntry};
