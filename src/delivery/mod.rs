//! Frame handoff between the acquisition side and a consumer.
//!
//! The channel holds at most one pending frame. Delivering replaces any
//! frame the consumer has not taken yet, so a slow display always shows the
//! newest image and the producer never waits on it.

mod slot;

pub use slot::{channel, FrameReceiver, FrameSender, RecvError};
