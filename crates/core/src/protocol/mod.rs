//! The JSON wire envelope.

mod frame;

pub use frame::{Frame, FrameType};
