//! Wire protocol: literal tokens, frame model and codec.

pub mod codec;
pub mod frame;
pub mod tokens;

pub use codec::{FrameReader, FrameWriter, LineReader};
pub use frame::Frame;
