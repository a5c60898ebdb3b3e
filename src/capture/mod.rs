pub mod feed;
pub mod frame;
pub mod synthetic;

pub use feed::CameraFeed;
pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use synthetic::{RawFrame, SyntheticCamera};
