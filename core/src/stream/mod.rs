pub mod mjpeg;
pub mod viewer;

pub use mjpeg::{boundary_from_content_type, Frame, MjpegDecoder, StreamError};
pub use viewer::ImageStreamViewer;
