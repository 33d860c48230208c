//! facescan-source: frame sources for the face pipeline.
//!
//! Decodes still images and image sequences into RGB frames and flags
//! frames too dark to be worth running through the models.

pub mod frame;
pub mod source;

pub use frame::Frame;
pub use source::{FrameError, FrameSource, ImageSequenceSource, StillImageSource};
