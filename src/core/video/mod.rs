//! 视频帧输入：解码源适配、灰度标准化、固定间隔抽帧

pub mod ffmpeg;
pub mod frame;
pub mod sampler;
pub mod source;

pub use ffmpeg::FfmpegSource;
pub use frame::{DecodedFrame, GrayFrame, PixelFormat};
pub use sampler::{FrameSampler, SampledFrames};
pub use source::{FrameDecoder, ImageSequenceSource, MemorySource, VideoSource};
