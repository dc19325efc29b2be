// 播放器核心模块

pub mod audio_output;
pub mod audio_state;
pub mod codec;
pub mod demuxer_source; // Demuxer 抽象接口
pub mod demuxer_thread; // 读取线程
pub mod frame_pacer;
pub mod network_stream;
pub mod packet_queue;
pub mod session;
pub mod source;
pub mod transcode;

#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod demuxer;
#[cfg(feature = "ffmpeg")]
pub mod muxer;

#[cfg(feature = "device")]
pub mod audio_device;

#[cfg(test)]
pub(crate) mod test_support;

pub use audio_output::{pcm_ring, AudioCallback, AudioPump, AudioSink, FillReport, PcmSource};
pub use audio_state::{AudioState, RefillError};
pub use codec::{DecodeStep, Decoder, Encoded, Encoder, Muxer, Renderer, Resampler};
pub use demuxer_source::Demuxer;
pub use demuxer_thread::{DemuxLoop, DemuxReport, DemuxThread, VideoRoute};
pub use frame_pacer::{FramePacer, PaceOutcome};
pub use network_stream::MulticastReceiver;
pub use packet_queue::{PacketQueue, QueueNode};
pub use session::{Session, TeardownReport};
pub use source::{ByteSource, ChunkFeeder, ChunkSource, FileSource, MemorySource};
pub use transcode::{TranscodeOutcome, TranscodeStage, Transcoder};

#[cfg(feature = "ffmpeg")]
pub use decoder::{FfmpegAudioDecoder, FfmpegVideoDecoder, RawVideoEncoder, S16Resampler};
#[cfg(feature = "ffmpeg")]
pub use demuxer::FfmpegDemuxer;
#[cfg(feature = "ffmpeg")]
pub use muxer::FfmpegMuxer;

#[cfg(feature = "device")]
pub use audio_device::CpalSink;

use std::process;
use std::thread;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
