use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};

use super::rational::Rational;

/// 流的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamRole {
    Video,
    Audio,
}

impl StreamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamRole::Video => "video",
            StreamRole::Audio => "audio",
        }
    }
}

/// 已知流索引到角色的映射（只有视频、音频两种）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamMap {
    pub video: Option<usize>,
    pub audio: Option<usize>,
}

impl StreamMap {
    pub fn new(video: Option<usize>, audio: Option<usize>) -> Self {
        Self { video, audio }
    }

    /// 未知流索引返回 None，调用方应丢弃该包
    pub fn classify(&self, stream_index: usize) -> Option<StreamRole> {
        if Some(stream_index) == self.video {
            Some(StreamRole::Video)
        } else if Some(stream_index) == self.audio {
            Some(StreamRole::Audio)
        } else {
            None
        }
    }
}

/// 压缩数据单元（一个解封装出来的包）
///
/// 负载使用引用计数的 `Bytes`，`consume` 只移动读偏移，不复制数据。
/// 序号由队列在入队时分配，保存在 `QueueNode` 中。
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedUnit {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    /// 在输入中的字节位置，None 表示未知
    pub pos: Option<i64>,
    pub time_base: Rational,
    pub is_keyframe: bool,
    payload: Bytes,
}

impl CompressedUnit {
    pub fn new(stream_index: usize, time_base: Rational, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            duration: 0,
            pos: None,
            time_base,
            is_keyframe: false,
            payload: payload.into(),
        }
    }

    pub fn with_timestamps(mut self, pts: Option<i64>, dts: Option<i64>, duration: i64) -> Self {
        self.pts = pts;
        self.dts = dts;
        self.duration = duration;
        self
    }

    /// 尚未消费的字节
    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn remaining(&self) -> usize {
        self.payload.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.payload.is_empty()
    }

    /// 标记前 `n` 字节已被解码器消费，返回实际前进的字节数
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.payload.len());
        self.payload.advance(n);
        n
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// 解码后的原始帧，时间戳以帧自己的时间基表示
///
/// `F` 是解码能力给出的不透明帧数据（像素或采样）。
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame<F> {
    pub pts: Option<i64>,
    pub duration: i64,
    pub time_base: Rational,
    pub data: F,
}

impl<F> DecodedFrame<F> {
    pub fn new(data: F, time_base: Rational) -> Self {
        Self {
            pts: None,
            duration: 0,
            time_base,
            data,
        }
    }

    pub fn with_pts(mut self, pts: Option<i64>, duration: i64) -> Self {
        self.pts = pts;
        self.duration = duration;
        self
    }

    /// 显示时间（毫秒）
    pub fn pts_ms(&self) -> Option<i64> {
        self.pts.map(|pts| {
            super::rational::rescale_q_rnd(
                pts,
                self.time_base,
                Rational::new(1, 1000),
                super::rational::RescaleMode::TIMESTAMP,
            )
        })
    }
}

/// 输出流描述（转码目标）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputStream {
    pub index: usize,
    pub time_base: Rational,
}

/// 音频输出规格：交织的 16 位有符号 PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// 每次设备回调请求的采样帧数
    pub samples: u16,
}

impl AudioSpec {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn new(sample_rate: u32, channels: u16, samples: u16) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// 一个采样帧（所有声道）占用的字节数
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * Self::BYTES_PER_SAMPLE
    }

    /// 一次回调请求的字节数
    pub fn callback_bytes(&self) -> usize {
        self.samples as usize * self.frame_bytes()
    }

    /// 每秒字节数
    pub fn byte_rate(&self) -> usize {
        self.sample_rate as usize * self.frame_bytes()
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: i64, // 总时长（毫秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}
