//! 单元测试用的编解码替身

use crate::core::{CompressedUnit, DecodedFrame, MediaInfo, PlayerError, Rational, Result, StreamMap};
use crate::player::codec::{DecodeStep, Decoder, Encoded, Encoder, Muxer, Renderer, Resampler};
use crate::player::demuxer_source::Demuxer;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub const MS: Rational = Rational { num: 1, den: 1000 };
pub const MPEG: Rational = Rational { num: 1, den: 90000 };

pub fn unit(stream_index: usize, payload: &[u8]) -> CompressedUnit {
    CompressedUnit::new(stream_index, MS, payload.to_vec())
}

/// 每次最多消费 `chunk` 字节，把消费的字节原样作为帧输出；
/// 以 `BAD` 开头的数据返回解码错误，`chunk == Some(0)` 模拟没有进展的解码器。
pub struct ChunkDecoder {
    pub chunk: Option<usize>,
    /// 每 N 次调用才产出一帧，其余调用只消费数据
    pub every: usize,
    calls: usize,
}

impl ChunkDecoder {
    pub fn whole() -> Self {
        Self {
            chunk: None,
            every: 1,
            calls: 0,
        }
    }

    pub fn chunked(chunk: usize) -> Self {
        Self {
            chunk: Some(chunk),
            every: 1,
            calls: 0,
        }
    }

    pub fn lagging(every: usize) -> Self {
        Self {
            chunk: None,
            every,
            calls: 0,
        }
    }
}

impl Decoder for ChunkDecoder {
    type Frame = Bytes;

    fn decode(&mut self, unit: &CompressedUnit) -> Result<DecodeStep<Bytes>> {
        if unit.data().starts_with(b"BAD") {
            return Err(PlayerError::DecodeError("损坏的数据".to_string()));
        }
        let n = self.chunk.map_or(unit.remaining(), |c| c.min(unit.remaining()));
        self.calls += 1;
        if self.calls % self.every != 0 || n == 0 {
            return Ok(DecodeStep::pending(n));
        }
        let frame = DecodedFrame::new(unit.payload().slice(..n), unit.time_base)
            .with_pts(unit.pts, unit.duration);
        Ok(DecodeStep::frame(n, frame))
    }
}

/// 一个包解出 `parts` 帧：整包消费，只交出第一帧，其余留在内部积压
///
/// `stalling` 预置积压帧，并且积压非空时 `decode` 先交出一帧积压、不消费数据。
pub struct SplitDecoder {
    parts: usize,
    stall_on_backlog: bool,
    backlog: VecDeque<DecodedFrame<Bytes>>,
}

impl SplitDecoder {
    pub fn new(parts: usize) -> Self {
        Self {
            parts: parts.max(1),
            stall_on_backlog: false,
            backlog: VecDeque::new(),
        }
    }

    pub fn stalling(mut self, backlog: &[&[u8]]) -> Self {
        self.stall_on_backlog = true;
        for data in backlog {
            self.backlog
                .push_back(DecodedFrame::new(Bytes::copy_from_slice(data), MS));
        }
        self
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

impl Decoder for SplitDecoder {
    type Frame = Bytes;

    fn decode(&mut self, unit: &CompressedUnit) -> Result<DecodeStep<Bytes>> {
        if self.stall_on_backlog {
            if let Some(frame) = self.backlog.pop_front() {
                return Ok(DecodeStep::frame(0, frame));
            }
        }
        let data = unit.payload().clone();
        let size = data.len().div_ceil(self.parts).max(1);
        let mut start = 0;
        while start < data.len() {
            let end = (start + size).min(data.len());
            self.backlog
                .push_back(DecodedFrame::new(data.slice(start..end), unit.time_base));
            start = end;
        }
        Ok(DecodeStep {
            consumed: data.len(),
            frame: self.backlog.pop_front(),
        })
    }

    fn take_buffered(&mut self) -> Result<Option<DecodedFrame<Bytes>>> {
        Ok(self.backlog.pop_front())
    }
}

/// 原样复制；以 `XR` 开头的帧返回重采样错误
pub struct CopyResampler;

impl Resampler for CopyResampler {
    type Frame = Bytes;

    fn resample(&mut self, frame: &DecodedFrame<Bytes>, out: &mut Vec<u8>) -> Result<usize> {
        if frame.data.starts_with(b"XR") {
            return Err(PlayerError::ResampleError("不支持的采样格式".to_string()));
        }
        out.clear();
        out.extend_from_slice(&frame.data);
        Ok(out.len())
    }
}

/// 带 `delay` 帧延迟的编码器；以 `XE` 开头的帧返回编码错误
pub struct DelayEncoder {
    pub delay: usize,
    buffered: VecDeque<Bytes>,
}

impl DelayEncoder {
    pub fn new(delay: usize) -> Self {
        Self {
            delay,
            buffered: VecDeque::new(),
        }
    }
}

impl Encoder for DelayEncoder {
    type Frame = Bytes;

    fn encode(&mut self, frame: &DecodedFrame<Bytes>) -> Result<Option<Encoded>> {
        if frame.data.starts_with(b"XE") {
            return Err(PlayerError::EncodeError("编码器拒绝该帧".to_string()));
        }
        self.buffered.push_back(frame.data.clone());
        if self.buffered.len() > self.delay {
            Ok(self.buffered.pop_front().map(Encoded::new))
        } else {
            Ok(None)
        }
    }

    fn flush(&mut self) -> Result<Option<Encoded>> {
        Ok(self.buffered.pop_front().map(Encoded::new))
    }
}

#[derive(Clone, Default)]
pub struct RecordingMuxer {
    pub units: Arc<Mutex<Vec<CompressedUnit>>>,
    pub header: Arc<Mutex<bool>>,
    pub trailer: Arc<Mutex<bool>>,
}

impl Muxer for RecordingMuxer {
    fn write_header(&mut self) -> Result<()> {
        *self.header.lock() = true;
        Ok(())
    }

    fn write_unit(&mut self, unit: CompressedUnit) -> Result<()> {
        self.units.lock().push(unit);
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        *self.trailer.lock() = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub painted: Vec<(u64, Bytes)>,
}

impl Renderer for RecordingRenderer {
    type Frame = Bytes;

    fn paint(&mut self, seq: u64, frame: DecodedFrame<Bytes>) -> Result<()> {
        if frame.data.starts_with(b"XP") {
            return Err(PlayerError::RenderError("绘制失败".to_string()));
        }
        self.painted.push((seq, frame.data));
        Ok(())
    }
}

/// 按脚本依次返回数据单元，末尾可选一个读取错误
pub struct ScriptedDemuxer {
    units: VecDeque<CompressedUnit>,
    error_at_end: Option<String>,
    /// 读到这么多个单元之后插入一次损坏包错误
    corrupt_after: Option<usize>,
    read: usize,
    streams: StreamMap,
    info: MediaInfo,
}

impl ScriptedDemuxer {
    pub fn new(units: Vec<CompressedUnit>, streams: StreamMap) -> Self {
        Self {
            units: units.into(),
            error_at_end: None,
            corrupt_after: None,
            read: 0,
            streams,
            info: MediaInfo::default(),
        }
    }

    pub fn failing_after(mut self, message: &str) -> Self {
        self.error_at_end = Some(message.to_string());
        self
    }
    pub fn corrupt_after(mut self, count: usize) -> Self {
        self.corrupt_after = Some(count);
        self
    }
}

impl Demuxer for ScriptedDemuxer {
    fn read_unit(&mut self) -> Result<Option<CompressedUnit>> {
        if self.corrupt_after == Some(self.read) {
            self.corrupt_after = None;
            return Err(PlayerError::DecodeError("损坏的包".to_string()));
        }
        if let Some(unit) = self.units.pop_front() {
            self.read += 1;
            return Ok(Some(unit));
        }
        match self.error_at_end.take() {
            Some(message) => Err(PlayerError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                message,
            ))),
            None => Ok(None),
        }
    }

    fn streams(&self) -> StreamMap {
        self.streams
    }

    fn time_base(&self, _stream_index: usize) -> Option<Rational> {
        Some(MS)
    }

    fn media_info(&self) -> &MediaInfo {
        &self.info
    }

    fn description(&self) -> String {
        "scripted".to_string()
    }
}
