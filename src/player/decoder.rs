use crate::core::{AudioSpec, CompressedUnit, DecodedFrame, PlayerError, Rational, Result};
use crate::player::codec::{DecodeStep, Decoder, Encoded, Encoder, Resampler};
use crate::player::demuxer::{to_ffmpeg, to_rational};
use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::{codec, format, software, util};
use log::{debug, info};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::ops::DerefMut;

/// 解码输出的帧类型（音频或视频）
pub trait FrameKind: Send + 'static {
    type Frame: DerefMut<Target = util::frame::Frame> + Send;

    fn empty() -> Self::Frame;
}

pub struct AudioKind;

impl FrameKind for AudioKind {
    type Frame = util::frame::Audio;

    fn empty() -> Self::Frame {
        util::frame::Audio::empty()
    }
}

pub struct VideoKind;

impl FrameKind for VideoKind {
    type Frame = util::frame::Video;

    fn empty() -> Self::Frame {
        util::frame::Video::empty()
    }
}

/// 视频画面参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    pub format: util::format::Pixel,
}

/// FFmpeg 解码器
///
/// 每次 `decode` 都把整个包送进解码器，解出的帧先进入内部队列，
/// 每次调用交出一帧；一个包解出多帧时，多出的帧在后续调用中交出。
pub struct FfmpegDecoder<K: FrameKind> {
    decoder: codec::decoder::Opened,
    ready: VecDeque<K::Frame>,
    time_base: Rational,
    eof_sent: bool,
    audio: Option<AudioSpec>,
    picture: Option<Picture>,
    _kind: PhantomData<K>,
}

// 解码器只在单个线程中使用（读取线程或音频回调）
unsafe impl<K: FrameKind> Send for FfmpegDecoder<K> {}

pub type FfmpegAudioDecoder = FfmpegDecoder<AudioKind>;
pub type FfmpegVideoDecoder = FfmpegDecoder<VideoKind>;

fn stream_time_base(stream: &format::stream::Stream) -> Rational {
    to_rational(stream.time_base()).unwrap_or(Rational { num: 1, den: 1_000_000 })
}

impl FfmpegDecoder<AudioKind> {
    /// 从音频流创建解码器
    pub fn from_stream(stream: format::stream::Stream, device_samples: u16) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;

        debug!(
            "音频解码器: {} Hz, {} 声道, 格式: {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );
        let spec = AudioSpec::new(decoder.rate(), decoder.channels(), device_samples);

        Ok(Self {
            decoder: decoder.0,
            ready: VecDeque::new(),
            time_base: stream_time_base(&stream),
            eof_sent: false,
            audio: Some(spec),
            picture: None,
            _kind: PhantomData,
        })
    }

    /// 输出规格：源采样率与声道数，交织 S16
    pub fn audio_spec(&self) -> Option<AudioSpec> {
        self.audio
    }
}

impl FfmpegDecoder<VideoKind> {
    /// 从视频流创建软件解码器
    pub fn from_stream(stream: format::stream::Stream) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;

        debug!(
            "视频解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );
        let picture = Picture {
            width: decoder.width(),
            height: decoder.height(),
            format: decoder.format(),
        };

        Ok(Self {
            decoder: decoder.0,
            ready: VecDeque::new(),
            time_base: stream_time_base(&stream),
            eof_sent: false,
            audio: None,
            picture: Some(picture),
            _kind: PhantomData,
        })
    }

    pub fn picture(&self) -> Option<Picture> {
        self.picture
    }
}

impl<K: FrameKind> FfmpegDecoder<K> {
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// 取出解码器里所有已就绪的帧
    fn receive_all(&mut self) -> Result<()> {
        loop {
            let mut frame = K::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => self.ready.push_back(frame),
                Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => return Ok(()),
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(format!("取帧失败: {}", e))),
            }
        }
    }

    fn next_frame(&mut self) -> Option<DecodedFrame<K::Frame>> {
        let frame = self.ready.pop_front()?;
        let pts = frame.timestamp().or_else(|| frame.pts());
        Some(DecodedFrame::new(frame, self.time_base).with_pts(pts, 0))
    }
}

impl<K: FrameKind> Decoder for FfmpegDecoder<K> {
    type Frame = K::Frame;

    fn decode(&mut self, unit: &CompressedUnit) -> Result<DecodeStep<K::Frame>> {
        let consumed = unit.remaining();
        if consumed > 0 {
            let mut packet = ffmpeg::Packet::copy(unit.data());
            packet.set_pts(unit.pts);
            packet.set_dts(unit.dts);
            packet.set_duration(unit.duration);
            self.time_base = unit.time_base;

            let mut sent = self.decoder.send_packet(&packet);
            if matches!(sent, Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN) {
                // 解码器满了：先取走已就绪的帧再送一次
                self.receive_all()?;
                sent = self.decoder.send_packet(&packet);
            }
            match sent {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    debug!("解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                    self.decoder.flush();
                    self.eof_sent = false;
                }
                Err(e) => return Err(PlayerError::DecodeError(format!("送入数据失败: {}", e))),
            }
            self.receive_all()?;
        }

        Ok(DecodeStep {
            consumed,
            frame: self.next_frame(),
        })
    }

    fn take_buffered(&mut self) -> Result<Option<DecodedFrame<K::Frame>>> {
        Ok(self.next_frame())
    }

    fn flush(&mut self) -> Result<Option<DecodedFrame<K::Frame>>> {
        if !self.eof_sent {
            self.eof_sent = true;
            match self.decoder.send_eof() {
                Ok(()) | Err(ffmpeg::Error::Eof) => {}
                Err(e) => return Err(PlayerError::DecodeError(format!("冲刷解码器失败: {}", e))),
            }
            self.receive_all()?;
        }
        Ok(self.next_frame())
    }
}

/// 重采样为交织 S16，保持源采样率和声道布局
pub struct S16Resampler {
    context: Option<software::resampling::Context>,
}

// SwrContext 本身不是 Send，但每个重采样器只在一个线程中使用
unsafe impl Send for S16Resampler {}

impl S16Resampler {
    pub fn new() -> Self {
        Self { context: None }
    }
}

impl Default for S16Resampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Resampler for S16Resampler {
    type Frame = util::frame::Audio;

    fn resample(&mut self, frame: &DecodedFrame<util::frame::Audio>, out: &mut Vec<u8>) -> Result<usize> {
        let source = &frame.data;

        if self.context.is_none() {
            let mut layout = source.channel_layout();
            if layout.is_empty() {
                layout = util::channel_layout::ChannelLayout::default(source.channels() as i32);
            }
            debug!(
                "🔧 初始化音频重采样器: {:?} {}Hz/{}ch → S16",
                source.format(),
                source.rate(),
                source.channels()
            );
            let context = software::resampling::Context::get(
                source.format(),
                layout,
                source.rate(),
                util::format::Sample::I16(util::format::sample::Type::Packed),
                layout,
                source.rate(),
            )
            .map_err(|e| PlayerError::ResampleError(format!("无法创建重采样器: {}", e)))?;
            self.context = Some(context);
        }

        let Some(context) = self.context.as_mut() else {
            return Err(PlayerError::ResampleError("重采样器未初始化".to_string()));
        };
        let mut resampled = util::frame::Audio::empty();
        context
            .run(source, &mut resampled)
            .map_err(|e| PlayerError::ResampleError(e.to_string()))?;

        let plane = resampled.data(0);
        let bytes = (resampled.samples() * resampled.channels() as usize * AudioSpec::BYTES_PER_SAMPLE)
            .min(plane.len());
        out.clear();
        out.extend_from_slice(&plane[..bytes]);
        Ok(bytes)
    }
}

/// rawvideo 编码器：像素格式与解码输出一致，不做缩放
pub struct RawVideoEncoder {
    encoder: codec::encoder::video::Encoder,
    time_base: Rational,
    eof_sent: bool,
}

impl RawVideoEncoder {
    pub fn new(picture: Picture, time_base: Rational) -> Result<Self> {
        let codec = ffmpeg::encoder::find(codec::Id::RAWVIDEO)
            .ok_or_else(|| PlayerError::EncodeError("找不到 rawvideo 编码器".to_string()))?;
        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder.set_width(picture.width);
        encoder.set_height(picture.height);
        encoder.set_format(picture.format);
        encoder.set_time_base(to_ffmpeg(time_base));

        let encoder = encoder
            .open()
            .map_err(|e| PlayerError::EncodeError(format!("无法打开 rawvideo 编码器: {}", e)))?;
        info!(
            "rawvideo 编码器: {}x{} {:?}, 时间基 {}",
            picture.width, picture.height, picture.format, time_base
        );

        Ok(Self {
            encoder,
            time_base,
            eof_sent: false,
        })
    }

    pub fn encoder(&self) -> &codec::encoder::video::Encoder {
        &self.encoder
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    fn receive(&mut self) -> Result<Option<Encoded>> {
        let mut packet = ffmpeg::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => {
                let mut encoded = Encoded::new(packet.data().map(Bytes::copy_from_slice).unwrap_or_default());
                encoded.pts = packet.pts();
                encoded.dts = packet.dts();
                encoded.duration = packet.duration();
                encoded.is_keyframe = packet.is_key();
                Ok(Some(encoded))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(PlayerError::EncodeError(format!("取包失败: {}", e))),
        }
    }
}

// 编码器上下文只在读取线程中使用
unsafe impl Send for RawVideoEncoder {}

impl Encoder for RawVideoEncoder {
    type Frame = util::frame::Video;

    fn encode(&mut self, frame: &DecodedFrame<util::frame::Video>) -> Result<Option<Encoded>> {
        self.encoder
            .send_frame(&frame.data)
            .map_err(|e| PlayerError::EncodeError(format!("送入帧失败: {}", e)))?;
        self.receive()
    }

    fn flush(&mut self) -> Result<Option<Encoded>> {
        if !self.eof_sent {
            self.eof_sent = true;
            match self.encoder.send_eof() {
                Ok(()) | Err(ffmpeg::Error::Eof) => {}
                Err(e) => return Err(PlayerError::EncodeError(format!("冲刷编码器失败: {}", e))),
            }
        }
        self.receive()
    }
}
