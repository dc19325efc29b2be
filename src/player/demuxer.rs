use crate::core::{CompressedUnit, MediaInfo, PlayerError, Rational, Result, StreamMap};
use crate::player::demuxer_source::Demuxer;
use crate::player::source::ByteSource;
use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{ffi, format, media};
use log::{debug, info, warn};
use std::os::raw::{c_int, c_void};
use std::ptr;

/// 自定义 IO 每次向字节源请求的缓冲大小

pub(crate) fn to_rational(r: ffmpeg::Rational) -> Option<Rational> {
    Rational::try_from((r.numerator(), r.denominator())).ok()
}

pub(crate) fn to_ffmpeg(r: Rational) -> ffmpeg::Rational {
    ffmpeg::Rational::new(r.num, r.den)
}

/// 自定义 IO：FFmpeg 通过读回调从 [`ByteSource`] 拉取数据
struct CustomIo {
    avio: *mut ffi::AVIOContext,
    opaque: *mut Box<dyn ByteSource>,
}

// AVIOContext 只在持有解封装器的线程中使用
unsafe impl Send for CustomIo {}

impl CustomIo {
    /// `buffer_size` 是 FFmpeg 每次向字节源请求的最大字节数
    fn new(source: Box<dyn ByteSource>, buffer_size: usize) -> Result<Self> {
        let size = c_int::try_from(buffer_size)
            .ok()
            .filter(|&size| size > 0)
            .ok_or_else(|| PlayerError::ConfigError(format!("无效的读取块大小: {}", buffer_size)))?;
        unsafe {
            let buffer = ffi::av_malloc(buffer_size) as *mut u8;
            if buffer.is_null() {
                return Err(PlayerError::AllocationError("无法分配 AVIO 缓冲".to_string()));
            }

            let opaque = Box::into_raw(Box::new(source));
            let avio = ffi::avio_alloc_context(
                buffer,
                size,
                0,
                opaque as *mut c_void,
                Some(read_packet),
                None,
                None,
            );
            if avio.is_null() {
                ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(opaque));
                return Err(PlayerError::AllocationError("无法创建 AVIO 上下文".to_string()));
            }

            Ok(Self { avio, opaque })
        }
    }
}

impl Drop for CustomIo {
    fn drop(&mut self) {
        unsafe {
            if !self.avio.is_null() {
                // 缓冲可能已被 FFmpeg 重新分配，以上下文里的指针为准
                ffi::av_freep(&mut (*self.avio).buffer as *mut *mut u8 as *mut c_void);
                ffi::avio_context_free(&mut self.avio);
            }
            if !self.opaque.is_null() {
                drop(Box::from_raw(self.opaque));
                self.opaque = ptr::null_mut();
            }
        }
    }
}

unsafe extern "C" fn read_packet(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    if buf_size <= 0 {
        return 0;
    }
    let source = &mut *(opaque as *mut Box<dyn ByteSource>);
    let out = std::slice::from_raw_parts_mut(buf, buf_size as usize);
    match source.read(out) {
        Ok(0) => ffi::AVERROR_EOF,
        Ok(n) => n as c_int,
        Err(e) => {
            warn!("字节源读取失败: {}", e);
            ffi::AVERROR(ffmpeg::util::error::EIO)
        }
    }
}

/// FFmpeg 解封装器：本地文件/URL，或者任意字节源
pub struct FfmpegDemuxer {
    // 字段按声明顺序释放：先关闭输入，再释放自定义 IO
    input_ctx: format::context::Input,
    _io: Option<CustomIo>,
    streams: StreamMap,
    media_info: MediaInfo,
    source: String,
    read_errors: u64,
}

impl FfmpegDemuxer {
    /// 打开媒体文件或 URL
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开文件: {}", path);
        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::DemuxError(format!("无法打开 {}: {}", path, e)))?;
        Self::from_input(input_ctx, None, path.to_string())
    }

    /// 通过自定义 IO 从字节源读取容器，每次最多读取 `chunk_size` 字节
    pub fn from_source(source: Box<dyn ByteSource>, chunk_size: usize) -> Result<Self> {
        let description = source.description();
        info!("正在打开字节源: {}", description);
        let io = CustomIo::new(source, chunk_size)?;

        let input_ctx = unsafe {
            let mut ctx = ffi::avformat_alloc_context();
            if ctx.is_null() {
                return Err(PlayerError::AllocationError("无法创建 AVFormatContext".to_string()));
            }
            (*ctx).pb = io.avio;
            (*ctx).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;

            // 失败时 avformat_open_input 会释放 ctx
            let ret = ffi::avformat_open_input(&mut ctx, ptr::null(), ptr::null(), ptr::null_mut());
            if ret < 0 {
                return Err(PlayerError::DemuxError(format!(
                    "无法识别容器格式: {}",
                    ffmpeg::Error::from(ret)
                )));
            }

            let ret = ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                ffi::avformat_close_input(&mut ctx);
                return Err(PlayerError::DemuxError(format!(
                    "无法读取流信息: {}",
                    ffmpeg::Error::from(ret)
                )));
            }

            format::context::Input::wrap(ctx)
        };

        Self::from_input(input_ctx, Some(io), description)
    }

    fn from_input(input_ctx: format::context::Input, io: Option<CustomIo>, source: String) -> Result<Self> {
        let video = input_ctx.streams().best(media::Type::Video).map(|s| s.index());
        let audio = input_ctx.streams().best(media::Type::Audio).map(|s| s.index());
        if video.is_none() && audio.is_none() {
            return Err(PlayerError::DemuxError("没有可播放的音视频流".to_string()));
        }
        debug!("视频流索引: {:?}", video);
        debug!("音频流索引: {:?}", audio);

        let mut demuxer = Self {
            input_ctx,
            _io: io,
            streams: StreamMap::new(video, audio),
            media_info: MediaInfo::default(),
            source,
            read_errors: 0,
        };
        demuxer.media_info = demuxer.extract_media_info()?;
        Ok(demuxer)
    }

    /// 提取媒体信息（内部使用）
    fn extract_media_info(&self) -> Result<MediaInfo> {
        let mut info = MediaInfo {
            duration: self.input_ctx.duration().max(0) / 1000, // 微秒转毫秒
            audio_codec: "none".to_string(),
            video_codec: "none".to_string(),
            ..MediaInfo::default()
        };

        if let Some(stream) = self.streams.video.and_then(|idx| self.input_ctx.stream(idx)) {
            let parameters = stream.parameters();
            info.video_codec = parameters.id().name().to_string();
            let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
                .decoder()
                .video()?;
            info.width = decoder.width();
            info.height = decoder.height();
            let fps = stream.avg_frame_rate();
            if fps.denominator() != 0 {
                info.fps = fps.numerator() as f64 / fps.denominator() as f64;
            }
        }

        if let Some(stream) = self.streams.audio.and_then(|idx| self.input_ctx.stream(idx)) {
            let parameters = stream.parameters();
            info.audio_codec = parameters.id().name().to_string();
            let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
                .decoder()
                .audio()?;
            info.sample_rate = decoder.rate();
            info.channels = decoder.channels();
        }

        Ok(info)
    }

    /// 获取流（用于创建解码器）
    pub fn stream(&self, index: usize) -> Option<format::stream::Stream> {
        self.input_ctx.stream(index)
    }

    pub fn video_stream(&self) -> Option<format::stream::Stream> {
        self.streams.video.and_then(|idx| self.input_ctx.stream(idx))
    }

    pub fn audio_stream(&self) -> Option<format::stream::Stream> {
        self.streams.audio.and_then(|idx| self.input_ctx.stream(idx))
    }
}

impl Demuxer for FfmpegDemuxer {
    fn read_unit(&mut self) -> Result<Option<CompressedUnit>> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match packet.read(&mut self.input_ctx) {
                Ok(()) => break,
                Err(ffmpeg::Error::Eof) => return Ok(None),
                // 单个损坏的包跳过，连续失败才认为流已不可读
                Err(e) if self.read_errors < 16 => {
                    self.read_errors += 1;
                    warn!("读取包失败（已跳过）: {}", e);
                }
                Err(e) => return Err(PlayerError::DemuxError(format!("读取包失败: {}", e))),
            }
        }
        self.read_errors = 0;

        let stream_index = packet.stream();
        let time_base = self
            .input_ctx
            .stream(stream_index)
            .and_then(|s| to_rational(s.time_base()))
            .unwrap_or(Rational { num: 1, den: 1_000_000 });
        let payload = packet.data().map(Bytes::copy_from_slice).unwrap_or_default();

        let mut unit = CompressedUnit::new(stream_index, time_base, payload).with_timestamps(
            packet.pts(),
            packet.dts(),
            packet.duration(),
        );
        unit.pos = (packet.position() >= 0).then(|| packet.position() as i64);
        unit.is_keyframe = packet.is_key();
        Ok(Some(unit))
    }

    fn streams(&self) -> StreamMap {
        self.streams
    }

    fn time_base(&self, stream_index: usize) -> Option<Rational> {
        self.input_ctx
            .stream(stream_index)
            .and_then(|s| to_rational(s.time_base()))
    }

    fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source)
    }
}
