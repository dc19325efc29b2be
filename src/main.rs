use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use log::{info, warn};
use std::time::Duration;

use streamplay::core::{AudioMode, DecodedFrame, PlayerError, SessionConfig, SystemClock, VideoRouteKind};
use streamplay::player::{
    AudioSink, ByteSource, ChunkSource, CpalSink, Demuxer, FfmpegAudioDecoder, FfmpegDemuxer, FfmpegMuxer,
    FfmpegVideoDecoder, MulticastReceiver, Muxer, PaceOutcome, RawVideoEncoder, Renderer, S16Resampler,
    Session, TranscodeStage, Transcoder,
};

type VideoFrame = ffmpeg::util::frame::Video;

/// 宿主通过这个环境变量以 JSON 传入会话配置
const CONFIG_ENV: &str = "STREAMPLAY_CONFIG";
/// 以这个名字作为输入时改为接收组播
const MULTICAST_INPUT: &str = "multicast";

/// 没有窗口时的渲染器：只记录绘制了哪些帧
#[derive(Default)]
struct LoggingRenderer {
    painted: u64,
}

impl Renderer for LoggingRenderer {
    type Frame = VideoFrame;

    fn paint(&mut self, seq: u64, frame: DecodedFrame<VideoFrame>) -> streamplay::core::Result<()> {
        self.painted += 1;
        if self.painted <= 5 || self.painted % 100 == 0 {
            info!(
                "🖼 帧 #{}: {}x{} pts {:?} ms",
                seq,
                frame.data.width(),
                frame.data.height(),
                frame.pts_ms()
            );
        }
        Ok(())
    }
}

fn load_config() -> Result<SessionConfig> {
    match std::env::var(CONFIG_ENV) {
        Ok(json) => SessionConfig::from_json(&json).context("会话配置无效"),
        Err(_) => Ok(SessionConfig::default()),
    }
}

fn open_input(input: &str, config: &SessionConfig) -> Result<(FfmpegDemuxer, Option<MulticastReceiver>)> {
    if input == MULTICAST_INPUT {
        let (feeder, source) = ChunkSource::channel();
        let receiver = MulticastReceiver::start(&config.multicast, feeder)?;
        let source: Box<dyn ByteSource> = Box::new(source);
        let demuxer = FfmpegDemuxer::from_source(source, config.chunk_size)?;
        return Ok((demuxer, Some(receiver)));
    }
    Ok((FfmpegDemuxer::open(input)?, None))
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(input) = args.get(1) else {
        anyhow::bail!(
            "用法: streamplay <输入文件|{}> [输出文件（video_route 为 transcode 时）]",
            MULTICAST_INPUT
        );
    };
    let output = args.get(2);

    info!("🎬 streamplay 启动");
    ffmpeg::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;

    let config = load_config()?;
    let (demuxer, mut receiver) = open_input(input, &config)?;
    let media = demuxer.media_info().clone();
    info!(
        "媒体信息: {} ms, 视频 {} {}x{} @ {:.2} fps, 音频 {} {} Hz/{} 声道",
        media.duration,
        media.video_codec,
        media.width,
        media.height,
        media.fps,
        media.audio_codec,
        media.sample_rate,
        media.channels
    );

    let audio_decoder = match demuxer.audio_stream() {
        Some(stream) => Some(FfmpegAudioDecoder::from_stream(stream, config.device_samples)?),
        None => None,
    };
    let video_decoder = match demuxer.video_stream() {
        Some(stream) => Some(FfmpegVideoDecoder::from_stream(stream)?),
        None => None,
    };

    let mut session = Session::<VideoFrame>::new(config)?;

    if output.is_some() && session.config().video_route != VideoRouteKind::Transcode {
        warn!("视频路径为 {:?}，忽略输出文件参数", session.config().video_route);
    }
    let route = session.configured_route(video_decoder, |decoder| {
        let path = output.ok_or_else(|| PlayerError::ConfigError("转码路径需要输出文件".to_string()))?;
        let picture = decoder
            .picture()
            .ok_or_else(|| PlayerError::EncodeError("视频流缺少画面参数".to_string()))?;
        let encoder = RawVideoEncoder::new(picture, decoder.time_base())?;
        let mut muxer = FfmpegMuxer::create(path)?;
        let stream = muxer.add_stream(&encoder)?;
        let stage: Box<dyn TranscodeStage> = Box::new(Transcoder::new(decoder, encoder, stream));
        let muxer: Box<dyn Muxer> = Box::new(muxer);
        Ok((stage, muxer))
    })?;
    session.start_demux(Box::new(demuxer), route)?;

    let mut sink = match audio_decoder {
        Some(decoder) => {
            let spec = decoder.audio_spec().context("音频流缺少输出参数")?;
            if session.config().audio_mode == AudioMode::Ring {
                info!("音频使用环形缓冲模式（{} 字节）", session.config().ring_capacity);
            }
            let source = session.audio_source(decoder, S16Resampler::new())?;
            let mut sink = CpalSink::open(spec)?;
            sink.start(source)?;
            Some(sink)
        }
        None => {
            warn!("没有音频流，只处理视频");
            None
        }
    };

    let mut pacer = session.frame_pacer(Box::new(SystemClock));
    let mut renderer = LoggingRenderer::default();
    let mut passed_through = 0u64;
    while !session.is_drained() {
        // 包队列路径没有下游消费者，取出计数即可
        while session.video_queue().take().is_some() {
            passed_through += 1;
        }
        if let PaceOutcome::NotDue | PaceOutcome::NothingReady = pacer.poll(&mut renderer) {
            let wait = pacer
                .time_until_due(std::time::Instant::now())
                .clamp(Duration::from_millis(1), Duration::from_millis(5));
            std::thread::sleep(wait);
        }
    }

    if let Some(report) = session.wait_demux() {
        info!(
            "读取结束: {} 个包，{} 帧，{} 个输出包，{} 失败",
            report.units, report.frames, report.muxed, report.failed
        );
        if let Some(e) = report.error {
            warn!("读取线程因错误结束: {}", e);
        }
    }
    if passed_through > 0 {
        info!("视频包队列共取出 {} 个包", passed_through);
    }
    let stats = pacer.stats();
    info!(
        "绘制 {} 帧（渲染失败 {}，空等 {} 次）",
        stats.painted, stats.render_failed, stats.starved
    );

    if let Some(sink) = sink.as_mut() {
        sink.stop();
    }
    if let Some(receiver) = receiver.as_mut() {
        receiver.stop();
    }
    session.teardown();

    info!("✅ 播放结束");
    Ok(())
}
