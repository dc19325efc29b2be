use crate::core::{
    AudioMode, CompressedUnit, DecodedFrame, Result, SessionConfig, VideoRouteKind, WallClock,
};
use crate::player::audio_output::{pcm_ring, AudioCallback, AudioPump, PcmSource, PumpHandle};
use crate::player::audio_state::AudioState;
use crate::player::codec::{Decoder, Muxer, Resampler};
use crate::player::demuxer_source::Demuxer;
use crate::player::demuxer_thread::{DemuxLoop, DemuxReport, DemuxThread, VideoRoute};
use crate::player::frame_pacer::FramePacer;
use crate::player::log_ctx;
use crate::player::packet_queue::PacketQueue;
use crate::player::transcode::TranscodeStage;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 拆除会话时各队列释放的元素个数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub audio_freed: usize,
    pub video_freed: usize,
    pub frames_freed: usize,
}

/// 播放会话：持有一次播放用到的全部共享状态
///
/// 读取线程、音频回调（或音频泵）、渲染线程通过会话拿到同一组队列；
/// `F` 是绘制路径解码出的视频帧类型。
pub struct Session<F> {
    config: SessionConfig,
    audio_packets: Arc<PacketQueue<CompressedUnit>>,
    video_packets: Arc<PacketQueue<CompressedUnit>>,
    frames: Arc<PacketQueue<DecodedFrame<F>>>,
    demux_finished: Arc<AtomicBool>,
    demux: Option<DemuxThread>,
    pump: Option<PumpHandle>,
    torn_down: bool,
}

impl<F> Session<F> {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "{} 🎮 创建播放会话（音频 {:?}，视频 {:?}，{} fps）",
            log_ctx(),
            config.audio_mode,
            config.video_route,
            config.fps
        );

        Ok(Self {
            audio_packets: Arc::new(PacketQueue::with_policy("audio", config.audio_policy)),
            video_packets: Arc::new(PacketQueue::with_policy("video", config.video_policy)),
            frames: Arc::new(PacketQueue::with_policy("frames", config.video_policy)),
            config,
            demux_finished: Arc::new(AtomicBool::new(false)),
            demux: None,
            pump: None,
            torn_down: false,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn audio_queue(&self) -> &Arc<PacketQueue<CompressedUnit>> {
        &self.audio_packets
    }

    pub fn video_queue(&self) -> &Arc<PacketQueue<CompressedUnit>> {
        &self.video_packets
    }

    pub fn frame_queue(&self) -> &Arc<PacketQueue<DecodedFrame<F>>> {
        &self.frames
    }

    pub fn demux_finished(&self) -> bool {
        self.demux_finished.load(Ordering::Acquire)
    }

    /// 视频包原样进入会话的视频包队列
    pub fn queue_route(&self) -> VideoRoute<F> {
        VideoRoute::Queue(self.video_packets.clone())
    }

    /// 视频在读取线程解码，帧进入会话的帧队列
    pub fn paint_route(&self, decoder: Box<dyn Decoder<Frame = F>>) -> VideoRoute<F> {
        VideoRoute::Paint {
            decoder,
            frames: self.frames.clone(),
        }
    }

    /// 按配置的 `video_route` 构造视频去向
    ///
    /// 没有视频解码器（没有视频流）时丢弃视频包；`Transcode` 由 `transcode`
    /// 用解码器搭建转码级和输出容器。
    pub fn configured_route<D, T>(&self, decoder: Option<D>, transcode: T) -> Result<VideoRoute<F>>
    where
        D: Decoder<Frame = F> + 'static,
        T: FnOnce(D) -> Result<(Box<dyn TranscodeStage>, Box<dyn Muxer>)>,
    {
        let Some(decoder) = decoder else {
            return Ok(VideoRoute::Discard);
        };
        let route = match self.config.video_route {
            VideoRouteKind::Queue => self.queue_route(),
            VideoRouteKind::Paint => self.paint_route(Box::new(decoder)),
            VideoRouteKind::Transcode => {
                let (stage, muxer) = transcode(decoder)?;
                VideoRoute::Transcode { stage, muxer }
            }
        };
        debug!("{} 视频路径: {}", log_ctx(), route.name());
        Ok(route)
    }

    /// 等待读取线程结束
    pub fn wait_demux(&mut self) -> Option<DemuxReport> {
        self.demux.take().and_then(|thread| thread.join())
    }

    pub fn audio_state<D, R>(&self, decoder: D, resampler: R) -> AudioState<D, R>
    where
        D: Decoder,
        R: Resampler<Frame = D::Frame>,
    {
        AudioState::new(decoder, resampler, self.audio_packets.clone())
    }

    /// 按配置的音频模式构造设备回调的数据来源
    ///
    /// `Ring` 模式下同时启动音频泵线程，由会话负责停止。
    pub fn audio_source<D, R>(&mut self, decoder: D, resampler: R) -> Result<Box<dyn PcmSource>>
    where
        D: Decoder + 'static,
        R: Resampler<Frame = D::Frame> + 'static,
    {
        let state = self.audio_state(decoder, resampler);
        match self.config.audio_mode {
            AudioMode::Pull => Ok(Box::new(AudioCallback::new(state))),
            AudioMode::Ring => {
                if let Some(old) = self.pump.take() {
                    old.stop();
                    old.join();
                }
                let (writer, reader) = pcm_ring(self.config.ring_capacity);
                let pump = AudioPump::new(state, writer, self.demux_finished.clone()).spawn()?;
                self.pump = Some(pump);
                Ok(Box::new(reader))
            }
        }
    }

    pub fn frame_pacer(&self, clock: Box<dyn WallClock>) -> FramePacer<F> {
        FramePacer::new(self.frames.clone(), self.config.fps, clock)
    }

    /// 读取结束且所有队列都已消费完
    pub fn is_drained(&self) -> bool {
        self.demux_finished()
            && self.audio_packets.is_empty()
            && self.video_packets.is_empty()
            && self.frames.is_empty()
            && self.pump.as_ref().map_or(true, |p| p.is_finished())
    }

    /// 停止所有线程并释放队列中剩余的数据
    pub fn teardown(&mut self) -> TeardownReport {
        if self.torn_down {
            return TeardownReport::default();
        }
        self.torn_down = true;
        info!("{} 🛑 拆除播放会话", log_ctx());

        if let Some(demux) = self.demux.take() {
            demux.stop();
            demux.join();
        }
        if let Some(pump) = self.pump.take() {
            pump.stop();
            pump.join();
        }

        let wait = Duration::from_millis(self.config.teardown_wait_ms);
        let report = TeardownReport {
            audio_freed: self.audio_packets.close(wait),
            video_freed: self.video_packets.close(wait),
            frames_freed: self.frames.close(wait),
        };
        info!(
            "{} ✅ 会话已拆除（释放 {} 个音频包，{} 个视频包，{} 帧）",
            log_ctx(),
            report.audio_freed,
            report.video_freed,
            report.frames_freed
        );
        report
    }
}

impl<F: Send + 'static> Session<F> {
    /// 构造接好会话队列和结束标志的读取循环（不启动线程）
    pub fn demux_loop(&self, demuxer: Box<dyn Demuxer>, video: VideoRoute<F>) -> DemuxLoop<F> {
        DemuxLoop::new(demuxer, Some(self.audio_packets.clone()), video)
            .with_finished_flag(self.demux_finished.clone())
    }

    /// 在独立线程启动读取循环
    pub fn start_demux(&mut self, demuxer: Box<dyn Demuxer>, video: VideoRoute<F>) -> Result<()> {
        if self.demux.is_some() {
            warn!("{} 读取线程已在运行，忽略重复启动", log_ctx());
            return Ok(());
        }
        self.demux = Some(self.demux_loop(demuxer, video).spawn()?);
        Ok(())
    }
}

impl<F> Drop for Session<F> {
    fn drop(&mut self) {
        self.teardown();
    }
}
