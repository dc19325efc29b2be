use crate::core::{CompressedUnit, DecodedFrame, PlayerError, Result, StreamRole};
use crate::player::codec::{Decoder, Muxer};
use crate::player::demuxer_source::Demuxer;
use crate::player::log_ctx;
use crate::player::packet_queue::PacketQueue;
use crate::player::transcode::{TranscodeOutcome, TranscodeStage};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

// 日志节流：前 N 个包逐个打印，之后每 100 个打印一次
const LOG_FIRST_N: u64 = 5;

fn should_log(count: u64) -> bool {
    count <= LOG_FIRST_N || count % 100 == 0
}

/// 视频包的去向
pub enum VideoRoute<F> {
    /// 原样放进视频包队列
    Queue(Arc<PacketQueue<CompressedUnit>>),
    /// 在读取线程内同步解码，解码后的帧交给帧节奏控制
    Paint {
        decoder: Box<dyn Decoder<Frame = F>>,
        frames: Arc<PacketQueue<DecodedFrame<F>>>,
    },
    /// 同步转码并写入输出容器
    Transcode {
        stage: Box<dyn TranscodeStage>,
        muxer: Box<dyn Muxer>,
    },
    /// 没有视频消费者
    Discard,
}

impl<F> VideoRoute<F> {
    pub fn name(&self) -> &'static str {
        match self {
            VideoRoute::Queue(_) => "queue",
            VideoRoute::Paint { .. } => "paint",
            VideoRoute::Transcode { .. } => "transcode",
            VideoRoute::Discard => "discard",
        }
    }
}

/// 读取循环结束时的统计
#[derive(Debug, Default)]
pub struct DemuxReport {
    pub units: u64,
    pub audio: u64,
    pub video: u64,
    /// 不属于已选流的包
    pub discarded: u64,
    /// 队列已关闭或按策略丢弃
    pub dropped: u64,
    /// 绘制路径解码出的帧
    pub frames: u64,
    /// 转码路径写入输出容器的包
    pub muxed: u64,
    /// 单个包的解码/转码/写入失败
    pub failed: u64,
    /// 由 stop 标志提前结束
    pub stopped: bool,
    /// 导致循环终止的读取错误
    pub error: Option<PlayerError>,
}

/// 读取循环：从 Demuxer 取包，按流索引分发
pub struct DemuxLoop<F> {
    demuxer: Box<dyn Demuxer>,
    audio: Option<Arc<PacketQueue<CompressedUnit>>>,
    video: VideoRoute<F>,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl<F: Send + 'static> DemuxLoop<F> {
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        audio: Option<Arc<PacketQueue<CompressedUnit>>>,
        video: VideoRoute<F>,
    ) -> Self {
        Self {
            demuxer,
            audio,
            video,
            stop: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 使用外部的结束标志（通常由会话持有，音频泵据此判断何时退出）
    pub fn with_finished_flag(mut self, finished: Arc<AtomicBool>) -> Self {
        self.finished = finished;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }

    /// 运行到流结束、读取出错或收到停止信号；退出时置位结束标志
    pub fn run(&mut self) -> DemuxReport {
        info!(
            "{} 🎬 读取循环启动: {}（视频路径 {}）",
            log_ctx(),
            self.demuxer.description(),
            self.video.name()
        );
        let mut report = DemuxReport::default();

        if let VideoRoute::Transcode { muxer, .. } = &mut self.video {
            if let Err(e) = muxer.write_header() {
                error!("{} ❌ 写入输出文件头失败: {}", log_ctx(), e);
                report.error = Some(e);
                self.finished.store(true, Ordering::Release);
                return report;
            }
        }

        self.read_all(&mut report);
        self.finish_route(&mut report);

        info!(
            "{} 🛑 读取循环退出（共 {} 个包：{} 视频，{} 音频，{} 丢弃，{} 失败）",
            log_ctx(),
            report.units,
            report.video,
            report.audio,
            report.discarded,
            report.failed
        );
        self.finished.store(true, Ordering::Release);
        report
    }

    fn read_all(&mut self, report: &mut DemuxReport) {
        let streams = self.demuxer.streams();

        loop {
            if self.stop.load(Ordering::Acquire) {
                info!("{} ⏹ 读取循环收到停止信号", log_ctx());
                report.stopped = true;
                return;
            }

            let unit = match self.demuxer.read_unit() {
                Ok(Some(unit)) => unit,
                Ok(None) => {
                    info!("{} 📄 到达流末尾", log_ctx());
                    return;
                }
                Err(e) if e.is_per_unit() => {
                    report.failed += 1;
                    warn!("{} 跳过损坏的包: {}", log_ctx(), e);
                    continue;
                }
                Err(e) => {
                    // 已入队的包留给下游继续消费
                    error!("{} ❌ 读取包失败: {}", log_ctx(), e);
                    report.error = Some(e);
                    return;
                }
            };
            report.units += 1;

            match streams.classify(unit.stream_index) {
                Some(StreamRole::Audio) => {
                    report.audio += 1;
                    if should_log(report.audio) {
                        debug!(
                            "{} 🔊 音频包 #{}（total {}）",
                            log_ctx(),
                            report.audio,
                            report.units
                        );
                    }
                    match &self.audio {
                        Some(queue) => {
                            if queue.append(unit).is_none() {
                                report.dropped += 1;
                            }
                        }
                        None => report.discarded += 1,
                    }
                }
                Some(StreamRole::Video) => {
                    report.video += 1;
                    if should_log(report.video) {
                        debug!(
                            "{} 📦 视频包 #{}（total {}）",
                            log_ctx(),
                            report.video,
                            report.units
                        );
                    }
                    self.route_video(unit, report);
                }
                None => report.discarded += 1,
            }
        }
    }

    fn route_video(&mut self, mut unit: CompressedUnit, report: &mut DemuxReport) {
        match &mut self.video {
            VideoRoute::Queue(queue) => {
                if queue.append(unit).is_none() {
                    report.dropped += 1;
                }
            }
            VideoRoute::Paint { decoder, frames } => {
                while !unit.is_exhausted() {
                    let step = match decoder.decode(&unit) {
                        Ok(step) => step,
                        Err(e) => {
                            report.failed += 1;
                            warn!("{} 视频解码失败，跳过该包: {}", log_ctx(), e);
                            return;
                        }
                    };
                    let consumed = unit.consume(step.consumed);
                    let Some(frame) = step.frame else {
                        if consumed == 0 {
                            report.failed += 1;
                            warn!("{} 视频解码器没有消费任何数据，跳过该包", log_ctx());
                            return;
                        }
                        continue;
                    };
                    // 先交出之前积压的帧时可能一个字节都不消费
                    report.frames += 1;
                    if frames.append(frame).is_none() {
                        report.dropped += 1;
                    }
                }
                // 一个包解出多帧时，其余的帧留在解码器里
                loop {
                    match decoder.take_buffered() {
                        Ok(Some(frame)) => {
                            report.frames += 1;
                            if frames.append(frame).is_none() {
                                report.dropped += 1;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            report.failed += 1;
                            warn!("{} 取出积压的视频帧失败: {}", log_ctx(), e);
                            break;
                        }
                    }
                }
            }
            VideoRoute::Transcode { stage, muxer } => match stage.transcode(&unit) {
                TranscodeOutcome::Produced(out) => match muxer.write_unit(out) {
                    Ok(()) => report.muxed += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!("{} 写入输出包失败: {}", log_ctx(), e);
                    }
                },
                TranscodeOutcome::Pending => {}
                TranscodeOutcome::Failed(_) => report.failed += 1,
            },
            VideoRoute::Discard => report.discarded += 1,
        }
    }

    /// 流结束后的收尾：冲刷解码器/编码器，写文件尾
    fn finish_route(&mut self, report: &mut DemuxReport) {
        match &mut self.video {
            VideoRoute::Paint { decoder, frames } => loop {
                match decoder.flush() {
                    Ok(Some(frame)) => {
                        report.frames += 1;
                        if frames.append(frame).is_none() {
                            report.dropped += 1;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("{} 冲刷视频解码器失败: {}", log_ctx(), e);
                        break;
                    }
                }
            },
            VideoRoute::Transcode { stage, muxer } => {
                for out in stage.flush() {
                    match muxer.write_unit(out) {
                        Ok(()) => report.muxed += 1,
                        Err(e) => {
                            report.failed += 1;
                            warn!("{} 写入冲刷包失败: {}", log_ctx(), e);
                        }
                    }
                }
                if let Err(e) = muxer.write_trailer() {
                    error!("{} ❌ 写入输出文件尾失败: {}", log_ctx(), e);
                    if report.error.is_none() {
                        report.error = Some(e);
                    }
                }
            }
            VideoRoute::Queue(_) | VideoRoute::Discard => {}
        }
    }

    /// 在独立线程运行
    pub fn spawn(self) -> Result<DemuxThread> {
        let stop = self.stop.clone();
        let finished = self.finished.clone();
        let mut demux = self;
        let handle = thread::Builder::new()
            .name("demux".to_string())
            .spawn(move || demux.run())?;
        Ok(DemuxThread {
            handle: Some(handle),
            stop,
            finished,
        })
    }
}

/// 读取线程句柄
pub struct DemuxThread {
    handle: Option<JoinHandle<DemuxReport>>,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl DemuxThread {
    /// 请求停止；循环在两次读取之间检查该标志
    pub fn stop(&self) {
        info!("{} 🛑 DemuxThread::stop() called", log_ctx());
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// 等待线程退出；线程 panic 时返回 `None`
    pub fn join(mut self) -> Option<DemuxReport> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                error!("{} ❌ 读取线程 panic", log_ctx());
                self.finished.store(true, Ordering::Release);
                None
            }
        }
    }
}

impl Drop for DemuxThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!("{} ⚠ DemuxThread 被 drop，但未调用 join()，正在尝试停止", log_ctx());
            self.stop.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OutputStream, StreamMap};
    use crate::player::test_support::{
        unit, ChunkDecoder, DelayEncoder, RecordingMuxer, ScriptedDemuxer, SplitDecoder, MPEG,
    };
    use crate::player::transcode::Transcoder;
    use bytes::Bytes;

    const VIDEO: usize = 0;
    const AUDIO: usize = 1;

    fn streams() -> StreamMap {
        StreamMap::new(Some(VIDEO), Some(AUDIO))
    }

    fn queue() -> Arc<PacketQueue<CompressedUnit>> {
        Arc::new(PacketQueue::new("test"))
    }

    #[test]
    fn routes_units_by_stream_index() {
        let demuxer = ScriptedDemuxer::new(
            vec![
                unit(VIDEO, b"v0"),
                unit(AUDIO, b"a0"),
                unit(7, b"subtitle"),
                unit(AUDIO, b"a1"),
                unit(VIDEO, b"v1"),
            ],
            streams(),
        );
        let audio = queue();
        let video = queue();
        let mut demux: DemuxLoop<Bytes> = DemuxLoop::new(
            Box::new(demuxer),
            Some(audio.clone()),
            VideoRoute::Queue(video.clone()),
        );

        let report = demux.run();
        assert_eq!(report.units, 5);
        assert_eq!(report.audio, 2);
        assert_eq!(report.video, 2);
        assert_eq!(report.discarded, 1);
        assert!(report.error.is_none());
        assert!(demux.finished_flag().load(Ordering::Acquire));

        assert_eq!(audio.take().unwrap().item.data(), b"a0");
        assert_eq!(audio.take().unwrap().item.data(), b"a1");
        assert_eq!(video.take().unwrap().item.data(), b"v0");
        assert_eq!(video.take().unwrap().item.data(), b"v1");
    }

    #[test]
    fn read_error_ends_loop_and_keeps_queued_units() {
        let demuxer = ScriptedDemuxer::new(vec![unit(AUDIO, b"a0")], streams())
            .failing_after("连接被重置");
        let audio = queue();
        let mut demux: DemuxLoop<Bytes> =
            DemuxLoop::new(Box::new(demuxer), Some(audio.clone()), VideoRoute::Discard);

        let report = demux.run();
        assert!(matches!(report.error, Some(PlayerError::IoError(_))));
        assert_eq!(audio.len(), 1);
        assert!(demux.finished_flag().load(Ordering::Acquire));
    }

    #[test]
    fn paint_route_decodes_into_frame_queue() {
        let demuxer = ScriptedDemuxer::new(
            vec![
                unit(VIDEO, b"frame-0"),
                unit(VIDEO, b"BAD"),
                unit(VIDEO, b"frame-1"),
            ],
            streams(),
        );
        let frames = Arc::new(PacketQueue::new("frames"));
        let mut demux = DemuxLoop::new(
            Box::new(demuxer),
            None,
            VideoRoute::Paint {
                decoder: Box::new(ChunkDecoder::whole()),
                frames: frames.clone(),
            },
        );

        let report = demux.run();
        assert_eq!(report.frames, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(frames.take().unwrap().item.data, Bytes::from_static(b"frame-0"));
        assert_eq!(frames.take().unwrap().item.data, Bytes::from_static(b"frame-1"));
    }

    #[test]
    fn paint_route_handles_multi_step_decode() {
        let demuxer = ScriptedDemuxer::new(vec![unit(VIDEO, b"abcdef")], streams());
        let frames = Arc::new(PacketQueue::new("frames"));
        let mut demux = DemuxLoop::new(
            Box::new(demuxer),
            None,
            VideoRoute::Paint {
                decoder: Box::new(ChunkDecoder::chunked(4)),
                frames: frames.clone(),
            },
        );

        assert_eq!(demux.run().frames, 2);
        assert_eq!(frames.take().unwrap().item.data, Bytes::from_static(b"abcd"));
        assert_eq!(frames.take().unwrap().item.data, Bytes::from_static(b"ef"));
    }

    fn paint_frames(frames: &PacketQueue<DecodedFrame<Bytes>>) -> Vec<Bytes> {
        std::iter::from_fn(|| frames.take().map(|node| node.item.data)).collect()
    }

    #[test]
    fn paint_route_keeps_decoding_after_backlog_frame() {
        let demuxer = ScriptedDemuxer::new(vec![unit(VIDEO, b"abcd")], streams());
        let frames = Arc::new(PacketQueue::new("frames"));
        let mut demux = DemuxLoop::new(
            Box::new(demuxer),
            None,
            VideoRoute::Paint {
                // 第一步交出积压帧、消费 0 字节
                decoder: Box::new(SplitDecoder::new(1).stalling(&[&b"old"[..]])),
                frames: frames.clone(),
            },
        );

        let report = demux.run();
        assert_eq!(report.frames, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(
            paint_frames(&frames),
            vec![Bytes::from_static(b"old"), Bytes::from_static(b"abcd")]
        );
    }

    #[test]
    fn paint_route_collects_every_frame_of_a_unit() {
        let demuxer = ScriptedDemuxer::new(
            vec![unit(VIDEO, b"aabbcc"), unit(VIDEO, b"ddeeff")],
            streams(),
        );
        let frames = Arc::new(PacketQueue::new("frames"));
        let mut demux = DemuxLoop::new(
            Box::new(demuxer),
            None,
            VideoRoute::Paint {
                decoder: Box::new(SplitDecoder::new(3)),
                frames: frames.clone(),
            },
        );

        let report = demux.run();
        assert_eq!(report.frames, 6);
        let expected: Vec<Bytes> = [b"aa", b"bb", b"cc", b"dd", b"ee", b"ff"]
            .into_iter()
            .map(|chunk| Bytes::from_static(chunk))
            .collect();
        assert_eq!(paint_frames(&frames), expected);
    }

    #[test]
    fn corrupt_unit_is_skipped_and_reading_continues() {
        let demuxer = ScriptedDemuxer::new(
            vec![unit(AUDIO, b"a0"), unit(AUDIO, b"a1")],
            streams(),
        )
        .corrupt_after(1);
        let audio = queue();
        let mut demux: DemuxLoop<Bytes> =
            DemuxLoop::new(Box::new(demuxer), Some(audio.clone()), VideoRoute::Discard);

        let report = demux.run();
        assert!(report.error.is_none());
        assert_eq!(report.failed, 1);
        assert_eq!(report.audio, 2);
        assert_eq!(audio.len(), 2);
    }

    #[test]
    fn transcode_route_writes_header_units_and_trailer() {
        let demuxer = ScriptedDemuxer::new(
            vec![
                unit(VIDEO, b"v0").with_timestamps(Some(0), Some(0), 40),
                unit(AUDIO, b"a0"),
                unit(VIDEO, b"v1").with_timestamps(Some(40), Some(40), 40),
                unit(VIDEO, b"v2").with_timestamps(Some(80), Some(80), 40),
            ],
            streams(),
        );
        let muxer = RecordingMuxer::default();
        let stage = Transcoder::new(
            ChunkDecoder::whole(),
            DelayEncoder::new(1),
            OutputStream {
                index: 0,
                time_base: MPEG,
            },
        );
        let audio = queue();
        let mut demux: DemuxLoop<Bytes> = DemuxLoop::new(
            Box::new(demuxer),
            Some(audio.clone()),
            VideoRoute::Transcode {
                stage: Box::new(stage),
                muxer: Box::new(muxer.clone()),
            },
        );

        let report = demux.run();
        assert_eq!(report.muxed, 3);
        assert!(*muxer.header.lock());
        assert!(*muxer.trailer.lock());
        assert_eq!(audio.len(), 1);

        let units = muxer.units.lock();
        let payloads: Vec<&[u8]> = units.iter().map(|u| u.data()).collect();
        assert_eq!(payloads, vec![&b"v0"[..], &b"v1"[..], &b"v2"[..]]);
        assert_eq!(units[0].pts, Some(3600));
        assert_eq!(units[1].pts, Some(7200));
    }

    #[test]
    fn stop_flag_ends_loop_before_next_read() {
        let demuxer = ScriptedDemuxer::new(vec![unit(AUDIO, b"a0"), unit(AUDIO, b"a1")], streams());
        let audio = queue();
        let mut demux: DemuxLoop<Bytes> =
            DemuxLoop::new(Box::new(demuxer), Some(audio.clone()), VideoRoute::Discard);
        demux.stop_flag().store(true, Ordering::Release);

        let report = demux.run();
        assert!(report.stopped);
        assert_eq!(report.units, 0);
        assert!(audio.is_empty());
    }

    #[test]
    fn closed_queue_counts_as_dropped() {
        let demuxer = ScriptedDemuxer::new(vec![unit(AUDIO, b"a0")], streams());
        let audio = queue();
        audio.close(std::time::Duration::from_millis(10));
        let mut demux: DemuxLoop<Bytes> =
            DemuxLoop::new(Box::new(demuxer), Some(audio), VideoRoute::Discard);
        assert_eq!(demux.run().dropped, 1);
    }

    #[test]
    fn thread_sets_shared_finished_flag() {
        let demuxer = ScriptedDemuxer::new(vec![unit(AUDIO, b"a0")], streams());
        let finished = Arc::new(AtomicBool::new(false));
        let audio = queue();
        let thread = DemuxLoop::<Bytes>::new(Box::new(demuxer), Some(audio.clone()), VideoRoute::Discard)
            .with_finished_flag(finished.clone())
            .spawn()
            .unwrap();

        let report = thread.join().unwrap();
        assert_eq!(report.audio, 1);
        assert!(finished.load(Ordering::Acquire));
        assert_eq!(audio.len(), 1);
    }
}
