//! 用替身编解码能力跑通整个会话：读取 → 分发 → 音频回调 / 帧节奏 / 转码输出

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use streamplay::core::{
    AudioMode, CompressedUnit, DecodedFrame, ManualClock, MediaInfo, OutputStream, PlayerError, Rational,
    Result, SessionConfig, StreamMap,
};
use streamplay::player::{
    ByteSource, ChunkSource, DecodeStep, Decoder, Demuxer, Encoded, Encoder, MemorySource, Muxer,
    PaceOutcome, Renderer, Resampler, Session, Transcoder, VideoRoute,
};

const VIDEO: u8 = 0;
const AUDIO: u8 = 1;
const TB: Rational = Rational { num: 1, den: 1000 };

/// 最简单的容器：`[流索引 u8][长度 u16 BE][负载]` 依次排列
fn pack(units: &[(u8, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (stream, payload) in units {
        out.push(*stream);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
    }
    out
}

struct FramedDemuxer {
    source: Box<dyn ByteSource>,
    info: MediaInfo,
    next_pts: i64,
}

impl FramedDemuxer {
    fn new(source: Box<dyn ByteSource>) -> Self {
        Self {
            source,
            info: MediaInfo::default(),
            next_pts: 0,
        }
    }

    /// 读满 `buf`；一开始就读到结尾返回 false
    fn fill(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.source.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(PlayerError::DemuxError("包被截断".to_string()));
            }
            filled += n;
        }
        Ok(true)
    }
}

impl Demuxer for FramedDemuxer {
    fn read_unit(&mut self) -> Result<Option<CompressedUnit>> {
        let mut header = [0u8; 3];
        if !self.fill(&mut header)? {
            return Ok(None);
        }
        let len = u16::from_be_bytes([header[1], header[2]]) as usize;
        let mut payload = vec![0u8; len];
        if !self.fill(&mut payload)? && len > 0 {
            return Err(PlayerError::DemuxError("包被截断".to_string()));
        }

        let pts = self.next_pts;
        self.next_pts += 40;
        Ok(Some(
            CompressedUnit::new(header[0] as usize, TB, payload).with_timestamps(Some(pts), Some(pts), 40),
        ))
    }

    fn streams(&self) -> StreamMap {
        StreamMap::new(Some(VIDEO as usize), Some(AUDIO as usize))
    }

    fn time_base(&self, _stream_index: usize) -> Option<Rational> {
        Some(TB)
    }

    fn media_info(&self) -> &MediaInfo {
        &self.info
    }

    fn description(&self) -> String {
        format!("framed:{}", self.source.description())
    }
}

/// 整包作为一帧
struct PassDecoder;

impl Decoder for PassDecoder {
    type Frame = Bytes;

    fn decode(&mut self, unit: &CompressedUnit) -> Result<DecodeStep<Bytes>> {
        let frame = DecodedFrame::new(unit.payload().clone(), unit.time_base).with_pts(unit.pts, unit.duration);
        Ok(DecodeStep::frame(unit.remaining(), frame))
    }
}

struct PassResampler;

impl Resampler for PassResampler {
    type Frame = Bytes;

    fn resample(&mut self, frame: &DecodedFrame<Bytes>, out: &mut Vec<u8>) -> Result<usize> {
        out.clear();
        out.extend_from_slice(&frame.data);
        Ok(out.len())
    }
}

struct UpperEncoder;

impl Encoder for UpperEncoder {
    type Frame = Bytes;

    fn encode(&mut self, frame: &DecodedFrame<Bytes>) -> Result<Option<Encoded>> {
        let mut encoded = Encoded::new(frame.data.to_ascii_uppercase());
        encoded.is_keyframe = true;
        Ok(Some(encoded))
    }
}

#[derive(Clone, Default)]
struct SharedMuxer {
    units: Arc<Mutex<Vec<CompressedUnit>>>,
    closed: Arc<Mutex<bool>>,
}

impl Muxer for SharedMuxer {
    fn write_unit(&mut self, unit: CompressedUnit) -> Result<()> {
        self.units.lock().push(unit);
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

#[derive(Default)]
struct CollectingRenderer {
    frames: Vec<(u64, Option<i64>, Bytes)>,
}

impl Renderer for CollectingRenderer {
    type Frame = Bytes;

    fn paint(&mut self, seq: u64, frame: DecodedFrame<Bytes>) -> Result<()> {
        let pts = frame.pts_ms();
        self.frames.push((seq, pts, frame.data));
        Ok(())
    }
}

fn sample_stream() -> Vec<u8> {
    pack(&[
        (VIDEO, b"frame-0"),
        (AUDIO, &[1u8; 300]),
        (AUDIO, &[2u8; 300]),
        (VIDEO, b"frame-1"),
        (AUDIO, &[3u8; 100]),
        (VIDEO, b"frame-2"),
    ])
}

#[test]
fn memory_source_plays_audio_and_paces_video() {
    let mut session = Session::<Bytes>::new(SessionConfig::default()).unwrap();
    let demuxer = FramedDemuxer::new(Box::new(MemorySource::new(sample_stream())));
    let route = session.paint_route(Box::new(PassDecoder));
    session.start_demux(Box::new(demuxer), route).unwrap();
    let report = session.wait_demux().unwrap();
    assert_eq!((report.video, report.audio, report.frames), (3, 3, 3));
    assert!(report.error.is_none());

    // 设备每次请求 256 字节
    let mut source = session.audio_source(PassDecoder, PassResampler).unwrap();
    let mut pcm = Vec::new();
    loop {
        let mut out = [0xffu8; 256];
        let fill = source.fill(&mut out);
        pcm.extend_from_slice(&out[..fill.copied]);
        assert!(out[fill.copied..].iter().all(|&b| b == 0));
        if fill.is_underrun() {
            break;
        }
    }
    assert_eq!(pcm.len(), 700);
    assert!(pcm[..300].iter().all(|&b| b == 1));
    assert!(pcm[300..600].iter().all(|&b| b == 2));
    assert!(pcm[600..].iter().all(|&b| b == 3));

    let clock = ManualClock::new();
    let mut pacer = session.frame_pacer(Box::new(clock.clone()));
    let mut renderer = CollectingRenderer::default();
    while renderer.frames.len() < 3 {
        if pacer.poll(&mut renderer) == PaceOutcome::NotDue {
            assert_eq!(pacer.poll(&mut renderer), PaceOutcome::NotDue);
            clock.advance(pacer.interval());
        }
    }
    let pts: Vec<Option<i64>> = renderer.frames.iter().map(|(_, pts, _)| *pts).collect();
    assert_eq!(pts, vec![Some(0), Some(120), Some(200)]);
    assert_eq!(renderer.frames[2].2, Bytes::from_static(b"frame-2"));
    assert!(session.is_drained());
}

#[test]
fn pushed_chunks_feed_ring_mode_session() {
    let config = SessionConfig {
        audio_mode: AudioMode::Ring,
        ring_capacity: 128,
        ..SessionConfig::default()
    };
    let mut session = Session::<Bytes>::new(config).unwrap();

    let (feeder, source) = ChunkSource::channel();
    let demuxer = FramedDemuxer::new(Box::new(source));
    let route = session.queue_route();
    session.start_demux(Box::new(demuxer), route).unwrap();
    let mut pcm_source = session.audio_source(PassDecoder, PassResampler).unwrap();

    // 按任意大小切块推送，包边界与块边界无关
    let bytes = sample_stream();
    let producer = thread::spawn(move || {
        for chunk in bytes.chunks(7) {
            assert!(feeder.feed(chunk.to_vec()));
            thread::sleep(Duration::from_micros(200));
        }
        feeder.finish();
    });

    let mut pcm = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while !session.is_drained() && Instant::now() < deadline {
        let mut out = [0u8; 64];
        let fill = pcm_source.fill(&mut out);
        pcm.extend_from_slice(&out[..fill.copied]);
        thread::sleep(Duration::from_millis(1));
    }
    // 最后一次泵出的数据可能在排空判断之后才被读走
    loop {
        let mut out = [0u8; 64];
        let fill = pcm_source.fill(&mut out);
        if fill.copied == 0 {
            break;
        }
        pcm.extend_from_slice(&out[..fill.copied]);
    }
    producer.join().unwrap();

    assert_eq!(pcm.len(), 700);
    assert!(pcm[..300].iter().all(|&b| b == 1));
    assert!(pcm[600..].iter().all(|&b| b == 3));
    assert_eq!(session.video_queue().len(), 3);

    let teardown = session.teardown();
    assert_eq!(teardown.video_freed, 3);
    assert_eq!(teardown.audio_freed, 0);
}

#[test]
fn transcode_route_rescales_into_output_time_base() {
    let session = Session::<Bytes>::new(SessionConfig::default()).unwrap();
    let muxer = SharedMuxer::default();
    let output = OutputStream {
        index: 0,
        time_base: Rational::new(1, 90000),
    };
    let route = VideoRoute::Transcode {
        stage: Box::new(Transcoder::new(PassDecoder, UpperEncoder, output)),
        muxer: Box::new(muxer.clone()),
    };
    let demuxer = FramedDemuxer::new(Box::new(MemorySource::new(sample_stream())));

    let report = session.demux_loop(Box::new(demuxer), route).run();
    assert_eq!(report.muxed, 3);
    assert!(session.demux_finished());
    assert!(*muxer.closed.lock());
    assert_eq!(session.audio_queue().len(), 3);

    let units = muxer.units.lock();
    let summary: Vec<(&[u8], Option<i64>, i64)> =
        units.iter().map(|u| (u.data(), u.pts, u.duration)).collect();
    assert_eq!(
        summary,
        vec![
            (&b"FRAME-0"[..], Some(0), 3600),
            (&b"FRAME-1"[..], Some(10800), 3600),
            (&b"FRAME-2"[..], Some(18000), 3600),
        ]
    );
    assert!(units.iter().all(|u| u.time_base == output.time_base && u.is_keyframe));
}

#[test]
fn truncated_container_stops_reading_but_keeps_queued_units() {
    let mut bytes = sample_stream();
    bytes.truncate(bytes.len() - 3);

    let mut session = Session::<Bytes>::new(SessionConfig::default()).unwrap();
    let demuxer = FramedDemuxer::new(Box::new(MemorySource::new(bytes)));
    let route = session.queue_route();
    session.start_demux(Box::new(demuxer), route).unwrap();

    let report = session.wait_demux().unwrap();
    assert!(matches!(report.error, Some(PlayerError::DemuxError(_))));
    assert_eq!(session.audio_queue().len(), 3);
    assert_eq!(session.video_queue().len(), 2);
    assert!(session.demux_finished());
}
