use crate::core::{AudioSpec, Result};
use crate::player::audio_state::{AudioState, RefillError};
use crate::player::codec::{Decoder, Resampler};
use crate::player::log_ctx;
use crossbeam::utils::Backoff;
use log::{debug, info, warn};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LOG_FIRST_N: u64 = 5;

/// 一次设备回调的填充结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillReport {
    /// 写入的真实 PCM 字节数
    pub copied: usize,
    /// 末尾补零的字节数
    pub silence: usize,
}

impl FillReport {
    pub fn is_underrun(&self) -> bool {
        self.silence > 0
    }
}

/// 设备回调的数据来源
///
/// `fill` 必须把 `out` 整个写满：数据不够时剩余部分写 0（静音）。
pub trait PcmSource: Send {
    fn fill(&mut self, out: &mut [u8]) -> FillReport;
}

/// 音频输出设备能力
pub trait AudioSink {
    /// 打开设备并开始回调 `source`
    fn start(&mut self, source: Box<dyn PcmSource>) -> Result<()>;

    fn stop(&mut self);

    /// 设备实际使用的输出参数
    fn spec(&self) -> AudioSpec;
}

fn zero_fill(out: &mut [u8]) {
    out.iter_mut().for_each(|b| *b = 0);
}

/// 拉取模式：设备回调里直接解码
///
/// 每次回调都可能触发解码和重采样，只适合解码开销很小的场景；
/// 实时性要求高时使用 [`PcmReader`] + [`AudioPump`]。
pub struct AudioCallback<D, R>
where
    D: Decoder,
    R: Resampler<Frame = D::Frame>,
{
    state: AudioState<D, R>,
    underruns: u64,
}

impl<D, R> AudioCallback<D, R>
where
    D: Decoder,
    R: Resampler<Frame = D::Frame>,
{
    pub fn new(state: AudioState<D, R>) -> Self {
        Self {
            state,
            underruns: 0,
        }
    }

    pub fn state(&self) -> &AudioState<D, R> {
        &self.state
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// 用解码后的 PCM 填满 `out`
    ///
    /// 缓冲耗尽就补充一次；补充失败时剩余部分全部写 0 并立即返回。
    pub fn fill(&mut self, out: &mut [u8]) -> FillReport {
        let mut written = 0;

        while written < out.len() {
            if self.state.is_exhausted() {
                if let Err(e) = self.state.refill() {
                    let silence = out.len() - written;
                    zero_fill(&mut out[written..]);
                    self.note_underrun(silence, &e);
                    return FillReport {
                        copied: written,
                        silence,
                    };
                }
            }
            written += self.state.read_into(&mut out[written..]);
        }

        FillReport {
            copied: written,
            silence: 0,
        }
    }

    fn note_underrun(&mut self, silence: usize, cause: &RefillError) {
        self.underruns += 1;
        if self.underruns <= LOG_FIRST_N || self.underruns % 100 == 0 {
            warn!(
                "🔇 音频欠载 #{}：补 {} 字节静音（{}）",
                self.underruns, silence, cause
            );
        }
    }
}

impl<D, R> PcmSource for AudioCallback<D, R>
where
    D: Decoder,
    R: Resampler<Frame = D::Frame>,
{
    fn fill(&mut self, out: &mut [u8]) -> FillReport {
        AudioCallback::fill(self, out)
    }
}

/// 创建一对 PCM 环形缓冲的读写端（单生产者单消费者，无锁）
pub fn pcm_ring(capacity: usize) -> (PcmWriter, PcmReader) {
    let (producer, consumer) = HeapRb::<u8>::new(capacity.max(1)).split();
    (
        PcmWriter { producer },
        PcmReader {
            consumer,
            underruns: 0,
        },
    )
}

/// 环形缓冲写端，由 [`AudioPump`] 线程持有
pub struct PcmWriter {
    producer: HeapProd<u8>,
}

impl PcmWriter {
    /// 尽可能多地写入，返回实际写入的字节数（缓冲满时为 0，不阻塞）
    pub fn push(&mut self, data: &[u8]) -> usize {
        self.producer.push_slice(data)
    }

    pub fn vacant(&self) -> usize {
        self.producer.vacant_len()
    }
}

/// 环形缓冲读端，放进设备回调；不持锁、不解码
pub struct PcmReader {
    consumer: HeapCons<u8>,
    underruns: u64,
}

impl PcmReader {
    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }
}

impl PcmSource for PcmReader {
    fn fill(&mut self, out: &mut [u8]) -> FillReport {
        let copied = self.consumer.pop_slice(out);
        zero_fill(&mut out[copied..]);

        let silence = out.len() - copied;
        if silence > 0 {
            self.underruns += 1;
        }
        FillReport { copied, silence }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub bytes: u64,
    pub refills: u64,
    pub failed_refills: u64,
}

/// 音频泵：在普通线程里执行解码补充，把 PCM 推进环形缓冲
///
/// 解复用结束且音频队列取空后退出；也可以通过 stop 标志提前结束。
pub struct AudioPump<D, R>
where
    D: Decoder,
    R: Resampler<Frame = D::Frame>,
{
    state: AudioState<D, R>,
    writer: PcmWriter,
    demux_finished: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl<D, R> AudioPump<D, R>
where
    D: Decoder + 'static,
    R: Resampler<Frame = D::Frame> + 'static,
{
    pub fn new(state: AudioState<D, R>, writer: PcmWriter, demux_finished: Arc<AtomicBool>) -> Self {
        Self {
            state,
            writer,
            demux_finished,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// 在当前线程运行，直到数据耗尽或收到停止信号
    pub fn run(mut self) -> PumpReport {
        info!("{} 🔊 音频泵启动", log_ctx());
        let mut report = PumpReport::default();
        let backoff = Backoff::new();

        while !self.stop.load(Ordering::Acquire) {
            if self.state.is_exhausted() {
                // 先读结束标志再取包：看到“已结束”之后仍取不到包，才说明真的没有数据了
                let finished = self.demux_finished.load(Ordering::Acquire);
                match self.state.refill() {
                    Ok(_) => {
                        report.refills += 1;
                        backoff.reset();
                    }
                    Err(RefillError::Exhausted) => {
                        if finished {
                            break;
                        }
                        Self::wait(&backoff);
                    }
                    Err(e) => {
                        report.failed_refills += 1;
                        debug!("{} 音频补充失败: {}", log_ctx(), e);
                    }
                }
                continue;
            }

            let pushed = self.writer.push(self.state.buffered());
            if pushed == 0 {
                // 环形缓冲已满，等设备回调消费
                Self::wait(&backoff);
                continue;
            }
            self.state.advance(pushed);
            report.bytes += pushed as u64;
            backoff.reset();
        }

        info!(
            "{} 🛑 音频泵退出（{} 字节，{} 次补充，{} 次失败）",
            log_ctx(),
            report.bytes,
            report.refills,
            report.failed_refills
        );
        report
    }

    fn wait(backoff: &Backoff) {
        if backoff.is_completed() {
            thread::sleep(Duration::from_millis(2));
        } else {
            backoff.snooze();
        }
    }

    /// 在独立线程运行
    pub fn spawn(self) -> Result<PumpHandle> {
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name("audio-pump".to_string())
            .spawn(move || self.run())?;
        Ok(PumpHandle {
            handle: Some(handle),
            stop,
        })
    }
}

/// 音频泵线程句柄
pub struct PumpHandle {
    handle: Option<JoinHandle<PumpReport>>,
    stop: Arc<AtomicBool>,
}

impl PumpHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// 等待线程退出；线程 panic 时返回 `None`
    pub fn join(mut self) -> Option<PumpReport> {
        self.handle.take().and_then(|h| h.join().ok())
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!("{} ⚠ PumpHandle 被 drop 但未 join，正在停止音频泵", log_ctx());
            self.stop();
            let _ = handle.join();
        }
    }
}
