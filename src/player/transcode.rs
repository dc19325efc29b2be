use crate::core::{rescale_duration, rescale_ts, CompressedUnit, OutputStream, PlayerError};
use crate::player::codec::{Decoder, Encoded, Encoder};
use log::{debug, warn};

/// 单个包转码的三态结果
#[derive(Debug)]
pub enum TranscodeOutcome {
    /// 得到一个输出包，时间戳已换算到输出时间基
    Produced(CompressedUnit),
    /// 解码器或编码器吃掉了输入但还没有输出，需要继续喂数据
    Pending,
    /// 解码或编码失败，放弃这个包，管线继续
    Failed(PlayerError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    pub produced: u64,
    pub pending: u64,
    pub failed: u64,
}

/// 解码再编码，把输入包的 pts/dts/duration 换算到输出流的时间基
///
/// 解码器与编码器的帧类型必须一致（同一个编解码库内部的原始帧）。
pub struct Transcoder<D, E>
where
    D: Decoder,
    E: Encoder<Frame = D::Frame>,
{
    decoder: D,
    encoder: E,
    output: OutputStream,
    stats: TranscodeStats,
}

impl<D, E> Transcoder<D, E>
where
    D: Decoder,
    E: Encoder<Frame = D::Frame>,
{
    pub fn new(decoder: D, encoder: E, output: OutputStream) -> Self {
        Self {
            decoder,
            encoder,
            output,
            stats: TranscodeStats::default(),
        }
    }

    pub fn output(&self) -> OutputStream {
        self.output
    }

    pub fn stats(&self) -> TranscodeStats {
        self.stats
    }

    /// 转码一个输入包
    pub fn transcode(&mut self, unit: &CompressedUnit) -> TranscodeOutcome {
        let outcome = self.transcode_inner(unit);
        match &outcome {
            TranscodeOutcome::Produced(_) => self.stats.produced += 1,
            TranscodeOutcome::Pending => self.stats.pending += 1,
            TranscodeOutcome::Failed(e) => {
                self.stats.failed += 1;
                warn!("转码失败（流 #{}，pts {:?}）: {}", unit.stream_index, unit.pts, e);
            }
        }
        outcome
    }

    fn transcode_inner(&mut self, unit: &CompressedUnit) -> TranscodeOutcome {
        let frame = match self.decoder.decode(unit) {
            Ok(step) => match step.frame {
                Some(frame) => frame,
                None => return TranscodeOutcome::Pending,
            },
            Err(e) => return TranscodeOutcome::Failed(e),
        };

        // 编码失败时 encoded 根本不会产生，部分输出随 Err 一起丢弃
        match self.encoder.encode(&frame) {
            Ok(Some(encoded)) => TranscodeOutcome::Produced(self.rebase(unit, encoded)),
            Ok(None) => TranscodeOutcome::Pending,
            Err(e) => TranscodeOutcome::Failed(e),
        }
    }

    fn rebase(&self, input: &CompressedUnit, encoded: Encoded) -> CompressedUnit {
        let src = input.time_base;
        let dst = self.output.time_base;

        let mut unit = CompressedUnit::new(self.output.index, dst, encoded.data).with_timestamps(
            rescale_ts(input.pts, src, dst),
            rescale_ts(input.dts, src, dst),
            rescale_duration(input.duration, src, dst),
        );
        unit.pos = None;
        unit.is_keyframe = encoded.is_keyframe;
        unit
    }

    /// 流结束：冲刷解码器和编码器中缓冲的数据
    ///
    /// 冲刷出的包使用编码器自己给出的时间戳（已是输出时间基）。
    pub fn flush(&mut self) -> Vec<CompressedUnit> {
        let mut out = Vec::new();

        loop {
            match self.decoder.flush() {
                Ok(Some(frame)) => match self.encoder.encode(&frame) {
                    Ok(Some(encoded)) => out.push(self.flushed_unit(encoded)),
                    Ok(None) => {}
                    Err(e) => warn!("冲刷阶段编码失败: {}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("冲刷解码器失败: {}", e);
                    break;
                }
            }
        }

        loop {
            match self.encoder.flush() {
                Ok(Some(encoded)) => out.push(self.flushed_unit(encoded)),
                Ok(None) => break,
                Err(e) => {
                    warn!("冲刷编码器失败: {}", e);
                    break;
                }
            }
        }

        debug!("转码器冲刷完成，输出 {} 个包", out.len());
        self.stats.produced += out.len() as u64;
        out
    }

    fn flushed_unit(&self, encoded: Encoded) -> CompressedUnit {
        let mut unit = CompressedUnit::new(self.output.index, self.output.time_base, encoded.data)
            .with_timestamps(encoded.pts, encoded.dts, encoded.duration);
        unit.is_keyframe = encoded.is_keyframe;
        unit
    }
}

/// 读取循环使用的转码环节（擦除解码器/编码器的具体类型）
pub trait TranscodeStage: Send {
    fn transcode(&mut self, unit: &CompressedUnit) -> TranscodeOutcome;

    fn flush(&mut self) -> Vec<CompressedUnit>;

    fn output(&self) -> OutputStream;
}

impl<D, E> TranscodeStage for Transcoder<D, E>
where
    D: Decoder,
    E: Encoder<Frame = D::Frame>,
{
    fn transcode(&mut self, unit: &CompressedUnit) -> TranscodeOutcome {
        Transcoder::transcode(self, unit)
    }

    fn flush(&mut self) -> Vec<CompressedUnit> {
        Transcoder::flush(self)
    }

    fn output(&self) -> OutputStream {
        self.output
    }
}
