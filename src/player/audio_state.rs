use crate::core::{CompressedUnit, DecodedFrame, PlayerError};
use crate::player::codec::{Decoder, Resampler};
use crate::player::packet_queue::{PacketQueue, QueueNode};
use log::{debug, warn};
use std::sync::Arc;
use thiserror::Error;

/// 补充 PCM 缓冲失败的原因
///
/// 对调用方来说三种情况都是“无法补充”，区分只用于日志。
#[derive(Error, Debug)]
pub enum RefillError {
    #[error("音频包队列暂无数据")]
    Exhausted,

    #[error("音频解码失败: {0}")]
    Decode(PlayerError),

    #[error("音频重采样失败: {0}")]
    Resample(PlayerError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    pub refills: u64,
    pub exhausted: u64,
    pub decode_errors: u64,
    pub resample_errors: u64,
    pub skipped_empty: u64,
}

/// 音频解码状态：解码器、重采样器、重采样后的 PCM 缓冲和读游标
///
/// 不变量：`0 <= buf_idx <= buf.len()`；`buf_idx == buf.len()` 时缓冲已耗尽，
/// 必须先 `refill` 才能继续读。
pub struct AudioState<D, R>
where
    D: Decoder,
    R: Resampler<Frame = D::Frame>,
{
    decoder: D,
    resampler: R,
    queue: Arc<PacketQueue<CompressedUnit>>,
    buf: Vec<u8>,
    buf_idx: usize,
    stats: AudioStats,
}

impl<D, R> AudioState<D, R>
where
    D: Decoder,
    R: Resampler<Frame = D::Frame>,
{
    pub fn new(decoder: D, resampler: R, queue: Arc<PacketQueue<CompressedUnit>>) -> Self {
        Self {
            decoder,
            resampler,
            queue,
            buf: Vec::new(),
            buf_idx: 0,
            stats: AudioStats::default(),
        }
    }

    pub fn queue(&self) -> &Arc<PacketQueue<CompressedUnit>> {
        &self.queue
    }

    pub fn buf_idx(&self) -> usize {
        self.buf_idx
    }

    pub fn buf_size(&self) -> usize {
        self.buf.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.buf_idx >= self.buf.len()
    }

    /// 缓冲中尚未读出的 PCM 数据
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.buf_idx..]
    }

    /// 读游标前进 `n` 字节（不会越过缓冲末尾），返回实际前进量
    pub fn advance(&mut self, n: usize) -> usize {
        let n = n.min(self.buf.len() - self.buf_idx);
        self.buf_idx += n;
        n
    }

    /// 从缓冲复制尽可能多的数据到 `out`，返回复制的字节数
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len() - self.buf_idx);
        out[..n].copy_from_slice(&self.buf[self.buf_idx..self.buf_idx + n]);
        self.buf_idx += n;
        n
    }

    pub fn stats(&self) -> AudioStats {
        self.stats
    }

    /// 解码下一段音频并替换 PCM 缓冲，成功时返回新缓冲的字节数
    ///
    /// 1. 解码器里还有上一个包解出的帧时先用它
    /// 2. 否则取出队头的包（队列为空时返回 `Exhausted`）
    /// 3. 解码一步，包的读偏移前进解码器消费的字节数
    /// 4. 得到帧：重采样进缓冲，游标归零；包里还有剩余数据就放回队头
    /// 5. 没有帧：继续用同一个包（或下一个包）解码
    ///
    /// 队列锁只在 take / insert_front 内部持有，解码和重采样不持锁。
    pub fn refill(&mut self) -> Result<usize, RefillError> {
        let mut pending: Option<QueueNode<CompressedUnit>> = None;

        loop {
            let mut node = match pending.take() {
                Some(node) => node,
                None => {
                    if self.load_buffered()? {
                        self.stats.refills += 1;
                        return Ok(self.buf.len());
                    }
                    match self.queue.take() {
                        Some(node) => node,
                        None => {
                            self.stats.exhausted += 1;
                            debug!("[{}] 没有剩余的音频包", self.queue.name());
                            return Err(RefillError::Exhausted);
                        }
                    }
                }
            };

            if node.item.is_exhausted() {
                self.stats.skipped_empty += 1;
                debug!("跳过空音频包 #{}", node.seq);
                continue;
            }

            let step = match self.decoder.decode(&node.item) {
                Ok(step) => step,
                Err(e) => {
                    self.stats.decode_errors += 1;
                    warn!("音频包 #{} 解码失败，已丢弃: {}", node.seq, e);
                    return Err(RefillError::Decode(e));
                }
            };
            let consumed = node.item.consume(step.consumed);

            let frame = match step.frame {
                Some(frame) => frame,
                None => {
                    if consumed == 0 {
                        self.stats.decode_errors += 1;
                        return Err(RefillError::Decode(PlayerError::DecodeError(format!(
                            "解码器未消费音频包 #{} 的任何数据",
                            node.seq
                        ))));
                    }
                    if !node.item.is_exhausted() {
                        pending = Some(node);
                    }
                    continue;
                }
            };

            if let Err(e) = self.resample(&frame) {
                warn!("音频包 #{} 重采样失败，已丢弃: {}", node.seq, e);
                return Err(RefillError::Resample(e));
            }

            if self.buf.is_empty() {
                // 重采样器缓冲了这一帧，尚无输出
                if !node.item.is_exhausted() {
                    pending = Some(node);
                }
                continue;
            }

            if !node.item.is_exhausted() {
                // 包里还有数据，放回队头，保证下一次最先读到
                debug!(
                    "音频包 #{} 剩余 {} 字节，放回队头",
                    node.seq,
                    node.item.remaining()
                );
                self.queue.insert_front(node);
            }

            self.stats.refills += 1;
            return Ok(self.buf.len());
        }
    }

    /// 用解码器积压的帧填充缓冲；没有积压或重采样尚无输出时返回 false
    fn load_buffered(&mut self) -> Result<bool, RefillError> {
        loop {
            let frame = match self.decoder.take_buffered() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(false),
                Err(e) => {
                    self.stats.decode_errors += 1;
                    warn!("取出解码器积压的音频帧失败: {}", e);
                    return Err(RefillError::Decode(e));
                }
            };
            if let Err(e) = self.resample(&frame) {
                warn!("积压的音频帧重采样失败，已丢弃: {}", e);
                return Err(RefillError::Resample(e));
            }
            if !self.buf.is_empty() {
                return Ok(true);
            }
        }
    }

    fn resample(&mut self, frame: &DecodedFrame<D::Frame>) -> Result<(), PlayerError> {
        let result = self.resampler.resample(frame, &mut self.buf);
        self.buf_idx = 0;
        if result.is_err() {
            self.buf.clear();
            self.stats.resample_errors += 1;
        }
        result.map(|_| ())
    }
}
