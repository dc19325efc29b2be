use crate::core::{frame_interval, DecodedFrame, WallClock};
use crate::player::codec::Renderer;
use crate::player::packet_queue::PacketQueue;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 一次节奏检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceOutcome {
    /// 绘制了序号为 seq 的帧
    Painted(u64),
    /// 取出了帧但渲染失败，帧已丢弃
    RenderFailed(u64),
    /// 距上次绘制还不到一个帧间隔
    NotDue,
    /// 到点了但帧队列为空（视频欠载，跳过这次绘制）
    NothingReady,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacerStats {
    pub painted: u64,
    pub render_failed: u64,
    pub starved: u64,
}

/// 帧节奏控制：按固定帧率从帧队列取帧交给渲染器
///
/// 在主线程（渲染线程）周期性调用 [`FramePacer::poll`]。
pub struct FramePacer<F> {
    queue: Arc<PacketQueue<DecodedFrame<F>>>,
    interval: Duration,
    last_paint: Option<Instant>,
    clock: Box<dyn WallClock>,
    stats: PacerStats,
}

impl<F> FramePacer<F> {
    pub fn new(queue: Arc<PacketQueue<DecodedFrame<F>>>, fps: f64, clock: Box<dyn WallClock>) -> Self {
        Self {
            queue,
            interval: frame_interval(fps),
            last_paint: None,
            clock,
            stats: PacerStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_paint(&self) -> Option<Instant> {
        self.last_paint
    }

    pub fn stats(&self) -> PacerStats {
        self.stats
    }

    pub fn queue(&self) -> &Arc<PacketQueue<DecodedFrame<F>>> {
        &self.queue
    }

    fn is_due(&self, now: Instant) -> bool {
        match self.last_paint {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// 距离下一次可以绘制还要等多久（已到点返回 0）
    pub fn time_until_due(&self, now: Instant) -> Duration {
        match self.last_paint {
            None => Duration::ZERO,
            Some(last) => (last + self.interval).saturating_duration_since(now),
        }
    }

    /// 在给定时刻检查一次
    pub fn tick<R>(&mut self, now: Instant, renderer: &mut R) -> PaceOutcome
    where
        R: Renderer<Frame = F> + ?Sized,
    {
        if !self.is_due(now) {
            return PaceOutcome::NotDue;
        }

        let Some(node) = self.queue.take() else {
            self.stats.starved += 1;
            return PaceOutcome::NothingReady;
        };

        let seq = node.seq;
        self.last_paint = Some(now);
        match renderer.paint(seq, node.item) {
            Ok(()) => {
                self.stats.painted += 1;
                if self.stats.painted <= 5 || self.stats.painted % 100 == 0 {
                    debug!("🖼 绘制帧 #{}（累计 {}）", seq, self.stats.painted);
                }
                PaceOutcome::Painted(seq)
            }
            Err(e) => {
                self.stats.render_failed += 1;
                warn!("渲染帧 #{} 失败，已丢弃: {}", seq, e);
                PaceOutcome::RenderFailed(seq)
            }
        }
    }

    /// 用注入的墙钟检查一次
    pub fn poll<R>(&mut self, renderer: &mut R) -> PaceOutcome
    where
        R: Renderer<Frame = F> + ?Sized,
    {
        let now = self.clock.now();
        self.tick(now, renderer)
    }
}
