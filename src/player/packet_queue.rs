use crate::core::QueuePolicy;
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 队列节点：数据项和入队时分配的序号
///
/// `take` 把整个节点交给调用方；部分消费的包通过 `insert_front` 原样
/// 放回队头，序号保持不变。
#[derive(Debug, Clone, PartialEq)]
pub struct QueueNode<T> {
    pub seq: u64,
    pub item: T,
}

impl<T> QueueNode<T> {
    pub fn into_item(self) -> T {
        self.item
    }
}

/// 队列统计（仅用于诊断）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub appended: u64,
    pub taken: u64,
    pub reinserted: u64,
    pub dropped: u64,
}

struct QueueInner<T> {
    nodes: VecDeque<QueueNode<T>>,
    next_seq: u64,
    stats: QueueStats,
}

/// 线程安全的有序包队列
///
/// - 每个队列一把锁，所有操作只在自身执行期间持锁
/// - `take` 在空队列上立即返回 `None`（“暂无数据”，不是流结束）
/// - 关闭后的队列上 `append`/`insert_front` 是空操作
pub struct PacketQueue<T> {
    name: String,
    policy: QueuePolicy,
    inner: Mutex<QueueInner<T>>,
    space: Condvar,
    closed: AtomicBool,
}

impl<T> PacketQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_policy(name, QueuePolicy::Unbounded)
    }

    pub fn with_policy(name: impl Into<String>, policy: QueuePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            inner: Mutex::new(QueueInner {
                nodes: VecDeque::new(),
                next_seq: 0,
                stats: QueueStats::default(),
            }),
            space: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// 队尾追加，返回分配的序号
    ///
    /// 队列已关闭，或按容量策略丢弃了新包时返回 `None`。
    pub fn append(&self, item: T) -> Option<u64> {
        if self.is_closed() {
            debug!("[{}] 队列已关闭，忽略 append", self.name);
            return None;
        }

        let mut inner = self.inner.lock();
        match self.policy {
            QueuePolicy::Unbounded => {}
            QueuePolicy::DropOldest { max } => {
                while inner.nodes.len() >= max {
                    if let Some(old) = inner.nodes.pop_front() {
                        inner.stats.dropped += 1;
                        debug!("[{}] 队列已满，丢弃最旧的包 #{}", self.name, old.seq);
                    }
                }
            }
            QueuePolicy::BlockProducer { max, timeout_ms } => {
                let deadline = Instant::now() + Duration::from_millis(timeout_ms);
                while inner.nodes.len() >= max && !self.is_closed() {
                    if self.space.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
                if self.is_closed() {
                    return None;
                }
                if inner.nodes.len() >= max {
                    inner.stats.dropped += 1;
                    warn!("[{}] 等待队列空间超时（{}ms），丢弃新包", self.name, timeout_ms);
                    return None;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.nodes.push_back(QueueNode { seq, item });
        inner.stats.appended += 1;
        Some(seq)
    }

    /// 把部分消费的节点放回队头，使其剩余数据成为下一个被取出的内容
    ///
    /// 不受容量策略限制。队列已关闭时节点被丢弃并返回 `false`。
    pub fn insert_front(&self, node: QueueNode<T>) -> bool {
        if self.is_closed() {
            debug!("[{}] 队列已关闭，丢弃回插的包 #{}", self.name, node.seq);
            return false;
        }

        let mut inner = self.inner.lock();
        inner.nodes.push_front(node);
        inner.stats.reinserted += 1;
        true
    }

    /// 取出队头，空队列立即返回 `None`
    pub fn take(&self) -> Option<QueueNode<T>> {
        if self.is_closed() {
            return None;
        }

        let mut inner = self.inner.lock();
        let node = inner.nodes.pop_front()?;
        inner.stats.taken += 1;
        drop(inner);

        self.space.notify_one();
        Some(node)
    }

    /// 关闭队列并排空，每个剩余数据项调用一次 `destructor`
    ///
    /// 最多等待 `wait` 获取锁；拿不到锁时不阻塞，剩余数据在最后一个
    /// 句柄释放时随队列一起释放。返回调用 `destructor` 的次数。
    pub fn destroy<D>(&self, wait: Duration, mut destructor: D) -> usize
    where
        D: FnMut(T),
    {
        self.drain_with(wait, &mut destructor)
    }

    /// 关闭队列并直接释放剩余数据，返回释放的个数
    pub fn close(&self, wait: Duration) -> usize {
        self.drain_with(wait, &mut |item| drop(item))
    }

    fn drain_with(&self, wait: Duration, destructor: &mut dyn FnMut(T)) -> usize {
        self.closed.store(true, Ordering::Release);
        // 唤醒等待空间的生产者，让其看到关闭状态
        self.space.notify_all();

        match self.inner.try_lock_for(wait) {
            Some(mut inner) => {
                // 持锁再通知一次，避免生产者在检查关闭状态与进入等待之间错过唤醒
                self.space.notify_all();
                let count = inner.nodes.len();
                for node in inner.nodes.drain(..) {
                    destructor(node.item);
                }
                debug!("[{}] 队列已关闭，释放 {} 个剩余数据项", self.name, count);
                count
            }
            None => {
                warn!(
                    "[{}] {}ms 内未能获取队列锁，剩余数据延后释放",
                    self.name,
                    wait.as_millis()
                );
                0
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().nodes.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }
}
