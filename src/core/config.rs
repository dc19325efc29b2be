use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::error::{PlayerError, Result};

/// 队列容量策略
///
/// 默认无界：慢消费者导致内存增长而不是阻塞生产者。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueuePolicy {
    #[default]
    Unbounded,
    /// 队列满时丢弃队头（最旧的包）
    DropOldest { max: usize },
    /// 队列满时生产者最多等待 `timeout_ms`，超时丢弃新包
    BlockProducer { max: usize, timeout_ms: u64 },
}

impl QueuePolicy {
    pub fn max_depth(&self) -> Option<usize> {
        match *self {
            QueuePolicy::Unbounded => None,
            QueuePolicy::DropOldest { max } | QueuePolicy::BlockProducer { max, .. } => Some(max),
        }
    }
}

/// 音频回调的供数方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    /// 回调线程内直接解码/重采样补充缓冲
    #[default]
    Pull,
    /// 独立泵线程解码，回调只从无锁环形缓冲取数据
    Ring,
}

/// 视频包的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoRouteKind {
    /// 原样放入视频包队列
    Queue,
    /// 同步解码后放入帧队列，由帧节奏控制器绘制
    #[default]
    Paint,
    /// 同步解码再编码，写入输出容器
    Transcode,
}

/// 组播接收配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// 单个数据报最大字节数
    pub datagram_size: usize,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(239, 192, 0, 42),
            port: 1234,
            datagram_size: 4096,
        }
    }
}

/// 会话配置
///
/// 由宿主在代码中构造，或通过消息通道以 JSON 交给会话；不读取任何配置文件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 视频输出帧率
    pub fps: f64,
    pub audio_mode: AudioMode,
    /// 环形缓冲容量（字节）
    pub ring_capacity: usize,
    pub audio_policy: QueuePolicy,
    pub video_policy: QueuePolicy,
    pub video_route: VideoRouteKind,
    /// 每次音频设备回调请求的采样帧数
    pub device_samples: u16,
    /// 字节源一次读取的块大小
    pub chunk_size: usize,
    pub multicast: MulticastConfig,
    /// 拆除会话时等待队列锁的上限（毫秒）
    pub teardown_wait_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fps: 24.0,
            audio_mode: AudioMode::Pull,
            ring_capacity: 48000 * 2 * 2 / 2, // 约 0.5 秒 48kHz 立体声 S16
            audio_policy: QueuePolicy::Unbounded,
            video_policy: QueuePolicy::Unbounded,
            video_route: VideoRouteKind::Paint,
            device_samples: 1024,
            chunk_size: 4096,
            multicast: MulticastConfig::default(),
            teardown_wait_ms: 50,
        }
    }
}

impl SessionConfig {
    /// 从宿主传来的 JSON 解析配置，缺省字段使用默认值
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)
            .map_err(|e| PlayerError::ConfigError(format!("无法解析配置: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PlayerError::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(PlayerError::ConfigError(format!("帧率必须为正数: {}", self.fps)));
        }
        if self.ring_capacity == 0 {
            return Err(PlayerError::ConfigError("环形缓冲容量不能为 0".to_string()));
        }
        if self.device_samples == 0 {
            return Err(PlayerError::ConfigError("回调采样数不能为 0".to_string()));
        }
        if self.chunk_size == 0 || self.multicast.datagram_size == 0 {
            return Err(PlayerError::ConfigError("读取块大小不能为 0".to_string()));
        }
        for policy in [self.audio_policy, self.video_policy] {
            if policy.max_depth() == Some(0) {
                return Err(PlayerError::ConfigError("队列最大深度不能为 0".to_string()));
            }
        }
        Ok(())
    }
}
