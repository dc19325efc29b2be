//! 实时音视频播放核心
//!
//! 读取线程把容器里的压缩包分发到音频/视频包队列；音频设备回调从
//! 音频队列按需解码补充 PCM；视频可以原样排队、同步解码后按固定帧率
//! 绘制，或者解码再编码写入输出容器。

pub mod core;
pub mod player;
