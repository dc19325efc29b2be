use crate::core::{CompressedUnit, DecodedFrame, Result};
use bytes::Bytes;

/// 一次解码调用的结果
///
/// `consumed` 是解码器从包的剩余数据中吃掉的字节数；同一个包可能需要
/// 多次调用才能消费完，也可能消费了数据却还没有产出帧。
#[derive(Debug)]
pub struct DecodeStep<F> {
    pub consumed: usize,
    pub frame: Option<DecodedFrame<F>>,
}

impl<F> DecodeStep<F> {
    pub fn frame(consumed: usize, frame: DecodedFrame<F>) -> Self {
        Self {
            consumed,
            frame: Some(frame),
        }
    }

    pub fn pending(consumed: usize) -> Self {
        Self {
            consumed,
            frame: None,
        }
    }
}

/// 解码能力（外部编解码库）
pub trait Decoder: Send {
    type Frame: Send;

    /// 解码 `unit` 当前剩余的数据
    fn decode(&mut self, unit: &CompressedUnit) -> Result<DecodeStep<Self::Frame>>;

    /// 取出之前的包已经解出、但还没有交出的帧（不结束流）
    ///
    /// 一个包解出多帧的解码器每次 `decode` 只交出一帧，其余的从这里取。
    fn take_buffered(&mut self) -> Result<Option<DecodedFrame<Self::Frame>>> {
        Ok(None)
    }

    /// 流结束时取出解码器内部缓冲的帧
    fn flush(&mut self) -> Result<Option<DecodedFrame<Self::Frame>>> {
        Ok(None)
    }
}

/// 编码器输出的压缩数据
///
/// 时间戳以输出流时间基表示，只有冲刷（flush）阶段的输出会用到它们。
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub is_keyframe: bool,
}

impl Encoded {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            dts: None,
            duration: 0,
            is_keyframe: false,
        }
    }
}

/// 编码能力；编码器内部可能缓冲若干帧（编码延迟）
pub trait Encoder: Send {
    type Frame;

    fn encode(&mut self, frame: &DecodedFrame<Self::Frame>) -> Result<Option<Encoded>>;

    /// 取出编码器缓冲的输出，每次一个，`None` 表示已排空
    fn flush(&mut self) -> Result<Option<Encoded>> {
        Ok(None)
    }
}

/// 重采样能力：把解码后的音频帧转换为交织 S16 PCM
pub trait Resampler: Send {
    type Frame;

    /// 结果覆盖写入 `out`，返回写入的字节数
    fn resample(&mut self, frame: &DecodedFrame<Self::Frame>, out: &mut Vec<u8>) -> Result<usize>;
}

/// 输出容器
pub trait Muxer: Send {
    fn write_header(&mut self) -> Result<()> {
        Ok(())
    }

    fn write_unit(&mut self, unit: CompressedUnit) -> Result<()>;

    fn write_trailer(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 视频渲染能力（在主线程调用）
pub trait Renderer {
    type Frame;

    fn paint(&mut self, seq: u64, frame: DecodedFrame<Self::Frame>) -> Result<()>;
}
