use crate::core::{CompressedUnit, MediaInfo, Rational, Result, StreamMap};

/// Demuxer 数据源抽象接口
///
/// 不同的媒体源（本地文件、网络推送的字节块、内存缓冲等）都通过这个接口
/// 向读取循环提供压缩数据单元。容器解析本身由实现方负责。
pub trait Demuxer: Send {
    /// 读取下一个数据单元
    ///
    /// 返回：
    /// - Ok(Some(unit)): 成功读取一个包
    /// - Ok(None): 到达流末尾
    /// - Err(e): `is_per_unit()` 的错误表示单个损坏的包，读取循环跳过它继续读；
    ///   其他错误不可恢复，读取循环结束
    fn read_unit(&mut self) -> Result<Option<CompressedUnit>>;

    /// 已选中的视频/音频流索引
    fn streams(&self) -> StreamMap;

    /// 指定流的时间基
    fn time_base(&self, stream_index: usize) -> Option<Rational>;

    /// 获取媒体信息
    fn media_info(&self) -> &MediaInfo;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
