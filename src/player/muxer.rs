use crate::core::{CompressedUnit, OutputStream, PlayerError, Result};
use crate::player::codec::Muxer;
use crate::player::decoder::RawVideoEncoder;
use crate::player::demuxer::to_ffmpeg;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format;
use log::{debug, info};

/// FFmpeg 输出容器，容器格式由文件扩展名推断
pub struct FfmpegMuxer {
    output_ctx: format::context::Output,
    path: String,
    header_written: bool,
    units: u64,
}

// 输出上下文只在读取线程中使用
unsafe impl Send for FfmpegMuxer {}

impl FfmpegMuxer {
    pub fn create(path: &str) -> Result<Self> {
        info!("创建输出文件: {}", path);
        let output_ctx = format::output(&path)
            .map_err(|e| PlayerError::MuxError(format!("无法创建 {}: {}", path, e)))?;
        Ok(Self {
            output_ctx,
            path: path.to_string(),
            header_written: false,
            units: 0,
        })
    }

    /// 为编码器添加一条输出流，返回转码器使用的输出流描述
    pub fn add_stream(&mut self, encoder: &RawVideoEncoder) -> Result<OutputStream> {
        if self.header_written {
            return Err(PlayerError::MuxError("文件头已写出，不能再添加流".to_string()));
        }
        let time_base = encoder.time_base();
        let mut stream = self
            .output_ctx
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::RAWVIDEO))?;
        stream.set_parameters(encoder.encoder());
        stream.set_time_base(to_ffmpeg(time_base));
        let index = stream.index();

        debug!("输出流 #{}，时间基 {}", index, time_base);
        Ok(OutputStream { index, time_base })
    }

    pub fn units_written(&self) -> u64 {
        self.units
    }
}

impl Muxer for FfmpegMuxer {
    fn write_header(&mut self) -> Result<()> {
        self.output_ctx
            .write_header()
            .map_err(|e| PlayerError::MuxError(format!("写文件头失败: {}", e)))?;
        self.header_written = true;
        info!("✅ 输出文件头已写出: {}", self.path);
        Ok(())
    }

    fn write_unit(&mut self, unit: CompressedUnit) -> Result<()> {
        let index = unit.stream_index;
        // 写文件头时容器可能改写流的时间基，以实际值为准
        let stream_tb = self
            .output_ctx
            .stream(index)
            .map(|s| s.time_base())
            .ok_or_else(|| PlayerError::MuxError(format!("输出流 #{} 不存在", index)))?;

        let mut packet = ffmpeg::Packet::copy(unit.data());
        packet.set_stream(index);
        packet.set_pts(unit.pts);
        packet.set_dts(unit.dts);
        packet.set_duration(unit.duration);
        packet.set_position(-1);
        if unit.is_keyframe {
            packet.set_flags(ffmpeg::packet::Flags::KEY);
        }
        packet.rescale_ts(to_ffmpeg(unit.time_base), stream_tb);

        packet
            .write_interleaved(&mut self.output_ctx)
            .map_err(|e| PlayerError::MuxError(format!("写入包失败: {}", e)))?;
        self.units += 1;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.output_ctx
            .write_trailer()
            .map_err(|e| PlayerError::MuxError(format!("写文件尾失败: {}", e)))?;
        info!("✅ 输出完成: {}（{} 个包）", self.path, self.units);
        Ok(())
    }
}
