use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("解封装错误: {0}")]
    DemuxError(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("编码错误: {0}")]
    EncodeError(String),

    #[error("重采样错误: {0}")]
    ResampleError(String),

    #[error("内存分配失败: {0}")]
    AllocationError(String),

    #[error("渲染错误: {0}")]
    RenderError(String),

    #[error("封装输出错误: {0}")]
    MuxError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PlayerError {
    /// 单个数据包级别的错误：记录日志后继续处理下一个包
    pub fn is_per_unit(&self) -> bool {
        matches!(
            self,
            PlayerError::DecodeError(_) | PlayerError::EncodeError(_) | PlayerError::ResampleError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(PlayerError::DecodeError("x".into()).is_per_unit());
        assert!(PlayerError::ResampleError("x".into()).is_per_unit());

        let io = PlayerError::from(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
        assert!(!io.is_per_unit());
        assert!(!PlayerError::DemuxError("x".into()).is_per_unit());
        assert!(!PlayerError::AllocationError("oom".into()).is_per_unit());
    }
}
