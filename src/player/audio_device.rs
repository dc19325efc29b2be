use crate::core::{AudioSpec, PlayerError, Result};
use crate::player::audio_output::{AudioSink, PcmSource};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info, warn};

/// cpal 音频设备：以源采样率和声道数输出交织 S16
pub struct CpalSink {
    device: Device,
    config: StreamConfig,
    spec: AudioSpec,
    stream: Option<Stream>,
}

// cpal::Stream 本身不是 Send，但设备只在创建它的线程中启动和停止
unsafe impl Send for CpalSink {}

impl CpalSink {
    /// 打开默认输出设备
    ///
    /// PCM 不做采样率转换，设备不支持源参数时直接报错。
    pub fn open(spec: AudioSpec) -> Result<Self> {
        info!(
            "初始化音频输出: {} Hz, {} 声道, 每次回调 {} 帧",
            spec.sample_rate, spec.channels, spec.samples
        );

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let mut config = StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(spec.samples as u32),
        };

        let supported = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
            .find(|range| Self::is_config_compatible(&config, range))
            .ok_or_else(|| {
                PlayerError::AudioError(format!(
                    "音频设备不支持 {} Hz, {} 声道",
                    spec.sample_rate, spec.channels
                ))
            })?;

        let fixed_ok = match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => {
                (*min..=*max).contains(&(spec.samples as u32))
            }
            cpal::SupportedBufferSize::Unknown => false,
        };
        if !fixed_ok {
            warn!("⚠️  设备不支持 {} 帧的固定回调大小，使用默认值", spec.samples);
            config.buffer_size = cpal::BufferSize::Default;
        }

        Ok(Self {
            device,
            config,
            spec,
            stream: None,
        })
    }

    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        rate_in_range && config.channels == supported.channels()
    }
}

impl AudioSink for CpalSink {
    fn start(&mut self, mut source: Box<dyn PcmSource>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut bytes = vec![0u8; self.spec.callback_bytes()];
        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    // 设备实际请求的大小可能与协商值不同
                    bytes.resize(data.len() * AudioSpec::BYTES_PER_SAMPLE, 0);
                    source.fill(&mut bytes);
                    for (sample, pair) in data.iter_mut().zip(bytes.chunks_exact(2)) {
                        *sample = i16::from_ne_bytes([pair[0], pair[1]]);
                    }
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        info!("🔊 音频输出已启动");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已停止");
        }
    }

    fn spec(&self) -> AudioSpec {
        self.spec
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}
