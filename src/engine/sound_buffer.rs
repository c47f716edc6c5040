//! 完整解码后放入单个设备 buffer 的音频

use std::sync::Arc;

use crate::audio::{AudioDevice, AudioFormat, BufferId};
use crate::decode::AudioData;

use super::EngineError;

/// 一次性解码时每次读取的字节数
const LOAD_CHUNK: usize = 64 * 1024;

/// 静态音频 buffer
pub struct SoundBuffer {
    device: Arc<dyn AudioDevice>,
    buffer: BufferId,
    name: String,
    format: AudioFormat,
    /// 设备 buffer 中的 PCM 字节数
    size: usize,
}

impl SoundBuffer {
    /// 默认格式：单声道 16-bit 44.1kHz
    pub fn new(device: Arc<dyn AudioDevice>, name: impl Into<String>) -> Result<Self, EngineError> {
        Self::with_format(device, name, AudioFormat::mono16(44100))
    }

    pub fn with_format(
        device: Arc<dyn AudioDevice>,
        name: impl Into<String>,
        format: AudioFormat,
    ) -> Result<Self, EngineError> {
        format.validate()?;
        let buffer = device
            .gen_buffers(1)?
            .pop()
            .ok_or(EngineError::InvalidState("device returned no buffer"))?;

        Ok(Self {
            device,
            buffer,
            name: name.into(),
            format,
            size: 0,
        })
    }

    /// 从音频数据创建并加载
    pub fn from_data(device: Arc<dyn AudioDevice>, data: &AudioData) -> Result<Self, EngineError> {
        let mut buffer = Self::new(device, data.name())?;
        buffer.load_from_data(data)?;
        Ok(buffer)
    }

    /// 解码全部数据并上传
    ///
    /// 失败时保持原有内容和格式
    pub fn load_from_data(&mut self, data: &AudioData) -> Result<(), EngineError> {
        if !data.is_valid() {
            return Err(EngineError::InvalidData(data.name()));
        }

        let mut decoder = data.create_decoder()?;
        let format = decoder.format();
        format.validate()?;

        let mut pcm = Vec::with_capacity(
            data.total_frames()
                .map(|f| f as usize * format.bytes_per_frame())
                .unwrap_or(LOAD_CHUNK),
        );
        let mut chunk = vec![0u8; LOAD_CHUNK];
        loop {
            let n = decoder.read(&mut chunk);
            pcm.extend_from_slice(&chunk[..n]);
            if n < chunk.len() {
                break;
            }
        }

        self.upload(format, &pcm)?;
        self.name = data.name();
        log::info!(
            "Loaded {} into buffer: {:.2}s",
            self.name,
            self.duration()
        );
        Ok(())
    }

    /// 以当前格式上传原始样本
    pub fn load_from_samples(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        self.load_from_samples_as(self.format, bytes)
    }

    /// 以指定格式上传原始样本（长度必须是帧大小的整数倍）
    pub fn load_from_samples_as(
        &mut self,
        format: AudioFormat,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        format.validate()?;
        self.upload(format, bytes)
    }

    fn upload(&mut self, format: AudioFormat, bytes: &[u8]) -> Result<(), EngineError> {
        let frame = format.bytes_per_frame();
        if bytes.len() % frame != 0 {
            return Err(EngineError::InvalidSampleData {
                len: bytes.len(),
                frame,
            });
        }

        self.device.buffer_data(self.buffer, format, bytes)?;
        self.format = format;
        self.size = bytes.len();
        Ok(())
    }

    pub fn id(&self) -> BufferId {
        self.buffer
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// 每声道样本数（帧数）
    pub fn num_samples(&self) -> u64 {
        self.format.frames_in(self.size) as u64
    }

    /// 时长（秒）
    pub fn duration(&self) -> f64 {
        self.format.duration_of(self.size)
    }

    /// PCM 字节数
    pub fn buffer_size(&self) -> usize {
        self.size
    }
}

impl Drop for SoundBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.device.delete_buffers(&[self.buffer]) {
            log::warn!("Failed to delete buffer {}: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SoftwareDevice;
    use crate::decode::ByteSource;
    use approx::assert_relative_eq;

    fn device() -> Arc<SoftwareDevice> {
        Arc::new(SoftwareDevice::default())
    }

    #[test]
    fn test_partial_frame_rejected_for_every_format() {
        let dev = device();
        for format in [
            AudioFormat::mono8(22050),
            AudioFormat::mono16(22050),
            AudioFormat::stereo8(22050),
            AudioFormat::stereo16(22050),
        ] {
            let frame = format.bytes_per_frame();
            let mut buffer = SoundBuffer::with_format(dev.clone(), "raw", format).unwrap();
            buffer.load_from_samples(&vec![0u8; frame * 10]).unwrap();

            // 单声道 8-bit 任何长度都是整帧
            if frame > 1 {
                let err = buffer.load_from_samples(&vec![0u8; frame * 10 + 1]);
                assert!(matches!(err, Err(EngineError::InvalidSampleData { .. })));
            }
            assert_eq!(buffer.num_samples(), 10);
            assert_eq!(buffer.buffer_size(), frame * 10);
            assert_eq!(buffer.format(), format);
        }
    }

    #[test]
    fn test_failed_reformat_keeps_previous_state() {
        let dev = device();
        let mut buffer = SoundBuffer::new(dev, "raw").unwrap();
        buffer.load_from_samples(&[0u8; 8]).unwrap();

        let err = buffer.load_from_samples_as(AudioFormat::stereo16(48000), &[0u8; 6]);
        assert!(err.is_err());
        assert_eq!(buffer.format(), AudioFormat::mono16(44100));
        assert_eq!(buffer.num_samples(), 4);
    }

    #[test]
    fn test_three_second_duration() {
        let dev = device();
        let mut buffer = SoundBuffer::new(dev, "tone").unwrap();
        let samples = 44100 * 3;
        buffer.load_from_samples(&vec![0u8; samples * 2]).unwrap();
        assert_eq!(buffer.num_samples(), samples as u64);
        assert_relative_eq!(buffer.duration(), 3.0);
    }

    #[test]
    fn test_load_from_data() {
        let dev = device();
        let data = AudioData::raw(
            ByteSource::memory("click.raw", vec![128u8; 200_000]),
            AudioFormat::stereo8(8000),
        );
        let buffer = SoundBuffer::from_data(dev.clone(), &data).unwrap();
        assert_eq!(buffer.format(), AudioFormat::stereo8(8000));
        assert_eq!(buffer.num_samples(), 100_000);
        assert_eq!(buffer.name(), "click.raw");
        assert_eq!(dev.buffer_count(), 1);

        drop(buffer);
        assert_eq!(dev.buffer_count(), 0);
    }

    #[test]
    fn test_reload_while_attached_fails_and_keeps_state() {
        let dev = device();
        let mut buffer = SoundBuffer::new(dev.clone(), "raw").unwrap();
        buffer.load_from_samples(&[0u8; 8]).unwrap();

        let src = dev.gen_source().unwrap();
        dev.set_buffer(src, Some(buffer.id())).unwrap();
        assert!(matches!(
            buffer.load_from_samples(&[0u8; 16]),
            Err(EngineError::Device(_))
        ));
        assert_eq!(buffer.buffer_size(), 8);
    }
}
