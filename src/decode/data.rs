//! 可复用的音频数据
//!
//! 加载一次并校验，之后可以为多个播放器各自创建独立的解码器

use std::path::Path;
use std::sync::Arc;

use super::decoder::{open_decoder, DecodeError, PcmDecoder};
use super::raw::RawPcmDecoder;
use super::source::ByteSource;
use crate::audio::AudioFormat;

/// 已校验的音频数据
#[derive(Debug, Clone)]
pub struct AudioData {
    source: ByteSource,
    /// 无头 PCM 的格式（由调用方提供）
    raw_format: Option<AudioFormat>,
    format: AudioFormat,
    total_frames: Option<u64>,
    is_valid: bool,
}

impl AudioData {
    /// 加载字节源，失败时返回无效数据（不会 panic）
    pub fn new(source: ByteSource) -> Self {
        let probe = open_decoder(&source);
        Self::from_probe(source, None, probe)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Self {
        Self::new(ByteSource::file(path))
    }

    pub fn from_memory(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(ByteSource::memory(name, bytes))
    }

    /// 无头 PCM，格式由调用方指定
    pub fn raw(source: ByteSource, format: AudioFormat) -> Self {
        let probe = RawPcmDecoder::from_source(&source, format)
            .map(|d| Box::new(d) as Box<dyn PcmDecoder>);
        Self::from_probe(source, Some(format), probe)
    }

    fn from_probe(
        source: ByteSource,
        raw_format: Option<AudioFormat>,
        probe: Result<Box<dyn PcmDecoder>, DecodeError>,
    ) -> Self {
        let (format, total_frames, is_valid) = match probe {
            Ok(decoder) => {
                let format = decoder.format();
                (format, decoder.total_frames(), format.is_usable())
            }
            Err(e) => {
                log::error!("Failed to load {}: {}", source.name(), e);
                (AudioFormat::new(0, 0, 0), None, false)
            }
        };

        Self {
            source,
            raw_format,
            format,
            total_frames,
            is_valid,
        }
    }

    /// 加载是否成功
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// 文件名或内存源名
    pub fn name(&self) -> String {
        self.source.name()
    }

    pub fn source(&self) -> &ByteSource {
        &self.source
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    /// 总时长（秒），长度未知时为 0
    pub fn duration(&self) -> f64 {
        match (self.total_frames, self.format.sample_rate) {
            (Some(frames), rate) if rate > 0 => frames as f64 / rate as f64,
            _ => 0.0,
        }
    }

    /// 创建一个新的、从头开始的解码器
    pub fn create_decoder(&self) -> Result<Box<dyn PcmDecoder>, DecodeError> {
        if !self.is_valid {
            return Err(DecodeError::UnsupportedFormat(format!(
                "{} did not load",
                self.source.name()
            )));
        }
        match self.raw_format {
            Some(format) => Ok(Box::new(RawPcmDecoder::from_source(&self.source, format)?)),
            None => open_decoder(&self.source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_data_spawns_independent_decoders() {
        let data = AudioData::raw(
            ByteSource::memory("ramp.pcm", (0u8..8).collect::<Vec<_>>()),
            AudioFormat::mono8(8000),
        );
        assert!(data.is_valid());
        assert_eq!(data.total_frames(), Some(8));
        assert_eq!(data.duration(), 0.001);

        let mut a = data.create_decoder().unwrap();
        let mut b = data.create_decoder().unwrap();
        let mut buf = [0u8; 4];
        a.read(&mut buf);
        a.read(&mut buf);
        assert_eq!(buf, [4, 5, 6, 7]);
        b.read(&mut buf);
        assert_eq!(buf, [0, 1, 2, 3]);
    }

    #[test]
    fn test_unknown_content_is_invalid() {
        let data = AudioData::from_memory("mystery.bin", vec![7u8; 100]);
        assert!(!data.is_valid());
        assert!(!data.format().is_usable());
        assert!(data.create_decoder().is_err());
        assert_eq!(data.name(), "mystery.bin");
    }
}
