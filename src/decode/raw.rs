//! 无头 PCM 解码器
//!
//! 数据已经是设备原生格式，`read` 只做拷贝

use std::sync::Arc;

use super::decoder::{DecodeError, PcmDecoder};
use super::source::ByteSource;
use crate::audio::AudioFormat;

/// 内存中的原始 PCM
pub struct RawPcmDecoder {
    name: String,
    bytes: Arc<[u8]>,
    format: AudioFormat,
    position: usize,
}

impl RawPcmDecoder {
    pub fn new(
        name: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        format: AudioFormat,
    ) -> Result<Self, DecodeError> {
        format.validate()?;
        let bytes = bytes.into();
        let frame = format.bytes_per_frame();
        if bytes.len() % frame != 0 {
            return Err(DecodeError::PartialFrame {
                len: bytes.len(),
                frame,
            });
        }

        Ok(Self {
            name: name.into(),
            bytes,
            format,
            position: 0,
        })
    }

    /// 从字节源读取全部数据
    pub fn from_source(source: &ByteSource, format: AudioFormat) -> Result<Self, DecodeError> {
        log::info!("Loading raw PCM: {}", source.name());
        Self::new(source.name(), source.read_all()?, format)
    }

    /// 当前读取位置（字节）
    pub fn position(&self) -> usize {
        self.position
    }
}

impl PcmDecoder for RawPcmDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.format.frames_in(self.bytes.len()) as u64)
    }

    fn read(&mut self, dst: &mut [u8]) -> usize {
        let available = &self.bytes[self.position..];
        let n = available.len().min(dst.len());
        dst[..n].copy_from_slice(&available[..n]);
        self.position += n;
        n
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.position = 0;
        Ok(())
    }

    fn skip(&mut self, bytes: usize) -> usize {
        let n = bytes.min(self.bytes.len() - self.position);
        self.position += n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_read_only_at_eof() {
        let mut decoder =
            RawPcmDecoder::new("ramp", (0u8..10).collect::<Vec<_>>(), AudioFormat::mono16(8000))
                .unwrap();
        let mut dst = [0u8; 4];
        assert_eq!(decoder.read(&mut dst), 4);
        assert_eq!(decoder.read(&mut dst), 4);
        assert_eq!(decoder.read(&mut dst), 2);
        assert_eq!(&dst[..2], &[8, 9]);
        assert_eq!(decoder.read(&mut dst), 0);

        decoder.rewind().unwrap();
        assert_eq!(decoder.position(), 0);
        assert_eq!(decoder.read(&mut dst), 4);
        assert_eq!(dst, [0, 1, 2, 3]);
    }

    #[test]
    fn test_rejects_partial_frames_and_bad_formats() {
        assert!(matches!(
            RawPcmDecoder::new("odd", vec![0u8; 3], AudioFormat::stereo16(8000)),
            Err(DecodeError::PartialFrame { len: 3, frame: 4 })
        ));
        assert!(matches!(
            RawPcmDecoder::new("24bit", vec![0u8; 6], AudioFormat::new(1, 3, 8000)),
            Err(DecodeError::Format(_))
        ));
    }

    #[test]
    fn test_skip_is_clamped() {
        let mut decoder =
            RawPcmDecoder::new("s", vec![0u8; 8], AudioFormat::mono8(8000)).unwrap();
        assert_eq!(decoder.total_frames(), Some(8));
        assert_eq!(decoder.skip(5), 5);
        assert_eq!(decoder.skip(5), 3);
        assert_eq!(decoder.read(&mut [0u8; 4]), 0);
    }
}
