//! 音频格式和样本编解码
//!
//! 设备只接受交织 PCM：
//! - 声道：单声道 / 立体声
//! - 位深：8-bit（无符号，偏移 128）/ 16-bit（有符号 little-endian）
//!
//! 内部表示：所有位深统一左对齐到 i32 的高位
//! - 8-bit: 占据 bit[31:24]
//! - 16-bit: 占据 bit[31:16]

use thiserror::Error;

/// 格式配置错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("Unsupported number of channels: {0}")]
    UnsupportedChannels(u16),
    #[error("Unsupported bytes per sample: {0}")]
    UnsupportedSampleSize(u16),
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
}

/// 音频格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u16,
    pub bytes_per_sample: u16,
    pub sample_rate: u32,
}

impl AudioFormat {
    /// 创建新的音频格式（不做校验，见 [`AudioFormat::checked`]）
    pub const fn new(channels: u16, bytes_per_sample: u16, sample_rate: u32) -> Self {
        Self {
            channels,
            bytes_per_sample,
            sample_rate,
        }
    }

    pub const fn mono8(sample_rate: u32) -> Self {
        Self::new(1, 1, sample_rate)
    }

    pub const fn mono16(sample_rate: u32) -> Self {
        Self::new(1, 2, sample_rate)
    }

    pub const fn stereo8(sample_rate: u32) -> Self {
        Self::new(2, 1, sample_rate)
    }

    pub const fn stereo16(sample_rate: u32) -> Self {
        Self::new(2, 2, sample_rate)
    }

    /// 创建并校验音频格式
    pub fn checked(
        channels: u16,
        bytes_per_sample: u16,
        sample_rate: u32,
    ) -> Result<Self, FormatError> {
        let format = Self::new(channels, bytes_per_sample, sample_rate);
        format.validate()?;
        Ok(format)
    }

    /// 只支持单声道/立体声、8/16-bit，采样率必须大于 0
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.channels != 1 && self.channels != 2 {
            return Err(FormatError::UnsupportedChannels(self.channels));
        }
        if self.bytes_per_sample != 1 && self.bytes_per_sample != 2 {
            return Err(FormatError::UnsupportedSampleSize(self.bytes_per_sample));
        }
        if self.sample_rate == 0 {
            return Err(FormatError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }

    /// 格式元数据全为 0 时视为不可用（无效解码器）
    #[inline]
    pub fn is_usable(&self) -> bool {
        self.validate().is_ok()
    }

    /// 每帧的字节数
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample as usize * self.channels as usize
    }

    /// 字节数对应的帧数
    #[inline]
    pub fn frames_in(&self, bytes: usize) -> usize {
        match self.bytes_per_frame() {
            0 => 0,
            bpf => bytes / bpf,
        }
    }

    /// 字节数对应的播放时长（秒）
    pub fn duration_of(&self, bytes: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames_in(bytes) as f64 / self.sample_rate as f64
    }

    /// 将原始字节解码为 i32 样本（左对齐到 32-bit）
    ///
    /// 返回解码的样本数
    pub fn bytes_to_samples(&self, bytes: &[u8], output: &mut [i32]) -> usize {
        match self.bytes_per_sample {
            1 => {
                let count = bytes.len().min(output.len());
                for (out, &byte) in output.iter_mut().zip(bytes) {
                    // 无符号 8-bit → 有符号，再左对齐
                    *out = (byte as i32 - 128) << 24;
                }
                count
            }
            2 => {
                let mut count = 0;
                for (out, chunk) in output.iter_mut().zip(bytes.chunks_exact(2)) {
                    let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                    *out = (sample as i32) << 16;
                    count += 1;
                }
                count
            }
            _ => 0,
        }
    }

    /// 将 i32 样本（左对齐）打包为输出字节
    ///
    /// 返回写入的字节数
    pub fn samples_to_bytes(&self, samples: &[i32], output: &mut [u8]) -> usize {
        match self.bytes_per_sample {
            1 => {
                let count = samples.len().min(output.len());
                for (out, &sample) in output.iter_mut().zip(samples) {
                    *out = ((sample >> 24) + 128) as u8;
                }
                count
            }
            2 => {
                let mut written = 0;
                for (out, &sample) in output.chunks_exact_mut(2).zip(samples) {
                    // 右移 16 位取回 16-bit
                    let bytes = ((sample >> 16) as i16).to_le_bytes();
                    out.copy_from_slice(&bytes);
                    written += 2;
                }
                written
            }
            _ => 0,
        }
    }
}
