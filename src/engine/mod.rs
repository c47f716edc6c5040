//! 播放引擎
//!
//! 整合解码、buffer 池、设备各模块
//! 核心设计：单线程协作式，每帧由播放器的 `update` 驱动一次流泵（stream pump），
//! 没有后台解码线程

mod buffer_player;
mod player;
mod sound_buffer;
mod stream;

use std::sync::Arc;

use thiserror::Error;

use crate::audio::{AudioDevice, AudioFormat, DeviceError, FormatError, SourceId};
use crate::decode::DecodeError;

pub use buffer_player::BufferPlayer;
pub use player::StreamPlayer;
pub use sound_buffer::SoundBuffer;
pub use stream::{AudioStream, StreamStats};

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
    /// 原始样本长度不是帧大小的整数倍
    #[error("Sample data of {len} bytes is not a whole number of {frame}-byte frames")]
    InvalidSampleData { len: usize, frame: usize },
    /// 音频数据没有成功加载
    #[error("Invalid audio data: {0}")]
    InvalidData(String),
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
}

/// 播放器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// 流式播放配置
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// 轮转使用的设备 buffer 数
    pub num_buffers: usize,
    /// 每个 chunk 的字节数（必须是 4 的倍数，保证任意支持格式下都是整帧）
    pub chunk_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            num_buffers: 3,
            // 16 KiB ≈ 93ms @ 44.1kHz 立体声 16-bit
            chunk_bytes: 16 * 1024,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.num_buffers == 0 {
            return Err(EngineError::InvalidState("stream needs at least one buffer"));
        }
        if self.chunk_bytes == 0 || self.chunk_bytes % 4 != 0 {
            return Err(EngineError::InvalidState(
                "chunk size must be a non-zero multiple of 4 bytes",
            ));
        }
        Ok(())
    }
}

/// 播放器公共控制接口
///
/// 状态机：
/// - Initial / Stopped --play--> Playing
/// - Playing --pause--> Paused --play--> Playing
/// - Playing / Paused --stop--> Stopped
pub trait AudioPlayer {
    fn state(&self) -> PlayerState;

    fn is_playing(&self) -> bool {
        self.state() == PlayerState::Playing
    }

    fn play(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self);

    /// 停止播放（幂等）
    fn stop(&mut self);

    /// 每帧调用一次
    fn update(&mut self);

    fn is_looping(&self) -> bool;

    fn set_looping(&mut self, looping: bool);

    fn gain(&self) -> f32;

    fn set_gain(&mut self, gain: f32);

    fn pitch(&self) -> f32;

    fn set_pitch(&mut self, pitch: f32);

    fn position(&self) -> [f32; 3];

    fn set_position(&mut self, position: [f32; 3]);

    /// 当前播放位置（帧）
    fn sample_offset(&self) -> u64;

    fn set_sample_offset(&mut self, frames: u64) -> Result<(), EngineError>;

    /// 总时长（秒），未知时为 0
    fn duration(&self) -> f64;

    fn format(&self) -> AudioFormat;

    fn source(&self) -> SourceId;
}

/// 播放器共享部分：设备 source 和属性
pub(crate) struct PlayerCore {
    device: Arc<dyn AudioDevice>,
    source: SourceId,
    state: PlayerState,
    looping: bool,
    gain: f32,
    pitch: f32,
    position: [f32; 3],
}

impl PlayerCore {
    fn new(device: Arc<dyn AudioDevice>) -> Result<Self, EngineError> {
        let source = device.gen_source()?;
        Ok(Self {
            device,
            source,
            state: PlayerState::Initial,
            looping: false,
            gain: 1.0,
            pitch: 1.0,
            position: [0.0; 3],
        })
    }

    /// 把属性同步到设备 source
    fn apply_props(&self) {
        self.device.set_gain(self.source, self.gain);
        self.device.set_pitch(self.source, self.pitch);
        self.device.set_position(self.source, self.position);
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
        self.device.set_gain(self.source, gain);
    }

    fn set_pitch(&mut self, pitch: f32) {
        self.pitch = pitch;
        self.device.set_pitch(self.source, pitch);
    }

    fn set_position(&mut self, position: [f32; 3]) {
        self.position = position;
        self.device.set_position(self.source, position);
    }

    #[inline]
    fn is_active(&self) -> bool {
        matches!(self.state, PlayerState::Playing | PlayerState::Paused)
    }
}

impl Drop for PlayerCore {
    fn drop(&mut self) {
        if let Err(e) = self.device.delete_source(self.source) {
            log::warn!("Failed to delete {:?}: {}", self.source, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_validation() {
        assert!(StreamConfig::default().validate().is_ok());
        assert!(matches!(
            StreamConfig {
                num_buffers: 0,
                ..Default::default()
            }
            .validate(),
            Err(EngineError::InvalidState(_))
        ));
        for chunk_bytes in [0, 6, 1023] {
            assert!(StreamConfig {
                num_buffers: 3,
                chunk_bytes
            }
            .validate()
            .is_err());
        }
    }
}
