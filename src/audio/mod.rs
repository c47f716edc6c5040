//! 音频设备层
//!
//! 包含：
//! - Format: 音频格式和样本编解码
//! - Device: 设备后端接口（buffer / source）
//! - Pool: 固定容量的播放 buffer 池
//! - Software: 进程内软件混音设备

pub mod device;
pub mod format;
pub mod pool;
pub mod software;

pub use device::{AudioDevice, BufferId, DeviceError, SourceId, SourceState};
pub use format::{AudioFormat, FormatError};
pub use pool::{BufferPool, Reclaimed};
pub use software::{DeviceConfig, SoftwareDevice, SourceStats};
