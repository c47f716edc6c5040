//! 音频设备抽象
//!
//! 引擎只通过这组接口和底层后端交互：
//! - Buffer：设备持有的 PCM 存储，按句柄引用
//! - Source：一个发声体，拥有 buffer 队列和播放状态
//!
//! 语义与基于队列的硬件 voice 一致：
//! - 播放完的 buffer 计入 `processed_buffers`，只有它们可以被 `unqueue_buffer` 弹出
//! - 队列耗尽时 source 自动转为 Stopped（underrun）
//! - `stop` 会把所有已入队的 buffer 标记为已播放

use thiserror::Error;

use super::format::AudioFormat;

/// 设备 buffer 句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// 设备 source 句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

/// Source 播放状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// 设备错误码
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// 句柄不存在或已删除
    #[error("invalid name")]
    InvalidName,
    /// 参数非法（格式、长度）
    #[error("invalid value")]
    InvalidValue,
    /// 当前状态下不允许该操作
    #[error("invalid operation")]
    InvalidOperation,
    /// 资源耗尽
    #[error("out of memory")]
    OutOfMemory,
}

/// 音频设备后端
///
/// 所有方法只需 `&self`：实现方负责内部同步，
/// 这样多个播放器可以共享同一个 `Arc<dyn AudioDevice>`
pub trait AudioDevice: Send + Sync {
    /// 分配 `count` 个 buffer
    fn gen_buffers(&self, count: usize) -> Result<Vec<BufferId>, DeviceError>;

    /// 释放 buffer（仍被引用的 buffer 会失败）
    fn delete_buffers(&self, buffers: &[BufferId]) -> Result<(), DeviceError>;

    /// 上传 PCM 数据（长度必须是帧大小的整数倍）
    fn buffer_data(
        &self,
        buffer: BufferId,
        format: AudioFormat,
        pcm: &[u8],
    ) -> Result<(), DeviceError>;

    fn gen_source(&self) -> Result<SourceId, DeviceError>;

    fn delete_source(&self, source: SourceId) -> Result<(), DeviceError>;

    /// 追加 buffer 到 source 的播放队列
    fn queue_buffer(&self, source: SourceId, buffer: BufferId) -> Result<(), DeviceError>;

    /// 弹出队首一个已播放完的 buffer
    fn unqueue_buffer(&self, source: SourceId) -> Result<BufferId, DeviceError>;

    /// 已播放完、等待 unqueue 的 buffer 数
    fn processed_buffers(&self, source: SourceId) -> usize;

    /// 队列中的 buffer 总数（含已播放完的）
    fn queued_buffers(&self, source: SourceId) -> usize;

    /// 绑定单个静态 buffer（`None` 解绑）
    fn set_buffer(&self, source: SourceId, buffer: Option<BufferId>) -> Result<(), DeviceError>;

    fn source_state(&self, source: SourceId) -> SourceState;

    fn play(&self, source: SourceId);

    fn pause(&self, source: SourceId);

    fn stop(&self, source: SourceId);

    /// 静态 buffer 的循环标志（流式播放由引擎自己处理循环）
    fn set_looping(&self, source: SourceId, looping: bool);

    fn set_gain(&self, source: SourceId, gain: f32);

    fn set_pitch(&self, source: SourceId, pitch: f32);

    fn set_position(&self, source: SourceId, position: [f32; 3]);

    /// 相对于队首（或静态 buffer 起点）的播放位置（帧）
    fn sample_offset(&self, source: SourceId) -> u64;

    fn set_sample_offset(&self, source: SourceId, frames: u64) -> Result<(), DeviceError>;
}
