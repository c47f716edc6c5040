//! 播放 buffer 池
//!
//! 固定 N 个设备 buffer，用一个游标划分：
//! - `slots[..next_free]`：已提交给设备、尚未播放完（in-flight）
//! - `slots[next_free..]`：空闲，下一个提交使用 `slots[next_free]`
//!
//! 回收只移动游标和交换句柄，不做任何分配

use super::device::{AudioDevice, BufferId, DeviceError, SourceId};

#[derive(Clone, Copy, Debug)]
struct Slot {
    buffer: BufferId,
    /// 提交时的帧数，回收时用于累计播放位置
    frames: u64,
}

/// 一次回收的结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reclaimed {
    pub buffers: usize,
    pub frames: u64,
}

/// 固定容量的设备 buffer 池
#[derive(Debug)]
pub struct BufferPool {
    slots: Box<[Slot]>,
    next_free: usize,
}

impl BufferPool {
    /// 从设备分配 `capacity` 个 buffer
    pub fn new(device: &dyn AudioDevice, capacity: usize) -> Result<Self, DeviceError> {
        let buffers = device.gen_buffers(capacity)?;
        Ok(Self {
            slots: buffers
                .into_iter()
                .map(|buffer| Slot { buffer, frames: 0 })
                .collect(),
            next_free: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 已提交、未回收的 buffer 数
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.next_free
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.next_free == self.slots.len()
    }

    /// 下一个可提交的 buffer
    #[inline]
    pub fn next_free(&self) -> Option<BufferId> {
        self.slots.get(self.next_free).map(|s| s.buffer)
    }

    /// 标记 `next_free()` 已提交给设备
    pub fn mark_queued(&mut self, frames: u64) {
        assert!(!self.is_full(), "buffer pool overflow: all buffers already queued");
        self.slots[self.next_free].frames = frames;
        self.next_free += 1;
    }

    /// 从设备回收所有已播放完的 buffer
    pub fn reclaim(&mut self, device: &dyn AudioDevice, source: SourceId) -> Reclaimed {
        let mut reclaimed = Reclaimed::default();
        let processed = device.processed_buffers(source);

        for _ in 0..processed {
            let buffer = match device.unqueue_buffer(source) {
                Ok(buffer) => buffer,
                Err(e) => {
                    log::warn!("Failed to unqueue buffer from {:?}: {}", source, e);
                    break;
                }
            };
            if let Some(frames) = self.release(buffer) {
                reclaimed.buffers += 1;
                reclaimed.frames += frames;
            }
        }
        reclaimed
    }

    /// 把一个 in-flight buffer 放回空闲区，返回它的帧数
    ///
    /// 不属于 in-flight 区的句柄被忽略，游标不会下溢
    fn release(&mut self, buffer: BufferId) -> Option<u64> {
        let Some(index) = self.slots[..self.next_free]
            .iter()
            .position(|s| s.buffer == buffer)
        else {
            log::warn!(
                "Spurious reclaim of {:?} ({} in flight), ignored",
                buffer,
                self.next_free
            );
            return None;
        };

        self.next_free -= 1;
        self.slots.swap(index, self.next_free);
        Some(self.slots[self.next_free].frames)
    }

    /// in-flight buffer 的总帧数
    pub fn in_flight_frames(&self) -> u64 {
        self.slots[..self.next_free].iter().map(|s| s.frames).sum()
    }

    /// 所有 buffer 句柄
    pub fn buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.slots.iter().map(|s| s.buffer)
    }

    /// 释放设备 buffer（必须先全部回收）
    pub fn delete(&mut self, device: &dyn AudioDevice) -> Result<(), DeviceError> {
        let buffers: Vec<BufferId> = self.buffers().collect();
        device.delete_buffers(&buffers)?;
        self.slots = Box::new([]);
        self.next_free = 0;
        Ok(())
    }
}
