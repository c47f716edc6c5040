//! 流泵（stream pump）
//!
//! 每帧一次 `enqueue`：
//! 1. 回收设备已播放完的 buffer
//! 2. 有空闲 buffer 时解码一个 chunk（循环播放时跨越循环点无缝拼接）
//! 3. 提交 chunk；没有数据且没有 in-flight buffer 时流已耗尽
//! 4. 设备因 underrun 停下但队列非空时重新 play

use std::sync::Arc;

use crate::audio::{AudioDevice, AudioFormat, BufferId, BufferPool, SourceId, SourceState};
use crate::decode::PcmDecoder;

use super::{EngineError, StreamConfig};

/// 流泵统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// 已提交的 chunk 数
    pub chunks_submitted: u64,
    /// 已提交的字节数
    pub bytes_submitted: u64,
    /// underrun 后重新 play 的次数
    pub underrun_recoveries: u64,
    /// 循环回绕次数
    pub loops: u64,
    /// 设备拒绝提交的次数
    pub submit_failures: u64,
}

/// 增量解码并轮转提交到设备的音频流
pub struct AudioStream {
    device: Arc<dyn AudioDevice>,
    decoder: Box<dyn PcmDecoder>,
    format: AudioFormat,
    pool: BufferPool,
    /// 每次 tick 复用的解码区
    chunk: Box<[u8]>,
    current_buffer: Option<BufferId>,
    /// 已回收 buffer 的帧数（自上次 stop / seek 起）
    played_frames: u64,
    /// seek 起点（帧）
    base_frames: u64,
    /// 本轮播放是否已经启动过设备
    started: bool,
    stats: StreamStats,
}

impl AudioStream {
    pub fn new(
        device: Arc<dyn AudioDevice>,
        decoder: Box<dyn PcmDecoder>,
        config: &StreamConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let format = decoder.format();
        format.validate()?;

        let pool = BufferPool::new(device.as_ref(), config.num_buffers)?;
        log::debug!(
            "Stream {}: {} x {} bytes ({:.1}ms per chunk)",
            decoder.name(),
            config.num_buffers,
            config.chunk_bytes,
            format.duration_of(config.chunk_bytes) * 1000.0
        );

        Ok(Self {
            device,
            decoder,
            format,
            pool,
            chunk: vec![0u8; config.chunk_bytes].into_boxed_slice(),
            current_buffer: None,
            played_frames: 0,
            base_frames: 0,
            started: false,
            stats: StreamStats::default(),
        })
    }

    /// 泵一次
    ///
    /// 返回 false 表示流已播放完毕，设备已被 stop
    pub fn enqueue(&mut self, source: SourceId, looping: bool) -> bool {
        let reclaimed = self.pool.reclaim(self.device.as_ref(), source);
        self.played_frames += reclaimed.frames;

        if let Some(buffer) = self.pool.next_free() {
            let bytes = self.fill_chunk(looping);
            if bytes > 0 {
                self.submit(source, buffer, bytes);
            } else if self.pool.in_flight() == 0 {
                log::info!("Stream {} exhausted", self.decoder.name());
                self.stop(source);
                return false;
            }
        }

        if self.device.source_state(source) != SourceState::Playing
            && self.device.queued_buffers(source) > 0
        {
            if self.started {
                self.stats.underrun_recoveries += 1;
                log::debug!("Underrun on {:?}, restarting playback", source);
            }
            self.started = true;
            self.device.play(source);
        }

        true
    }

    /// 解码一个 chunk，返回有效字节数
    ///
    /// 循环播放时短读后 rewind 并继续填充，直到 chunk 填满或内容为空
    fn fill_chunk(&mut self, looping: bool) -> usize {
        let mut filled = self.decoder.read(&mut self.chunk);

        while looping && filled < self.chunk.len() {
            if let Err(e) = self.decoder.rewind() {
                log::warn!("Cannot loop {}: {}", self.decoder.name(), e);
                break;
            }
            let n = self.decoder.read(&mut self.chunk[filled..]);
            if n == 0 {
                break;
            }
            self.stats.loops += 1;
            filled += n;
        }
        filled
    }

    fn submit(&mut self, source: SourceId, buffer: BufferId, bytes: usize) {
        let result = self
            .device
            .buffer_data(buffer, self.format, &self.chunk[..bytes])
            .and_then(|()| self.device.queue_buffer(source, buffer));

        match result {
            Ok(()) => {
                self.pool.mark_queued(self.format.frames_in(bytes) as u64);
                self.current_buffer = Some(buffer);
                self.stats.chunks_submitted += 1;
                self.stats.bytes_submitted += bytes as u64;
            }
            Err(e) => {
                self.stats.submit_failures += 1;
                log::warn!("Failed to submit {} bytes to {:?}: {}", bytes, buffer, e);
            }
        }
    }

    /// 停止设备、回收全部 buffer 并 rewind 解码器
    pub fn stop(&mut self, source: SourceId) {
        self.device.stop(source);
        self.pool.reclaim(self.device.as_ref(), source);
        if self.pool.in_flight() > 0 {
            log::warn!(
                "{} buffers still in flight after stopping {:?}",
                self.pool.in_flight(),
                source
            );
        }

        if let Err(e) = self.decoder.rewind() {
            log::warn!("Failed to rewind {}: {}", self.decoder.name(), e);
        }
        self.current_buffer = None;
        self.played_frames = 0;
        self.base_frames = 0;
        self.started = false;
        log::debug!("Stream {} stopped", self.decoder.name());
    }

    /// 停止并定位到第 `frames` 帧，返回实际定位到的帧
    ///
    /// 超出长度时停在末尾
    pub fn seek(&mut self, source: SourceId, frames: u64) -> u64 {
        self.stop(source);
        let frame = self.format.bytes_per_frame();
        let skipped = self.decoder.skip(frames as usize * frame);
        self.base_frames = (skipped / frame) as u64;
        self.base_frames
    }

    /// 已播放的帧数（不含设备当前队列内的进度）
    #[inline]
    pub fn played_frames(&self) -> u64 {
        self.base_frames + self.played_frames
    }

    /// 设备队列中尚未回收的帧数
    #[inline]
    pub fn queued_frames(&self) -> u64 {
        self.pool.in_flight_frames()
    }

    #[inline]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    #[inline]
    pub fn chunk_capacity(&self) -> usize {
        self.chunk.len()
    }

    /// 每个 chunk 的播放时长（秒）
    pub fn chunk_duration(&self) -> f64 {
        self.format.duration_of(self.chunk.len())
    }

    /// in-flight buffer 数
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    #[inline]
    pub fn num_buffers(&self) -> usize {
        self.pool.capacity()
    }

    /// 最近一次提交的 buffer
    #[inline]
    pub fn current_buffer(&self) -> Option<BufferId> {
        self.current_buffer
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.decoder.total_frames()
    }

    pub fn name(&self) -> &str {
        self.decoder.name()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        if let Err(e) = self.pool.delete(self.device.as_ref()) {
            log::warn!("Failed to delete stream buffers of {}: {}", self.decoder.name(), e);
        }
    }
}
