//! 软件混音设备
//!
//! `AudioDevice` 的进程内实现：buffer 存在内存中，
//! `render` 按设备采样率把所有正在播放的 source 混到交织 f32 输出。
//! 播放进度只由 `render` 推进，调用方（CLI 帧循环、测试）掌握时钟。

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use super::device::{AudioDevice, BufferId, DeviceError, SourceId, SourceState};
use super::format::AudioFormat;

/// i32 左对齐样本 → [-1.0, 1.0)
const SAMPLE_SCALE: f32 = 1.0 / 2_147_483_648.0;

/// 设备配置
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    /// 输出采样率
    pub output_sample_rate: u32,
    /// 输出声道数（1 或 2）
    pub output_channels: u16,
    /// buffer 数量上限
    pub max_buffers: usize,
    /// source 数量上限
    pub max_sources: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            output_sample_rate: 48000,
            output_channels: 2,
            max_buffers: 256,
            max_sources: 32,
        }
    }
}

/// 单个 source 的诊断计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// 收到的 play 命令数
    pub play_commands: u64,
    /// 收到的 stop 命令数
    pub stop_commands: u64,
    /// 播放中队列耗尽的次数
    pub underruns: u64,
    /// 已输出的帧数
    pub frames_rendered: u64,
}

struct BufferSlot {
    format: Option<AudioFormat>,
    /// 交织、左对齐的 i32 样本
    samples: Vec<i32>,
    frames: usize,
    /// 被 source 引用的次数（入队或绑定）
    refs: usize,
}

impl BufferSlot {
    fn empty() -> Self {
        Self {
            format: None,
            samples: Vec::new(),
            frames: 0,
            refs: 0,
        }
    }

    #[inline]
    fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.format.map(|f| f.channels as usize).unwrap_or(1);
        let channel = channel.min(channels - 1);
        self.samples[frame * channels + channel] as f32 * SAMPLE_SCALE
    }
}

struct Voice {
    state: SourceState,
    queue: VecDeque<BufferId>,
    /// 队首已播放完的 buffer 数
    processed: usize,
    static_buffer: Option<BufferId>,
    /// 当前 buffer 内的帧位置（小数部分用于插值）
    cursor: f64,
    looping: bool,
    gain: f32,
    pitch: f32,
    position: [f32; 3],
    stats: SourceStats,
}

impl Voice {
    fn new() -> Self {
        Self {
            state: SourceState::Initial,
            queue: VecDeque::new(),
            processed: 0,
            static_buffer: None,
            cursor: 0.0,
            looping: false,
            gain: 1.0,
            pitch: 1.0,
            position: [0.0; 3],
            stats: SourceStats::default(),
        }
    }

    fn current_buffer(&self) -> Option<BufferId> {
        match self.static_buffer {
            Some(buffer) => Some(buffer),
            None => self.queue.get(self.processed).copied(),
        }
    }

    fn halt(&mut self) {
        self.state = SourceState::Stopped;
        self.processed = self.queue.len();
        self.cursor = 0.0;
    }

    /// 当前 buffer 播放完，切到下一个
    ///
    /// 返回 false 表示 source 已停止
    fn advance_buffer(&mut self, frames: usize) -> bool {
        if self.static_buffer.is_some() {
            if self.looping && frames > 0 {
                self.cursor -= frames as f64;
                return true;
            }
            self.halt();
            return false;
        }

        self.cursor -= frames as f64;
        self.processed += 1;
        if self.processed >= self.queue.len() {
            // 队列耗尽
            self.stats.underruns += 1;
            self.halt();
            return false;
        }
        true
    }
}

struct DeviceState {
    buffers: HashMap<BufferId, BufferSlot>,
    sources: HashMap<SourceId, Voice>,
    next_buffer: u32,
    next_source: u32,
}

/// 软件混音设备
pub struct SoftwareDevice {
    config: DeviceConfig,
    state: Mutex<DeviceState>,
}

impl SoftwareDevice {
    pub fn new(config: DeviceConfig) -> Self {
        log::debug!(
            "Software device: {}Hz {}ch, {} buffers / {} sources max",
            config.output_sample_rate,
            config.output_channels,
            config.max_buffers,
            config.max_sources
        );
        Self {
            config,
            state: Mutex::new(DeviceState {
                buffers: HashMap::new(),
                sources: HashMap::new(),
                next_buffer: 1,
                next_source: 1,
            }),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// 获取 source 的诊断计数
    pub fn source_stats(&self, source: SourceId) -> Option<SourceStats> {
        self.state.lock().sources.get(&source).map(|v| v.stats)
    }

    /// 当前分配的 buffer 数
    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// 当前分配的 source 数
    pub fn source_count(&self) -> usize {
        self.state.lock().sources.len()
    }

    /// 渲染指定帧数并返回交织输出
    pub fn render_frames(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.config.output_channels as usize];
        self.render(&mut out);
        out
    }

    /// 推进时钟（渲染后丢弃）
    pub fn advance(&self, elapsed: Duration) {
        let frames = (elapsed.as_secs_f64() * self.config.output_sample_rate as f64).round();
        if frames >= 1.0 {
            self.render_frames(frames as usize);
        }
    }

    /// 把所有正在播放的 source 混入 `out`（交织，长度为声道数整数倍）
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let channels = self.config.output_channels.max(1) as usize;
        let out_rate = self.config.output_sample_rate.max(1);

        let mut guard = self.state.lock();
        let DeviceState {
            buffers, sources, ..
        } = &mut *guard;

        for voice in sources.values_mut() {
            if voice.state == SourceState::Playing {
                mix_voice(voice, buffers, out, channels, out_rate);
            }
        }
    }

    fn with_voice<R>(&self, source: SourceId, f: impl FnOnce(&mut Voice) -> R) -> Option<R> {
        self.state.lock().sources.get_mut(&source).map(f)
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new(DeviceConfig::default())
    }
}

fn mix_voice(
    voice: &mut Voice,
    buffers: &HashMap<BufferId, BufferSlot>,
    out: &mut [f32],
    channels: usize,
    out_rate: u32,
) {
    // x 坐标决定左右声像
    let pan = voice.position[0].clamp(-1.0, 1.0);
    let left_gain = voice.gain * (1.0 - pan).min(1.0);
    let right_gain = voice.gain * (1.0 + pan).min(1.0);
    let pitch = voice.pitch.max(f32::EPSILON) as f64;

    for frame in out.chunks_exact_mut(channels) {
        // 定位到一个还有数据的 buffer
        let slot = loop {
            let Some(slot) = voice.current_buffer().and_then(|id| buffers.get(&id)) else {
                voice.halt();
                return;
            };
            if (voice.cursor as usize) < slot.frames {
                break slot;
            }
            if !voice.advance_buffer(slot.frames) {
                return;
            }
        };

        let Some(format) = slot.format else {
            voice.halt();
            return;
        };

        let index = voice.cursor as usize;
        let frac = (voice.cursor - index as f64) as f32;
        let next = (index + 1).min(slot.frames - 1);
        let left = slot.sample(index, 0) * (1.0 - frac) + slot.sample(next, 0) * frac;
        let right = slot.sample(index, 1) * (1.0 - frac) + slot.sample(next, 1) * frac;

        if channels == 1 {
            frame[0] += (left * left_gain + right * right_gain) * 0.5;
        } else {
            frame[0] += left * left_gain;
            frame[1] += right * right_gain;
        }

        voice.cursor += format.sample_rate as f64 / out_rate as f64 * pitch;
        voice.stats.frames_rendered += 1;
    }
}

impl AudioDevice for SoftwareDevice {
    fn gen_buffers(&self, count: usize) -> Result<Vec<BufferId>, DeviceError> {
        let mut state = self.state.lock();
        if state.buffers.len() + count > self.config.max_buffers {
            return Err(DeviceError::OutOfMemory);
        }

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = BufferId(state.next_buffer);
            state.next_buffer += 1;
            state.buffers.insert(id, BufferSlot::empty());
            ids.push(id);
        }
        Ok(ids)
    }

    fn delete_buffers(&self, buffers: &[BufferId]) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        // 先全部校验，失败时不删除任何 buffer
        for id in buffers {
            match state.buffers.get(id) {
                None => return Err(DeviceError::InvalidName),
                Some(slot) if slot.refs > 0 => return Err(DeviceError::InvalidOperation),
                Some(_) => {}
            }
        }
        for id in buffers {
            state.buffers.remove(id);
        }
        Ok(())
    }

    fn buffer_data(
        &self,
        buffer: BufferId,
        format: AudioFormat,
        pcm: &[u8],
    ) -> Result<(), DeviceError> {
        if format.validate().is_err() || pcm.len() % format.bytes_per_frame() != 0 {
            return Err(DeviceError::InvalidValue);
        }

        let mut state = self.state.lock();
        let slot = state.buffers.get_mut(&buffer).ok_or(DeviceError::InvalidName)?;
        if slot.refs > 0 {
            return Err(DeviceError::InvalidOperation);
        }

        let count = pcm.len() / format.bytes_per_sample as usize;
        slot.samples.resize(count, 0);
        format.bytes_to_samples(pcm, &mut slot.samples);
        slot.frames = format.frames_in(pcm.len());
        slot.format = Some(format);
        Ok(())
    }

    fn gen_source(&self) -> Result<SourceId, DeviceError> {
        let mut state = self.state.lock();
        if state.sources.len() >= self.config.max_sources {
            return Err(DeviceError::OutOfMemory);
        }
        let id = SourceId(state.next_source);
        state.next_source += 1;
        state.sources.insert(id, Voice::new());
        Ok(id)
    }

    fn delete_source(&self, source: SourceId) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let voice = state.sources.remove(&source).ok_or(DeviceError::InvalidName)?;
        for id in voice.queue.iter().chain(voice.static_buffer.iter()) {
            if let Some(slot) = state.buffers.get_mut(id) {
                slot.refs = slot.refs.saturating_sub(1);
            }
        }
        Ok(())
    }

    fn queue_buffer(&self, source: SourceId, buffer: BufferId) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let DeviceState {
            buffers, sources, ..
        } = &mut *state;

        let voice = sources.get_mut(&source).ok_or(DeviceError::InvalidName)?;
        if voice.static_buffer.is_some() {
            return Err(DeviceError::InvalidOperation);
        }
        let format = buffers
            .get(&buffer)
            .ok_or(DeviceError::InvalidName)?
            .format
            .ok_or(DeviceError::InvalidValue)?;

        // 同一队列内格式必须一致
        if let Some(first) = voice.queue.front().and_then(|id| buffers.get(id)) {
            if first.format != Some(format) {
                return Err(DeviceError::InvalidValue);
            }
        }

        voice.queue.push_back(buffer);
        if let Some(slot) = buffers.get_mut(&buffer) {
            slot.refs += 1;
        }
        Ok(())
    }

    fn unqueue_buffer(&self, source: SourceId) -> Result<BufferId, DeviceError> {
        let mut state = self.state.lock();
        let DeviceState {
            buffers, sources, ..
        } = &mut *state;

        let voice = sources.get_mut(&source).ok_or(DeviceError::InvalidName)?;
        if voice.processed == 0 {
            return Err(DeviceError::InvalidValue);
        }
        let buffer = voice.queue.pop_front().ok_or(DeviceError::InvalidValue)?;
        voice.processed -= 1;
        if let Some(slot) = buffers.get_mut(&buffer) {
            slot.refs = slot.refs.saturating_sub(1);
        }
        Ok(buffer)
    }

    fn processed_buffers(&self, source: SourceId) -> usize {
        self.with_voice(source, |v| v.processed).unwrap_or(0)
    }

    fn queued_buffers(&self, source: SourceId) -> usize {
        self.with_voice(source, |v| v.queue.len()).unwrap_or(0)
    }

    fn set_buffer(&self, source: SourceId, buffer: Option<BufferId>) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let DeviceState {
            buffers, sources, ..
        } = &mut *state;

        let voice = sources.get_mut(&source).ok_or(DeviceError::InvalidName)?;
        if matches!(voice.state, SourceState::Playing | SourceState::Paused) {
            return Err(DeviceError::InvalidOperation);
        }
        if let Some(id) = buffer {
            if !buffers.contains_key(&id) {
                return Err(DeviceError::InvalidName);
            }
        }

        // 绑定静态 buffer 会清空队列
        for id in voice.queue.drain(..).chain(voice.static_buffer.take()) {
            if let Some(slot) = buffers.get_mut(&id) {
                slot.refs = slot.refs.saturating_sub(1);
            }
        }
        voice.processed = 0;
        voice.cursor = 0.0;
        voice.static_buffer = buffer;
        if let Some(slot) = buffer.and_then(|id| buffers.get_mut(&id)) {
            slot.refs += 1;
        }
        Ok(())
    }

    fn source_state(&self, source: SourceId) -> SourceState {
        self.with_voice(source, |v| v.state).unwrap_or_default()
    }

    fn play(&self, source: SourceId) {
        self.with_voice(source, |voice| {
            voice.stats.play_commands += 1;
            match voice.state {
                SourceState::Playing => {}
                SourceState::Paused => voice.state = SourceState::Playing,
                SourceState::Initial | SourceState::Stopped => {
                    voice.processed = 0;
                    voice.cursor = 0.0;
                    voice.state = if voice.current_buffer().is_some() {
                        SourceState::Playing
                    } else {
                        SourceState::Stopped
                    };
                }
            }
        });
    }

    fn pause(&self, source: SourceId) {
        self.with_voice(source, |voice| {
            if voice.state == SourceState::Playing {
                voice.state = SourceState::Paused;
            }
        });
    }

    fn stop(&self, source: SourceId) {
        self.with_voice(source, |voice| {
            voice.stats.stop_commands += 1;
            voice.halt();
        });
    }

    fn set_looping(&self, source: SourceId, looping: bool) {
        self.with_voice(source, |v| v.looping = looping);
    }

    fn set_gain(&self, source: SourceId, gain: f32) {
        self.with_voice(source, |v| v.gain = gain.max(0.0));
    }

    fn set_pitch(&self, source: SourceId, pitch: f32) {
        self.with_voice(source, |v| v.pitch = pitch);
    }

    fn set_position(&self, source: SourceId, position: [f32; 3]) {
        self.with_voice(source, |v| v.position = position);
    }

    fn sample_offset(&self, source: SourceId) -> u64 {
        let state = self.state.lock();
        let Some(voice) = state.sources.get(&source) else {
            return 0;
        };
        if !matches!(voice.state, SourceState::Playing | SourceState::Paused) {
            return 0;
        }

        let played: usize = voice
            .queue
            .iter()
            .take(voice.processed)
            .filter_map(|id| state.buffers.get(id))
            .map(|slot| slot.frames)
            .sum();
        played as u64 + voice.cursor as u64
    }

    fn set_sample_offset(&self, source: SourceId, frames: u64) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let DeviceState {
            buffers, sources, ..
        } = &mut *state;

        let voice = sources.get_mut(&source).ok_or(DeviceError::InvalidName)?;
        let mut remaining = frames as usize;

        if let Some(slot) = voice.static_buffer.and_then(|id| buffers.get(&id)) {
            if remaining >= slot.frames {
                return Err(DeviceError::InvalidValue);
            }
            voice.cursor = remaining as f64;
            return Ok(());
        }

        for (index, id) in voice.queue.iter().enumerate() {
            let len = buffers.get(id).map(|s| s.frames).unwrap_or(0);
            if remaining < len {
                voice.processed = index;
                voice.cursor = remaining as f64;
                return Ok(());
            }
            remaining -= len;
        }
        Err(DeviceError::InvalidValue)
    }
}
