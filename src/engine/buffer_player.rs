//! 静态 buffer 播放器

use std::sync::Arc;

use crate::audio::{AudioDevice, AudioFormat, SourceId, SourceState};

use super::sound_buffer::SoundBuffer;
use super::{AudioPlayer, EngineError, PlayerCore, PlayerState};

/// 播放一个完整加载的 [`SoundBuffer`]
///
/// 循环和定位都交给设备处理；多个播放器可以共享同一个 buffer
pub struct BufferPlayer {
    core: PlayerCore,
    buffer: Arc<SoundBuffer>,
    /// 未播放时设置的位置，下次 play 时生效
    pending_offset: Option<u64>,
}

impl BufferPlayer {
    pub fn new(device: Arc<dyn AudioDevice>, buffer: Arc<SoundBuffer>) -> Result<Self, EngineError> {
        Ok(Self {
            core: PlayerCore::new(device)?,
            buffer,
            pending_offset: None,
        })
    }

    pub fn buffer(&self) -> &Arc<SoundBuffer> {
        &self.buffer
    }

    /// 解绑 buffer，使其可以被重新加载
    fn detach(&mut self) {
        if let Err(e) = self.core.device.set_buffer(self.core.source, None) {
            log::warn!("Failed to detach {}: {}", self.buffer.name(), e);
        }
    }
}

impl AudioPlayer for BufferPlayer {
    fn state(&self) -> PlayerState {
        self.core.state
    }

    fn play(&mut self) -> Result<(), EngineError> {
        let source = self.core.source;
        match self.core.state {
            PlayerState::Playing => {}
            PlayerState::Paused => {
                self.core.device.play(source);
                self.core.state = PlayerState::Playing;
            }
            PlayerState::Initial | PlayerState::Stopped => {
                self.core.device.set_buffer(source, Some(self.buffer.id()))?;
                self.core.device.set_looping(source, self.core.looping);
                self.core.apply_props();
                self.core.device.play(source);
                if let Some(frames) = self.pending_offset.take() {
                    self.core.device.set_sample_offset(source, frames)?;
                }
                self.core.state = PlayerState::Playing;
            }
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.core.state == PlayerState::Playing {
            self.core.device.pause(self.core.source);
            self.core.state = PlayerState::Paused;
        }
    }

    fn stop(&mut self) {
        if self.core.is_active() {
            self.core.device.stop(self.core.source);
            self.detach();
            self.core.state = PlayerState::Stopped;
        }
    }

    /// 检测设备是否已自然播放结束
    fn update(&mut self) {
        if self.core.state == PlayerState::Playing
            && self.core.device.source_state(self.core.source) == SourceState::Stopped
        {
            self.detach();
            self.core.state = PlayerState::Stopped;
        }
    }

    fn is_looping(&self) -> bool {
        self.core.looping
    }

    fn set_looping(&mut self, looping: bool) {
        self.core.looping = looping;
        self.core.device.set_looping(self.core.source, looping);
    }

    fn gain(&self) -> f32 {
        self.core.gain
    }

    fn set_gain(&mut self, gain: f32) {
        self.core.set_gain(gain);
    }

    fn pitch(&self) -> f32 {
        self.core.pitch
    }

    fn set_pitch(&mut self, pitch: f32) {
        self.core.set_pitch(pitch);
    }

    fn position(&self) -> [f32; 3] {
        self.core.position
    }

    fn set_position(&mut self, position: [f32; 3]) {
        self.core.set_position(position);
    }

    fn sample_offset(&self) -> u64 {
        if self.core.is_active() {
            self.core.device.sample_offset(self.core.source)
        } else {
            self.pending_offset.unwrap_or(0)
        }
    }

    /// 任意位置定位，超出长度返回错误
    fn set_sample_offset(&mut self, frames: u64) -> Result<(), EngineError> {
        if frames >= self.buffer.num_samples() {
            return Err(EngineError::InvalidState("sample offset past the end of the buffer"));
        }
        if self.core.is_active() {
            self.core.device.set_sample_offset(self.core.source, frames)?;
        } else {
            self.pending_offset = Some(frames);
        }
        Ok(())
    }

    fn duration(&self) -> f64 {
        self.buffer.duration()
    }

    fn format(&self) -> AudioFormat {
        self.buffer.format()
    }

    fn source(&self) -> SourceId {
        self.core.source
    }
}

impl Drop for BufferPlayer {
    fn drop(&mut self) {
        self.core.device.stop(self.core.source);
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{DeviceConfig, SoftwareDevice};

    fn setup(frames: usize) -> (Arc<SoftwareDevice>, Arc<SoundBuffer>) {
        let dev = Arc::new(SoftwareDevice::new(DeviceConfig {
            output_sample_rate: 8000,
            ..Default::default()
        }));
        let mut buffer =
            SoundBuffer::with_format(dev.clone(), "beep", AudioFormat::mono8(8000)).unwrap();
        buffer.load_from_samples(&vec![200u8; frames]).unwrap();
        (dev, Arc::new(buffer))
    }

    #[test]
    fn test_plays_once_then_stops() {
        let (dev, buffer) = setup(100);
        let mut p = BufferPlayer::new(dev.clone(), buffer.clone()).unwrap();
        p.play().unwrap();
        assert_eq!(p.state(), PlayerState::Playing);

        dev.render_frames(50);
        p.update();
        assert_eq!(p.sample_offset(), 50);

        dev.render_frames(60);
        p.update();
        assert_eq!(p.state(), PlayerState::Stopped);
        assert_eq!(dev.source_stats(p.source()).unwrap().frames_rendered, 100);
    }

    #[test]
    fn test_looping_keeps_playing() {
        let (dev, buffer) = setup(100);
        let mut p = BufferPlayer::new(dev.clone(), buffer).unwrap();
        p.set_looping(true);
        p.play().unwrap();

        dev.render_frames(250);
        p.update();
        assert_eq!(p.state(), PlayerState::Playing);
        assert_eq!(p.sample_offset(), 50);
    }

    #[test]
    fn test_offset_set_before_play_is_applied() {
        let (dev, buffer) = setup(100);
        let mut p = BufferPlayer::new(dev.clone(), buffer).unwrap();
        p.set_sample_offset(80).unwrap();
        assert_eq!(p.sample_offset(), 80);

        p.play().unwrap();
        dev.render_frames(5);
        assert_eq!(p.sample_offset(), 85);

        // 播放中任意向后定位
        p.set_sample_offset(10).unwrap();
        assert_eq!(p.sample_offset(), 10);
        assert!(p.set_sample_offset(100).is_err());
    }

    #[test]
    fn test_stop_detaches_buffer_for_reload() {
        let (dev, buffer) = setup(100);
        let mut p = BufferPlayer::new(dev.clone(), buffer.clone()).unwrap();
        p.play().unwrap();
        p.stop();
        p.stop();
        assert_eq!(p.state(), PlayerState::Stopped);
        assert_eq!(dev.source_stats(p.source()).unwrap().stop_commands, 1);

        drop(p);
        let mut buffer = Arc::try_unwrap(buffer).ok().unwrap();
        buffer.load_from_samples(&[128u8; 10]).unwrap();
        assert_eq!(buffer.num_samples(), 10);
    }

    #[test]
    fn test_shared_buffer_between_players() {
        let (dev, buffer) = setup(100);
        let mut a = BufferPlayer::new(dev.clone(), buffer.clone()).unwrap();
        let mut b = BufferPlayer::new(dev.clone(), buffer.clone()).unwrap();
        a.play().unwrap();
        b.play().unwrap();
        b.pause();

        dev.render_frames(30);
        assert_eq!(a.sample_offset(), 30);
        assert_eq!(b.sample_offset(), 0);
        assert_eq!(a.duration(), b.duration());
    }
}
