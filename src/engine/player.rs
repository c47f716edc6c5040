//! 流式播放器

use std::sync::Arc;

use crate::audio::{AudioDevice, AudioFormat, SourceId, SourceState};
use crate::decode::{open_decoder, AudioData, ByteSource, PcmDecoder};

use super::stream::{AudioStream, StreamStats};
use super::{AudioPlayer, EngineError, PlayerCore, PlayerState, StreamConfig};

/// 边解码边播放的播放器
///
/// 每帧调用 [`AudioPlayer::update`] 驱动内部的流泵
pub struct StreamPlayer {
    // 字段顺序决定析构顺序：先释放 buffer，再删除 source
    stream: AudioStream,
    core: PlayerCore,
}

impl StreamPlayer {
    pub fn new(
        device: Arc<dyn AudioDevice>,
        decoder: Box<dyn PcmDecoder>,
        config: &StreamConfig,
    ) -> Result<Self, EngineError> {
        let core = PlayerCore::new(device.clone())?;
        let stream = AudioStream::new(device, decoder, config)?;
        Ok(Self { stream, core })
    }

    /// 从已加载的音频数据创建（每个播放器有独立的解码器）
    pub fn from_data(
        device: Arc<dyn AudioDevice>,
        data: &AudioData,
        config: &StreamConfig,
    ) -> Result<Self, EngineError> {
        if !data.is_valid() {
            return Err(EngineError::InvalidData(data.name()));
        }
        Self::new(device, data.create_decoder()?, config)
    }

    pub fn from_source(
        device: Arc<dyn AudioDevice>,
        source: ByteSource,
        config: &StreamConfig,
    ) -> Result<Self, EngineError> {
        Self::new(device, open_decoder(&source)?, config)
    }

    pub fn stream(&self) -> &AudioStream {
        &self.stream
    }

    pub fn stats(&self) -> StreamStats {
        self.stream.stats()
    }

    /// 填充第一个 chunk 并启动设备
    fn start(&mut self) {
        let source = self.core.source;
        self.core.device.set_looping(source, false);
        self.core.apply_props();
        self.core.state = if self.stream.enqueue(source, self.core.looping) {
            PlayerState::Playing
        } else {
            PlayerState::Stopped
        };
    }
}

impl AudioPlayer for StreamPlayer {
    fn state(&self) -> PlayerState {
        self.core.state
    }

    fn play(&mut self) -> Result<(), EngineError> {
        match self.core.state {
            PlayerState::Playing => {}
            PlayerState::Paused => {
                let source = self.core.source;
                if self.core.device.source_state(source) == SourceState::Stopped {
                    // 暂停前已 underrun：先回收已播放的 buffer，再由流泵重启
                    self.core.state = if self.stream.enqueue(source, self.core.looping) {
                        PlayerState::Playing
                    } else {
                        PlayerState::Stopped
                    };
                } else {
                    self.core.device.play(source);
                    self.core.state = PlayerState::Playing;
                }
            }
            PlayerState::Initial | PlayerState::Stopped => self.start(),
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
            self.stream.stop(self.core.source);
            self.core.state = PlayerState::Stopped;
        }
    }

    fn update(&mut self) {
        if self.core.state == PlayerState::Playing
            && !self.stream.enqueue(self.core.source, self.core.looping)
        {
            self.core.state = PlayerState::Stopped;
        }
    }

    fn is_looping(&self) -> bool {
        self.core.looping
    }

    /// 循环由流泵处理，设备 source 始终不循环
    fn set_looping(&mut self, looping: bool) {
        self.core.looping = looping;
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
        let source = self.core.source;
        let queued = match self.core.device.source_state(source) {
            SourceState::Playing | SourceState::Paused => self.core.device.sample_offset(source),
            // underrun 后到下一次 tick 之前，队列中的 buffer 都已播放完
            SourceState::Initial | SourceState::Stopped => self.stream.queued_frames(),
        };
        let offset = self.stream.played_frames() + queued;
        match self.stream.total_frames() {
            Some(total) if self.core.looping && total > 0 => offset % total,
            _ => offset,
        }
    }

    /// 流式播放只能顺序解码：先 rewind，再跳过 `frames` 帧
    fn set_sample_offset(&mut self, frames: u64) -> Result<(), EngineError> {
        let resume = self.core.state;
        self.stream.seek(self.core.source, frames);

        match resume {
            PlayerState::Playing => self.start(),
            PlayerState::Paused => {
                self.start();
                if self.core.state == PlayerState::Playing {
                    self.pause();
                }
            }
            PlayerState::Initial | PlayerState::Stopped => {}
        }
        Ok(())
    }

    fn duration(&self) -> f64 {
        match (self.stream.total_frames(), self.stream.format().sample_rate) {
            (Some(frames), rate) if rate > 0 => frames as f64 / rate as f64,
            _ => 0.0,
        }
    }

    fn format(&self) -> AudioFormat {
        self.stream.format()
    }

    fn source(&self) -> SourceId {
        self.core.source
    }
}

impl Drop for StreamPlayer {
    fn drop(&mut self) {
        self.stream.stop(self.core.source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{DeviceConfig, SoftwareDevice};
    use crate::decode::RawPcmDecoder;
    use approx::assert_relative_eq;

    const RATE: u32 = 8000;

    fn device() -> Arc<SoftwareDevice> {
        Arc::new(SoftwareDevice::new(DeviceConfig {
            output_sample_rate: RATE,
            output_channels: 2,
            ..Default::default()
        }))
    }

    fn player(dev: &Arc<SoftwareDevice>, frames: usize) -> StreamPlayer {
        let bytes: Vec<u8> = (0..frames).map(|i| i as u8).collect();
        let decoder = RawPcmDecoder::new("ramp", bytes, AudioFormat::mono8(RATE)).unwrap();
        let config = StreamConfig {
            num_buffers: 3,
            chunk_bytes: 64,
        };
        StreamPlayer::new(dev.clone(), Box::new(decoder), &config).unwrap()
    }

    /// 模拟一帧：设备播放 `frames` 帧，然后 update
    fn frame(dev: &SoftwareDevice, player: &mut StreamPlayer, frames: usize) {
        dev.render_frames(frames);
        player.update();
    }

    #[test]
    fn test_state_machine() {
        let dev = device();
        let mut p = player(&dev, 1000);
        assert_eq!(p.state(), PlayerState::Initial);

        p.pause();
        assert_eq!(p.state(), PlayerState::Initial);

        p.play().unwrap();
        assert_eq!(p.state(), PlayerState::Playing);
        assert_eq!(dev.source_state(p.source()), SourceState::Playing);

        p.pause();
        assert_eq!(p.state(), PlayerState::Paused);
        assert_eq!(dev.source_state(p.source()), SourceState::Paused);

        p.play().unwrap();
        assert_eq!(p.state(), PlayerState::Playing);

        p.stop();
        assert_eq!(p.state(), PlayerState::Stopped);

        p.play().unwrap();
        assert_eq!(p.state(), PlayerState::Playing);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dev = device();
        let mut p = player(&dev, 1000);
        p.play().unwrap();
        frame(&dev, &mut p, 32);
        frame(&dev, &mut p, 32);

        p.stop();
        let stops = dev.source_stats(p.source()).unwrap().stop_commands;
        p.stop();
        assert_eq!(p.state(), PlayerState::Stopped);
        assert_eq!(dev.source_stats(p.source()).unwrap().stop_commands, stops);
        assert_eq!(p.stream().in_flight(), 0);
        assert_eq!(p.sample_offset(), 0);
    }

    #[test]
    fn test_plays_to_end_then_stops() {
        let dev = device();
        let mut p = player(&dev, 300);
        p.play().unwrap();

        for _ in 0..100 {
            frame(&dev, &mut p, 16);
        }
        assert_eq!(p.state(), PlayerState::Stopped);
        let stats = dev.source_stats(p.source()).unwrap();
        assert_eq!(stats.stop_commands, 1);
        assert_eq!(stats.frames_rendered, 300);
        assert_eq!(p.stats().bytes_submitted, 300);
    }

    #[test]
    fn test_sample_offset_tracks_playback() {
        let dev = device();
        let mut p = player(&dev, 800);
        p.play().unwrap();
        p.update();
        p.update();
        assert_eq!(p.stream().in_flight(), 3);

        dev.render_frames(100);
        assert_eq!(p.sample_offset(), 100);
        p.update();
        assert_eq!(p.stream().played_frames(), 64);
        assert_eq!(p.sample_offset(), 100);
    }

    #[test]
    fn test_offset_holds_between_underrun_and_next_tick() {
        let dev = device();
        let mut p = player(&dev, 1000);
        p.play().unwrap();
        p.update();
        p.update();

        dev.render_frames(200);
        assert_eq!(dev.source_state(p.source()), SourceState::Stopped);
        assert_eq!(p.sample_offset(), 192);
    }

    #[test]
    fn test_resume_after_underrun_while_paused_continues() {
        let dev = device();
        let mut p = player(&dev, 1000);
        p.play().unwrap();
        p.update();
        p.update();

        // 三个 chunk 在暂停前已全部播完
        dev.render_frames(200);
        p.pause();
        p.play().unwrap();
        assert_eq!(p.state(), PlayerState::Playing);
        assert_eq!(p.stats().underrun_recoveries, 1);

        let out = dev.render_frames(1);
        assert_relative_eq!(out[0], (192.0 - 128.0) / 128.0);
        assert_eq!(p.sample_offset(), 193);
    }

    #[test]
    fn test_seek_while_playing_restarts_at_offset() {
        let dev = device();
        let mut p = player(&dev, 800);
        p.play().unwrap();
        frame(&dev, &mut p, 50);

        p.set_sample_offset(400).unwrap();
        assert_eq!(p.state(), PlayerState::Playing);
        assert_eq!(p.sample_offset(), 400);

        dev.render_frames(10);
        assert_eq!(p.sample_offset(), 410);
    }

    #[test]
    fn test_seek_while_stopped_applies_on_play() {
        let dev = device();
        let mut p = player(&dev, 800);
        p.set_sample_offset(256).unwrap();
        assert_eq!(p.state(), PlayerState::Initial);
        assert_eq!(p.sample_offset(), 256);

        p.play().unwrap();
        dev.render_frames(4);
        assert_eq!(p.sample_offset(), 260);
    }

    #[test]
    fn test_looping_never_stops_and_offset_wraps() {
        let dev = device();
        let mut p = player(&dev, 100);
        p.set_looping(true);
        p.play().unwrap();

        for _ in 0..60 {
            frame(&dev, &mut p, 16);
        }
        assert_eq!(p.state(), PlayerState::Playing);
        assert!(p.sample_offset() < 100);
        assert!(p.stats().loops > 0);
        assert_eq!(dev.source_stats(p.source()).unwrap().underruns, 0);
    }

    #[test]
    fn test_empty_stream_stops_on_play() {
        let dev = device();
        let mut p = player(&dev, 0);
        p.play().unwrap();
        assert_eq!(p.state(), PlayerState::Stopped);
    }

    #[test]
    fn test_invalid_data_is_rejected() {
        let dev = device();
        let data = AudioData::from_memory("junk.bin", vec![1u8; 64]);
        assert!(matches!(
            StreamPlayer::from_data(dev.clone(), &data, &StreamConfig::default()),
            Err(EngineError::InvalidData(_))
        ));
        assert_eq!(dev.source_count(), 0);
    }

    #[test]
    fn test_drop_releases_device_resources() {
        let dev = device();
        {
            let mut p = player(&dev, 1000);
            p.play().unwrap();
            p.update();
            assert_eq!(dev.buffer_count(), 3);
            assert_eq!(dev.source_count(), 1);
        }
        assert_eq!(dev.buffer_count(), 0);
        assert_eq!(dev.source_count(), 0);
    }

    #[test]
    fn test_duration_from_total_frames() {
        let dev = device();
        let p = player(&dev, 4000);
        assert_eq!(p.duration(), 0.5);
        assert_eq!(p.format(), AudioFormat::mono8(RATE));
    }
}
