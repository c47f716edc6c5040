//! PCM 解码器
//!
//! 所有解码器实现同一个 [`PcmDecoder`] 接口：
//! - 打开后格式固定（声道 / 每样本字节数 / 采样率）
//! - `read` 填充设备原生格式的交织 PCM 字节，只有到达 EOF 时才会返回不足的字节数
//! - `rewind` 回到音频内容起点，EOF 之后也必须成功
//!
//! 具体实现在打开时按扩展名 / 内容探测选择一次，之后不再切换

use std::io;

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use thiserror::Error;

use super::source::ByteSource;
use crate::audio::{AudioFormat, FormatError};

/// symphonia 支持的扩展名
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "ogg", "oga", "flac", "mp3", "aiff", "aif"];

/// 无头 PCM 的扩展名
pub const RAW_EXTENSIONS: &[&str] = &["pcm", "raw"];

/// `skip` 每次丢弃的字节数
const SKIP_CHUNK: usize = 16 * 1024;

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    /// 文件打开失败
    #[error("Failed to open file: {0}")]
    FileOpen(#[source] io::Error),
    /// 格式不支持
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    /// 没有找到音频轨道
    #[error("No audio track found")]
    NoAudioTrack,
    /// 声道数 / 位深不被设备支持
    #[error(transparent)]
    Format(#[from] FormatError),
    /// 无头 PCM 长度不是帧大小的整数倍
    #[error("PCM data of {len} bytes is not a whole number of {frame}-byte frames")]
    PartialFrame { len: usize, frame: usize },
    /// 解码器创建失败
    #[error("Failed to create decoder: {0}")]
    DecoderCreation(String),
    /// Seek 失败
    #[error("Seek failed: {0}")]
    SeekFailed(String),
}

/// PCM 解码器接口
pub trait PcmDecoder: Send {
    /// 来源名称（文件路径或内存源名）
    fn name(&self) -> &str;

    /// 输出格式；无效解码器全为 0
    fn format(&self) -> AudioFormat;

    fn channels(&self) -> u16 {
        self.format().channels
    }

    fn bytes_per_sample(&self) -> u16 {
        self.format().bytes_per_sample
    }

    fn sample_rate(&self) -> u32 {
        self.format().sample_rate
    }

    /// 总帧数（如果已知）
    fn total_frames(&self) -> Option<u64> {
        None
    }

    /// 读取最多 `dst.len()` 字节，返回实际写入字节数
    ///
    /// 返回值小于 `dst.len()` 表示到达 EOF
    fn read(&mut self, dst: &mut [u8]) -> usize;

    /// 回到音频内容起点
    fn rewind(&mut self) -> Result<(), DecodeError>;

    /// 向前跳过 `bytes` 字节，返回实际跳过的字节数
    fn skip(&mut self, bytes: usize) -> usize {
        let mut scratch = vec![0u8; SKIP_CHUNK.min(bytes)];
        let mut skipped = 0;
        while skipped < bytes {
            let want = (bytes - skipped).min(scratch.len());
            let n = self.read(&mut scratch[..want]);
            skipped += n;
            if n < want {
                break;
            }
        }
        skipped
    }
}

/// 按扩展名 / 内容探测打开解码器
///
/// 无头 PCM（`.pcm` / `.raw`）没有格式信息，必须经由 [`RawPcmDecoder`](super::RawPcmDecoder) 显式指定格式
pub fn open_decoder(source: &ByteSource) -> Result<Box<dyn PcmDecoder>, DecodeError> {
    log::info!("Loading: {}", source.name());

    let ext = source.extension();
    if let Some(ext) = ext.as_deref().filter(|e| RAW_EXTENSIONS.contains(e)) {
        return Err(DecodeError::UnsupportedFormat(format!(
            "headerless .{} needs an explicit format",
            ext
        )));
    }

    match SymphoniaDecoder::open(source.clone()) {
        Ok(decoder) => Ok(Box::new(decoder)),
        // 未知扩展名且内容探测失败
        Err(DecodeError::UnsupportedFormat(_))
            if !ext.as_deref().is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e)) =>
        {
            Err(DecodeError::UnsupportedFormat(format!(
                "unknown extension {:?}",
                ext.unwrap_or_default()
            )))
        }
        Err(e) => Err(e),
    }
}

/// 打开失败时返回 [`InvalidDecoder`]（记录错误日志）
pub fn open_decoder_or_invalid(source: &ByteSource) -> Box<dyn PcmDecoder> {
    match open_decoder(source) {
        Ok(decoder) => decoder,
        Err(e) => {
            log::error!("Cannot decode {}: {}", source.name(), e);
            Box::new(InvalidDecoder::new(source.name()))
        }
    }
}

/// 无效解码器：格式全为 0，`read` 立即返回 0
#[derive(Debug, Clone)]
pub struct InvalidDecoder {
    name: String,
}

impl InvalidDecoder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PcmDecoder for InvalidDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        AudioFormat::new(0, 0, 0)
    }

    fn read(&mut self, _dst: &mut [u8]) -> usize {
        0
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// 基于 symphonia 的压缩 / 容器格式解码器
pub struct SymphoniaDecoder {
    source: ByteSource,
    name: String,
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: AudioFormat,
    total_frames: Option<u64>,
    /// i32 样本缓冲区（左对齐）
    i32_buffer: Vec<i32>,
    /// 已解码但尚未被 read 取走的 PCM 字节
    pending: Vec<u8>,
    pending_pos: usize,
    eof: bool,
}

impl SymphoniaDecoder {
    /// 打开音频源
    pub fn open(source: ByteSource) -> Result<Self, DecodeError> {
        let (reader, decoder, track_id) = Self::open_stream(&source)?;

        let codec_params = &reader
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .ok_or(DecodeError::NoAudioTrack)?
            .codec_params;

        let sample_rate = codec_params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        // 8-bit 源保持 8-bit，其余统一输出 16-bit
        let bytes_per_sample = match codec_params.bits_per_sample {
            Some(8) => 1,
            _ => 2,
        };
        let format = AudioFormat::checked(channels, bytes_per_sample, sample_rate)?;
        let total_frames = codec_params.n_frames;

        let codec_name = symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|c| c.short_name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        log::info!(
            "Codec: {} | {}Hz {}ch {}bit | Duration: {:.1}s",
            codec_name,
            format.sample_rate,
            format.channels,
            format.bytes_per_sample * 8,
            total_frames.map(|f| f as f64 / sample_rate as f64).unwrap_or(0.0)
        );

        Ok(Self {
            name: source.name(),
            source,
            reader,
            decoder,
            track_id,
            format,
            total_frames,
            i32_buffer: Vec::with_capacity(65536),
            pending: Vec::with_capacity(65536),
            pending_pos: 0,
            eof: false,
        })
    }

    fn open_stream(
        source: &ByteSource,
    ) -> Result<(Box<dyn FormatReader>, Box<dyn Decoder>, u32), DecodeError> {
        let mss = MediaSourceStream::new(source.open()?, Default::default());

        // 提示文件扩展名
        let mut hint = Hint::new();
        if let Some(ext) = source.extension() {
            hint.with_extension(&ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
        let reader = probed.format;

        // 查找第一个音频轨道
        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        Ok((reader, decoder, track_id))
    }

    /// 解码下一个 packet 到 `pending`
    ///
    /// 返回 false 表示 EOF（或不可恢复的解码错误）
    fn decode_next(&mut self) -> bool {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return false;
                }
                Err(e) => {
                    log::error!("Decode error in {}: {}", self.name, e);
                    return false;
                }
            };

            // 跳过非目标轨道
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => continue, // 跳过损坏的帧
                Err(e) => {
                    log::error!("Decode error in {}: {}", self.name, e);
                    return false;
                }
            };

            let total_samples = decoded.frames() * decoded.spec().channels.count();
            if total_samples == 0 {
                continue;
            }
            if self.i32_buffer.len() < total_samples {
                self.i32_buffer.resize(total_samples, 0);
            }
            convert_to_i32(&decoded, &mut self.i32_buffer);

            let bytes = total_samples * self.format.bytes_per_sample as usize;
            self.pending.resize(bytes, 0);
            self.pending_pos = 0;
            self.format
                .samples_to_bytes(&self.i32_buffer[..total_samples], &mut self.pending);
            return true;
        }
    }
}

impl PcmDecoder for SymphoniaDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn read(&mut self, dst: &mut [u8]) -> usize {
        let mut written = 0;
        while written < dst.len() {
            if self.pending_pos >= self.pending.len() {
                if self.eof || !self.decode_next() {
                    self.eof = true;
                    break;
                }
            }
            let available = &self.pending[self.pending_pos..];
            let n = available.len().min(dst.len() - written);
            dst[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            self.pending_pos += n;
        }
        written
    }

    fn rewind(&mut self) -> Result<(), DecodeError> {
        self.pending.clear();
        self.pending_pos = 0;
        self.eof = false;

        let seek_to = SeekTo::TimeStamp {
            ts: 0,
            track_id: self.track_id,
        };
        match self.reader.seek(SeekMode::Accurate, seek_to) {
            Ok(_) => {
                // 重置解码器状态
                self.decoder.reset();
                Ok(())
            }
            Err(e) => {
                // 容器不支持 seek：重新打开
                log::debug!("Seek to start failed ({}), reopening {}", e, self.name);
                let (reader, decoder, track_id) = Self::open_stream(&self.source)
                    .map_err(|e| DecodeError::SeekFailed(e.to_string()))?;
                self.reader = reader;
                self.decoder = decoder;
                self.track_id = track_id;
                Ok(())
            }
        }
    }
}

/// 把 symphonia 的平面 buffer 交织并左对齐到 i32
fn convert_to_i32(decoded: &AudioBufferRef<'_>, output: &mut [i32]) {
    match decoded {
        AudioBufferRef::U8(buf) => interleave(buf, output, |s| (s as i32 - 128) << 24),
        AudioBufferRef::S8(buf) => interleave(buf, output, |s| (s as i32) << 24),
        AudioBufferRef::U16(buf) => interleave(buf, output, |s| (s as i32 - 32768) << 16),
        AudioBufferRef::S16(buf) => interleave(buf, output, |s| (s as i32) << 16),
        AudioBufferRef::U24(buf) => {
            interleave(buf, output, |s| (s.inner() as i32 - 8_388_608) << 8)
        }
        AudioBufferRef::S24(buf) => interleave(buf, output, |s| s.inner() << 8),
        AudioBufferRef::U32(buf) => interleave(buf, output, |s| s.wrapping_sub(2_147_483_648) as i32),
        AudioBufferRef::S32(buf) => interleave(buf, output, |s| s),
        AudioBufferRef::F32(buf) => {
            interleave(buf, output, |s| (s.clamp(-1.0, 1.0) * i32::MAX as f32) as i32)
        }
        AudioBufferRef::F64(buf) => {
            interleave(buf, output, |s| (s.clamp(-1.0, 1.0) * i32::MAX as f64) as i32)
        }
    }
}

#[inline]
fn interleave<S: Sample>(buf: &AudioBuffer<S>, output: &mut [i32], convert: impl Fn(S) -> i32) {
    let channels = buf.spec().channels.count();
    for ch in 0..channels {
        for (frame, &sample) in buf.chan(ch).iter().enumerate() {
            output[frame * channels + ch] = convert(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_bytes(channels: u16, bits: u16, rate: u32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames * channels as usize {
                if bits == 8 {
                    writer.write_sample((i % 100) as i8).unwrap();
                } else {
                    writer.write_sample((i % 1000) as i16).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_wav_decodes_to_16bit_pcm() {
        let source = ByteSource::memory("tone.wav", wav_bytes(2, 16, 22050, 1000));
        let mut decoder = open_decoder(&source).unwrap();
        assert_eq!(decoder.format(), AudioFormat::stereo16(22050));
        assert_eq!(decoder.total_frames(), Some(1000));

        let mut pcm = vec![0u8; 8192];
        let n = decoder.read(&mut pcm);
        assert_eq!(n, 4000);
        // 第二个样本 = 1
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), 1);
        assert_eq!(decoder.read(&mut pcm), 0);
    }

    #[test]
    fn test_8bit_wav_stays_8bit() {
        let source = ByteSource::memory("click.wav", wav_bytes(1, 8, 8000, 64));
        let decoder = open_decoder(&source).unwrap();
        assert_eq!(decoder.format(), AudioFormat::mono8(8000));
    }

    #[test]
    fn test_rewind_after_eof_restarts_content() {
        let source = ByteSource::memory("loop.wav", wav_bytes(1, 16, 8000, 300));
        let mut decoder = open_decoder(&source).unwrap();

        let mut first = vec![0u8; 600];
        assert_eq!(decoder.read(&mut first), 600);
        let mut rest = vec![0u8; 100];
        assert_eq!(decoder.read(&mut rest), 0);

        decoder.rewind().unwrap();
        let mut again = vec![0u8; 600];
        assert_eq!(decoder.read(&mut again), 600);
        assert_eq!(first, again);
    }

    #[test]
    fn test_skip_advances_position() {
        let source = ByteSource::memory("skip.wav", wav_bytes(1, 16, 8000, 100));
        let mut decoder = open_decoder(&source).unwrap();
        assert_eq!(decoder.skip(20), 20);
        let mut pcm = [0u8; 2];
        decoder.read(&mut pcm);
        assert_eq!(i16::from_le_bytes(pcm), 10);
        assert_eq!(decoder.skip(1000), 178);
    }

    #[test]
    fn test_unsupported_channel_count_is_config_error() {
        let source = ByteSource::memory("surround.wav", wav_bytes(6, 16, 48000, 10));
        // 不论容器层还是格式校验拒绝，都不能得到可用的解码器
        assert!(matches!(
            open_decoder(&source),
            Err(DecodeError::Format(FormatError::UnsupportedChannels(6)))
                | Err(DecodeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_headerless_extensions_need_explicit_format() {
        // 内容是合法 WAV，也不做内容探测
        let source = ByteSource::memory("tone.RAW", wav_bytes(1, 16, 8000, 100));
        match open_decoder(&source) {
            Err(DecodeError::UnsupportedFormat(msg)) => assert!(msg.contains(".raw")),
            other => panic!("expected UnsupportedFormat, got {:?}", other.map(|d| d.format())),
        }

        let source = ByteSource::memory("tone.bin", wav_bytes(1, 16, 8000, 100));
        assert_eq!(open_decoder(&source).unwrap().format(), AudioFormat::mono16(8000));
    }

    #[test]
    fn test_garbage_yields_invalid_decoder() {
        let source = ByteSource::memory("noise.xyz", vec![0x42u8; 512]);
        assert!(matches!(
            open_decoder(&source),
            Err(DecodeError::UnsupportedFormat(_))
        ));

        let mut decoder = open_decoder_or_invalid(&source);
        assert!(!decoder.format().is_usable());
        assert_eq!(decoder.read(&mut [0u8; 64]), 0);
        assert!(decoder.rewind().is_ok());
    }
}
