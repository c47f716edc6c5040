//! pcm-stream - 流式音频播放管线的命令行前端
//!
//! 以固定帧率驱动播放器，模拟游戏主循环：
//! - render: 把软件设备的混音输出写入 WAV
//! - simulate: 随机丢帧，观察 underrun 和自动恢复

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rand::Rng;

use pcm_stream::audio::{DeviceConfig, SoftwareDevice};
use pcm_stream::decode::{AudioData, SUPPORTED_EXTENSIONS};
use pcm_stream::engine::{AudioPlayer, PlayerState, StreamConfig, StreamPlayer};

/// 未指定时长时循环播放的默认秒数
const DEFAULT_LOOP_SECONDS: f64 = 10.0;

/// pcm-stream - Streaming audio playback pipeline
#[derive(Parser)]
#[command(name = "pcm-stream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Number of streaming buffers
    #[arg(short, long, global = true, default_value = "3")]
    buffers: usize,

    /// Chunk size in KiB
    #[arg(short, long, global = true, default_value = "16")]
    chunk_kb: usize,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show format and duration of an audio file
    Info {
        /// Audio file
        file: PathBuf,
    },

    /// Stream a file through the software device into a WAV file
    Render {
        /// Audio file to stream
        file: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,

        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<f64>,

        /// Loop the stream
        #[arg(short, long = "loop")]
        looping: bool,

        /// Update rate of the frame loop
        #[arg(long, default_value = "60")]
        fps: u32,

        /// Device output sample rate
        #[arg(long, default_value = "48000")]
        rate: u32,

        #[arg(long, default_value = "1.0")]
        gain: f32,

        #[arg(long, default_value = "1.0")]
        pitch: f32,

        /// Stereo pan, -1.0 (left) to 1.0 (right)
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        pan: f32,
    },

    /// Run the frame loop with randomly dropped updates
    Simulate {
        /// Audio file to stream
        file: PathBuf,

        /// Simulated duration in seconds
        #[arg(short, long, default_value = "10")]
        seconds: f64,

        /// Probability that a frame skips its update
        #[arg(short, long, default_value = "0.1")]
        drop_rate: f64,

        /// Update rate of the frame loop
        #[arg(long, default_value = "60")]
        fps: u32,

        /// Do not sleep between frames
        #[arg(long)]
        fast: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let config = create_stream_config(&cli);
    config.validate()?;

    match cli.command {
        Commands::Info { ref file } => show_info(file, &config)?,
        Commands::Render {
            ref file,
            ref output,
            seconds,
            looping,
            fps,
            rate,
            gain,
            pitch,
            pan,
        } => {
            let options = RenderOptions {
                seconds,
                looping,
                fps,
                rate,
                gain,
                pitch,
                pan,
            };
            render(file, output, &config, &options)?;
        }
        Commands::Simulate {
            ref file,
            seconds,
            drop_rate,
            fps,
            fast,
        } => simulate(file, &config, seconds, drop_rate, fps, fast)?,
    }

    Ok(())
}

/// 创建流配置
fn create_stream_config(cli: &Cli) -> StreamConfig {
    StreamConfig {
        num_buffers: cli.buffers,
        chunk_bytes: cli.chunk_kb * 1024,
    }
}

fn load(file: &Path) -> anyhow::Result<AudioData> {
    let data = AudioData::from_file(file);
    if !data.is_valid() {
        bail!(
            "Cannot play {} (supported formats: {})",
            file.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        );
    }
    Ok(data)
}

/// 显示文件信息
fn show_info(file: &Path, config: &StreamConfig) -> anyhow::Result<()> {
    let data = load(file)?;
    let format = data.format();

    println!("=== {} ===\n", data.name());
    println!("  Channels:     {}", format.channels);
    println!("  Sample size:  {} bit", format.bytes_per_sample * 8);
    println!("  Sample rate:  {} Hz", format.sample_rate);
    match data.total_frames() {
        Some(frames) => println!(
            "  Duration:     {} ({} frames)",
            format_time(data.duration()),
            frames
        ),
        None => println!("  Duration:     unknown"),
    }
    println!(
        "  Streaming:    {} x {} KiB ({:.1} ms per chunk)",
        config.num_buffers,
        config.chunk_bytes / 1024,
        format.duration_of(config.chunk_bytes) * 1000.0
    );

    Ok(())
}

struct RenderOptions {
    seconds: Option<f64>,
    looping: bool,
    fps: u32,
    rate: u32,
    gain: f32,
    pitch: f32,
    pan: f32,
}

/// 渲染到 WAV
fn render(
    file: &Path,
    output: &Path,
    config: &StreamConfig,
    options: &RenderOptions,
) -> anyhow::Result<()> {
    if options.fps == 0 {
        bail!("--fps must be positive");
    }
    let data = load(file)?;

    let device = Arc::new(SoftwareDevice::new(DeviceConfig {
        output_sample_rate: options.rate,
        output_channels: 2,
        ..Default::default()
    }));
    let mut player = StreamPlayer::from_data(device.clone(), &data, config)?;
    player.set_looping(options.looping);
    player.set_gain(options.gain);
    player.set_pitch(options.pitch);
    player.set_position([options.pan, 0.0, 0.0]);

    let limit = match (options.seconds, options.looping) {
        (Some(s), _) => s,
        (None, true) => DEFAULT_LOOP_SECONDS,
        (None, false) => f64::INFINITY,
    };
    let limit_frames = (limit * options.rate as f64).min(u64::MAX as f64) as u64;
    let frames_per_tick = (options.rate / options.fps).max(1) as usize;

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: options.rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    println!("Rendering {} -> {}", data.name(), output.display());
    player.play()?;

    let mut written = 0u64;
    while player.state() == PlayerState::Playing && written < limit_frames {
        let frames = frames_per_tick.min((limit_frames - written) as usize);
        for sample in device.render_frames(frames) {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        written += frames as u64;
        player.update();
    }
    writer.finalize()?;

    let source = device.source_stats(player.source()).unwrap_or_default();
    let stats = player.stats();
    println!(
        "Wrote {} ({} frames) | Chunks: {} | Loops: {} | Underruns: {} (recovered {})",
        format_time(written as f64 / options.rate as f64),
        written,
        stats.chunks_submitted,
        stats.loops,
        source.underruns,
        stats.underrun_recoveries
    );

    Ok(())
}

/// 丢帧模拟
fn simulate(
    file: &Path,
    config: &StreamConfig,
    seconds: f64,
    drop_rate: f64,
    fps: u32,
    fast: bool,
) -> anyhow::Result<()> {
    if fps == 0 {
        bail!("--fps must be positive");
    }
    if !(0.0..=1.0).contains(&drop_rate) {
        bail!("--drop-rate must be between 0 and 1");
    }
    let data = load(file)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let device = Arc::new(SoftwareDevice::default());
    let mut player = StreamPlayer::from_data(device.clone(), &data, config)?;
    player.set_looping(true);
    player.play()?;

    println!(
        "Simulating {} at {} fps, dropping {:.0}% of updates",
        data.name(),
        fps,
        drop_rate * 100.0
    );
    println!("Press Ctrl+C to stop.\n");

    let frame_time = Duration::from_secs_f64(1.0 / fps as f64);
    let total_frames = (seconds * fps as f64) as u64;
    let mut rng = rand::thread_rng();
    let mut dropped = 0u64;

    for frame in 0..total_frames {
        if !running.load(Ordering::SeqCst) {
            println!("\nSimulation interrupted.");
            break;
        }

        device.advance(frame_time);
        if rng.gen_bool(drop_rate) {
            dropped += 1;
        } else {
            player.update();
        }

        if frame % fps as u64 == 0 {
            let source = device.source_stats(player.source()).unwrap_or_default();
            print!(
                "\r  {} | In flight: {}/{} | Dropped: {} | Underruns: {} | Recovered: {}  ",
                format_time(player.sample_offset() as f64 / player.format().sample_rate as f64),
                player.stream().in_flight(),
                player.stream().num_buffers(),
                dropped,
                source.underruns,
                player.stats().underrun_recoveries
            );
            io::stdout().flush()?;
        }

        if !fast {
            std::thread::sleep(frame_time);
        }
    }

    println!();
    player.stop();

    Ok(())
}

/// mm:ss.ss
fn format_time(secs: f64) -> String {
    format!("{:02}:{:05.2}", (secs / 60.0) as u32, secs % 60.0)
}
