//! Replay an I/Q recording through a bank of digital drop channels
//!
//! The recording plays the part of a live tuner: its center frequency and
//! sample rate are given on the command line, every `--channel` gets its
//! own drop channel, and the decimated output of each channel (or its
//! recovered symbols with `--psk`) is written to `<output-dir>/<freq>.cf32`.
//!
//! # Usage Examples
//!
//! ## Two NFM channels from an RTL-SDR capture
//! ```bash
//! ddcrx -f capture.cu8 --sample-rate 2.4M -c 162M \
//!     --channel 162.4M:12.5k --channel 162.55M:12.5k -o out/ -v
//! ```
//!
//! ## QPSK symbols with the early-late detector
//! ```bash
//! ddcrx -f capture.cs16 --format cs16 --sample-rate 1.2M -c 851M \
//!     --channel 851.0125M:12.5k --psk --detector early-late
//! ```

mod replay;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{ArgAction, Parser};
use crossbeam::channel::{Receiver, bounded};
use num_complex::Complex;
use sdrddc::config::ChannelizerConfig;
use sdrddc::dsp::psk::SymbolRecoveryConfig;
use sdrddc::dsp::timing::DetectorKind;
use sdrddc::iqread::{IqRead, complex_to_cf32_bytes};
use sdrddc::tuner::Tuner;
use sdrddc::tuner::channel::TunerChannel;
use sdrddc::tuner::source::{Demodulation, TunerChannelSource};
use sdrddc::{ComplexBuffer, IqFormat};
use tracing::{debug, info, warn};

use replay::ReplayTuner;

#[derive(Debug, Clone, Copy)]
struct Frequency(u64);

/// `FREQ[:BW]`, bandwidth defaulting to 12.5 kHz
#[derive(Debug, Clone, Copy)]
struct ChannelArg(TunerChannel);

const DEFAULT_BANDWIDTH: u64 = 12_500;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay an I/Q recording through digital drop channels", long_about = None)]
struct Args {
    /// Input file path ("-" for stdin)
    #[arg(short, long)]
    file: String,

    /// IQ format (cu8, cs8, cs16, cf32)
    #[arg(long, default_value = "cu8")]
    format: IqFormat,

    /// Sample rate of the recording in Hz (accepts k/M suffix)
    #[arg(short, long, value_parser = Frequency::from_str, default_value = "2.4M")]
    sample_rate: Frequency,

    /// Center frequency of the recording in Hz (accepts k/M/G suffix)
    #[arg(short, long, value_parser = Frequency::from_str)]
    center_freq: Frequency,

    /// Channel to extract as FREQ[:BW], repeat for more channels
    #[arg(long = "channel", value_parser = ChannelArg::from_str, required = true)]
    channels: Vec<ChannelArg>,

    /// Output sample rate of every channel in Hz
    #[arg(long, value_parser = Frequency::from_str)]
    channel_rate: Option<Frequency>,

    /// Recover PSK symbols instead of writing baseband samples
    #[arg(long, default_value_t = false)]
    psk: bool,

    /// Timing error detector for PSK channels (gardner, early-late)
    #[arg(long, default_value = "gardner")]
    detector: DetectorKind,

    /// Directory receiving one .cf32 file per channel
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// JSON configuration file; command-line values take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pace the replay at the recording sample rate
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Samples per wideband buffer
    #[arg(long, default_value_t = 16_384)]
    chunk_size: usize,

    /// Verbosity level (-v=info, -vv=debug, -vvv=trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Output side of one channel
struct ChannelOutput {
    source: TunerChannelSource,
    path: PathBuf,
    samples: Arc<AtomicU64>,
    writer: thread::JoinHandle<std::io::Result<()>>,
}

fn main() -> sdrddc::Result<()> {
    let args = Args::parse();

    // 0 = WARN (quiet), 1 = INFO, 2 = DEBUG, 3+ = TRACE
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    let mut config = match &args.config {
        Some(path) => ChannelizerConfig::from_json_file(path)?,
        None => ChannelizerConfig::default(),
    };
    let sample_rate = u32::try_from(args.sample_rate.0)
        .map_err(|_| sdrddc::Error::config("sample rate does not fit in 32 bits"))?;
    let center = args.center_freq.0;
    let half_band = sample_rate as u64 / 2;
    config.tuner.sample_rate = sample_rate;
    config.tuner.initial_frequency = center;
    config.tuner.minimum_frequency = center.saturating_sub(half_band);
    config.tuner.maximum_frequency = center + half_band;
    config.tuner.frequency_correction = 0.0;
    if let Some(rate) = args.channel_rate {
        config.channel.sample_rate = u32::try_from(rate.0)
            .map_err(|_| sdrddc::Error::config("channel rate does not fit in 32 bits"))?;
    }
    config.validate()?;
    debug!(?config, "configuration");

    let replay = ReplayTuner::new(center, sample_rate);
    let mut shifter = replay.shifter();
    let tuner = Tuner::new(Box::new(replay), &config)?;

    let demodulation = if args.psk {
        Demodulation::Psk(SymbolRecoveryConfig::default().with_detector(args.detector))
    } else {
        Demodulation::None
    };

    std::fs::create_dir_all(&args.output_dir)?;
    let mut outputs = Vec::with_capacity(args.channels.len());
    for ChannelArg(channel) in &args.channels {
        let mut source = match tuner.get_source_with(*channel, demodulation.clone()) {
            Ok(source) => source,
            Err(error) => {
                warn!(%channel, %error, "channel skipped");
                continue;
            }
        };
        let path = args.output_dir.join(format!("{}.cf32", channel.frequency));
        let file = BufWriter::new(File::create(&path)?);
        let (tx, rx) = bounded::<Vec<Complex<f32>>>(256);
        let writer = thread::spawn(move || write_samples(file, rx));

        let samples = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&samples);
        source.start(move |block: &[Complex<f32>]| {
            counter.fetch_add(block.len() as u64, Ordering::Relaxed);
            let _ = tx.send(block.to_vec());
        })?;
        info!(%channel, path = %path.display(), "writing channel");
        outputs.push(ChannelOutput {
            source,
            path,
            samples,
            writer,
        });
    }
    if outputs.is_empty() {
        return Err(sdrddc::Error::channel_source("no channel could be allocated"));
    }
    info!(center = tuner.frequency(), channels = outputs.len(), "tuner placed");

    let reader: Box<dyn Iterator<Item = std::io::Result<Vec<Complex<f32>>>>> = if args.file == "-" {
        Box::new(IqRead::from_stdin(center, sample_rate, args.chunk_size, args.format))
    } else {
        Box::new(IqRead::from_file(
            &args.file,
            center,
            sample_rate,
            args.chunk_size,
            args.format,
        )?)
    };

    let queue_limit = config.channel.queue_capacity.saturating_sub(1).max(1);
    let started = Instant::now();
    let mut captured = 0u64;
    for chunk in reader {
        let mut chunk = chunk?;
        shifter.shift(&mut chunk);
        captured += chunk.len() as u64;
        let buffer: ComplexBuffer = Arc::from(chunk);

        if args.realtime {
            let due = Duration::from_secs_f64(captured as f64 / sample_rate as f64);
            if let Some(wait) = due.checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        } else {
            // offline replay: keep every queue below its capacity so nothing is dropped
            while outputs
                .iter()
                .any(|o| o.source.pending_buffers() >= queue_limit)
            {
                thread::sleep(Duration::from_millis(1));
            }
        }
        tuner.feed().broadcast(buffer);
    }

    while outputs.iter().any(|o| o.source.pending_buffers() > 0) {
        thread::sleep(config.channel.tick_interval());
    }
    // let the last tick finish its buffer
    thread::sleep(config.channel.tick_interval() * 2);

    println!(
        "Replayed {captured} samples ({:.1} s of signal) in {:.1} s",
        captured as f64 / sample_rate as f64,
        started.elapsed().as_secs_f64()
    );
    for output in outputs {
        let channel = output.source.channel();
        let dropped = output.source.dropped_buffers();
        let processed = output.source.processed_buffers();
        output.source.stop();
        match output.writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(%channel, %error, "writing channel output failed"),
            Err(_) => warn!(%channel, "channel writer panicked"),
        }
        println!(
            "{channel}: {} samples, {processed} buffers, {dropped} dropped -> {}",
            output.samples.load(Ordering::Relaxed),
            output.path.display()
        );
    }
    Ok(())
}

fn write_samples(
    mut file: BufWriter<File>,
    rx: Receiver<Vec<Complex<f32>>>,
) -> std::io::Result<()> {
    for block in rx {
        file.write_all(&complex_to_cf32_bytes(&block))?;
    }
    file.flush()
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let scaled = |value: &str, scale: f64, unit: &str| -> Result<Frequency, String> {
            let val: f64 = value.trim().parse().map_err(|_| format!("Invalid {unit} value"))?;
            if val.is_nan() || val < 0.0 {
                return Err(format!("Invalid {unit} value"));
            }
            Ok(Frequency((val * scale).round() as u64))
        };
        if let Some(stripped) = s.strip_suffix('G') {
            scaled(stripped, 1e9, "GHz")
        } else if let Some(stripped) = s.strip_suffix('M') {
            scaled(stripped, 1e6, "MHz")
        } else if let Some(stripped) = s.strip_suffix('k') {
            scaled(stripped, 1e3, "kHz")
        } else {
            let val: u64 = s.parse().map_err(|_| "Invalid Hz value")?;
            Ok(Frequency(val))
        }
    }
}

impl FromStr for ChannelArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (frequency, bandwidth) = match s.split_once(':') {
            Some((frequency, bandwidth)) => (
                Frequency::from_str(frequency)?,
                Frequency::from_str(bandwidth)?.0,
            ),
            None => (Frequency::from_str(s)?, DEFAULT_BANDWIDTH),
        };
        if bandwidth == 0 {
            return Err("Channel bandwidth must be positive".into());
        }
        Ok(ChannelArg(TunerChannel::new(frequency.0, bandwidth)))
    }
}
