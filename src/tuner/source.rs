//! Per-channel pipeline: frequency translation, CIC decimation and optional
//! PSK symbol recovery, fed from the tuner through a bounded queue and
//! drained on the shared fixed-rate scheduler.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use num_complex::Complex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ChannelConfig;
use crate::dsp::buffer::{BlockAssembler, SampleQueue};
use crate::dsp::cic::{ComplexCicDecimator, DecimatorFactory};
use crate::dsp::oscillator::ComplexOscillator;
use crate::dsp::psk::{PskDemodulator, SymbolRecoveryConfig};
use crate::error::{Error, Result};
use crate::tuner::channel::TunerChannel;
use crate::tuner::feed::TunerFeed;
use crate::tuner::frequency::{
    FrequencyBroadcaster, FrequencyController, FrequencyEvent, ListenerId,
};
use crate::tuner::manager::ChannelId;
use crate::tuner::scheduler::Scheduler;

/// What a channel delivers to its consumer
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Demodulation {
    /// Decimated baseband samples in fixed-size blocks
    #[default]
    None,
    /// Recovered PSK symbols, one per symbol period
    Psk(SymbolRecoveryConfig),
}

/// State shared between the source handle and its scheduled task
#[derive(Debug, Default)]
struct SharedState {
    /// Uncorrected tuner center frequency in Hz
    tuner_frequency: AtomicU64,
    /// Channel-level frequency correction in Hz
    channel_correction: AtomicI64,
    /// Wideband buffers processed so far
    processed: AtomicU64,
}

enum ChannelOutput {
    Samples(BlockAssembler<Complex<f32>>),
    Symbols {
        demodulator: Box<PskDemodulator>,
        symbols: Vec<Complex<f32>>,
    },
}

/// Everything the scheduled task owns
struct ChannelProcessor {
    channel_frequency: u64,
    state: Arc<SharedState>,
    queue: Arc<SampleQueue>,
    mixer: ComplexOscillator,
    decimator: ComplexCicDecimator,
    output: ChannelOutput,
    /// Reused across buffers
    scratch: Vec<Complex<f32>>,
    max_buffers_per_tick: usize,
}

impl ChannelProcessor {
    fn mixer_offset(&self) -> f64 {
        let tuner = self.state.tuner_frequency.load(Ordering::Relaxed) as i128;
        let correction = self.state.channel_correction.load(Ordering::Relaxed) as i128;
        (tuner - self.channel_frequency as i128 - correction) as f64
    }

    fn tick(&mut self, consumer: &mut dyn FnMut(&[Complex<f32>])) -> ControlFlow<()> {
        let offset = self.mixer_offset();
        if offset != self.mixer.frequency() {
            self.mixer.set_frequency(offset);
        }
        for _ in 0..self.max_buffers_per_tick {
            let Some(buffer) = self.queue.poll() else {
                break;
            };
            self.process(&buffer, consumer);
            self.state.processed.fetch_add(1, Ordering::Relaxed);
        }
        ControlFlow::Continue(())
    }

    fn process(&mut self, buffer: &[Complex<f32>], consumer: &mut dyn FnMut(&[Complex<f32>])) {
        self.scratch.clear();
        self.scratch.extend_from_slice(buffer);
        self.mixer.mix_in_place(&mut self.scratch);
        self.decimator.decimate_in_place(&mut self.scratch);

        match &mut self.output {
            ChannelOutput::Samples(assembler) => {
                assembler.push(&self.scratch, |block| consumer(block));
            }
            ChannelOutput::Symbols {
                demodulator,
                symbols,
            } => {
                symbols.clear();
                symbols.extend(self.scratch.iter().filter_map(|&s| demodulator.receive(s)));
                if !symbols.is_empty() {
                    consumer(symbols.as_slice());
                }
            }
        }
    }
}

/// A digital drop channel obtained from a [`ChannelManager`].
///
/// Single use: [`start`](Self::start) succeeds once, and a stopped (or
/// dropped) source releases its channel for good. Request a new source to
/// listen again.
///
/// [`ChannelManager`]: crate::tuner::manager::ChannelManager
pub struct TunerChannelSource {
    channel: TunerChannel,
    id: ChannelId,
    sample_rate: u32,
    tick_interval: Duration,
    state: Arc<SharedState>,
    queue: Arc<SampleQueue>,
    feed: Arc<TunerFeed>,
    scheduler: Arc<Scheduler>,
    broadcaster: Arc<FrequencyBroadcaster>,
    listener: Option<ListenerId>,
    /// Moved into the scheduled task on start
    processor: Option<ChannelProcessor>,
    task: Option<JoinHandle<()>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

/// Collaborators needed to build a source
pub(crate) struct SourceContext<'a> {
    pub(crate) controller: &'a FrequencyController,
    pub(crate) feed: &'a Arc<TunerFeed>,
    pub(crate) scheduler: &'a Arc<Scheduler>,
    pub(crate) factory: &'a DecimatorFactory,
    pub(crate) config: &'a ChannelConfig,
}

impl TunerChannelSource {
    pub(crate) fn new(
        channel: TunerChannel,
        id: ChannelId,
        demodulation: &Demodulation,
        context: SourceContext<'_>,
    ) -> Result<Self> {
        let config = context.config;
        let tuner_rate = context.controller.sample_rate();
        let channel_rate = config.sample_rate;
        if channel_rate == 0 || tuner_rate % channel_rate != 0 {
            return Err(Error::unsupported_decimation(
                tuner_rate.checked_div(channel_rate).unwrap_or(0),
                format!(
                    "tuner rate {tuner_rate} Hz is not a multiple of the channel rate {channel_rate} Hz"
                ),
            ));
        }
        let decimation = tuner_rate / channel_rate;
        let pass = (channel.bandwidth / 2) as f64;
        let stop = pass + config.transition_bandwidth as f64;
        let decimator = context
            .factory
            .complex(tuner_rate as f64, decimation, pass, stop)?;

        let output = match demodulation {
            Demodulation::None => ChannelOutput::Samples(BlockAssembler::new(config.block_size)),
            Demodulation::Psk(recovery) => ChannelOutput::Symbols {
                demodulator: Box::new(PskDemodulator::from_config(recovery, channel_rate as f64)),
                symbols: Vec::new(),
            },
        };

        let state = Arc::new(SharedState::default());
        let tuner_frequency = context.controller.frequency();
        state.tuner_frequency.store(tuner_frequency, Ordering::Relaxed);

        let broadcaster = context.controller.broadcaster();
        let listener = {
            let state = Arc::clone(&state);
            broadcaster.add(Arc::new(move |event: &FrequencyEvent| -> Result<()> {
                if let FrequencyEvent::FrequencyChange(frequency) = event {
                    state.tuner_frequency.store(*frequency, Ordering::Relaxed);
                }
                Ok(())
            }))
        };

        let queue = Arc::new(SampleQueue::new(channel.to_string(), config.queue_capacity));
        let offset = tuner_frequency as f64 - channel.frequency as f64;
        let processor = ChannelProcessor {
            channel_frequency: channel.frequency,
            state: Arc::clone(&state),
            queue: Arc::clone(&queue),
            mixer: ComplexOscillator::new(offset, tuner_rate as f64),
            decimator,
            output,
            scratch: Vec::new(),
            max_buffers_per_tick: config.max_buffers_per_tick.max(1),
        };
        debug!(%channel, decimation, taps = processor.decimator.filter_taps(), "channel source built");

        Ok(Self {
            channel,
            id,
            sample_rate: channel_rate,
            tick_interval: config.tick_interval(),
            state,
            queue,
            feed: Arc::clone(context.feed),
            scheduler: Arc::clone(context.scheduler),
            broadcaster,
            listener: Some(listener),
            processor: Some(processor),
            task: None,
            release: None,
        })
    }

    /// Hook run once when the source shuts down
    pub(crate) fn attach_release(&mut self, release: Box<dyn FnOnce() + Send>) {
        self.release = Some(release);
    }

    pub fn channel(&self) -> TunerChannel {
        self.channel
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Output sample rate in Hz (before symbol recovery)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Tuner center frequency the mixer is translating from
    pub fn tuner_frequency(&self) -> u64 {
        self.state.tuner_frequency.load(Ordering::Relaxed)
    }

    /// Shift this channel's own mixer by `hertz`; the tuner is unaffected
    pub fn set_frequency_correction(&self, hertz: i64) {
        self.state.channel_correction.store(hertz, Ordering::Relaxed);
    }

    pub fn frequency_correction(&self) -> i64 {
        self.state.channel_correction.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wideband buffers dropped because the channel fell behind
    pub fn dropped_buffers(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn processed_buffers(&self) -> u64 {
        self.state.processed.load(Ordering::Relaxed)
    }

    /// Wideband buffers waiting in the queue
    pub fn pending_buffers(&self) -> usize {
        self.queue.len()
    }

    /// Connect the channel to the tuner feed and start draining it.
    ///
    /// `consumer` receives blocks of decimated samples, or recovered symbols
    /// for PSK channels, on a scheduler thread.
    pub fn start<F>(&mut self, mut consumer: F) -> Result<()>
    where
        F: FnMut(&[Complex<f32>]) + Send + 'static,
    {
        let Some(mut processor) = self.processor.take() else {
            return Err(Error::channel_source(format!(
                "channel {} was already started",
                self.channel
            )));
        };
        self.feed.register(Arc::clone(&self.queue));
        self.task = Some(
            self.scheduler
                .schedule_fixed_rate(self.tick_interval, move || processor.tick(&mut consumer)),
        );
        info!(channel = %self.channel, id = self.id.value(), "channel source started");
        Ok(())
    }

    /// Stop processing and release the channel; the source cannot restart
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!(channel = %self.channel, id = self.id.value(), "channel source stopped");
        }
        self.processor = None;
        self.feed.unregister(&self.queue);
        self.queue.clear();
        if let Some(listener) = self.listener.take() {
            self.broadcaster.remove(listener);
        }
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for TunerChannelSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TunerChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunerChannelSource")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("sample_rate", &self.sample_rate)
            .field("running", &self.is_running())
            .finish()
    }
}
