//! Tuner side of the channelizer.
//!
//! A [`Tuner`] bundles the pieces that share one physical device:
//!
//! - `frequency`: the [`FrequencyController`](frequency::FrequencyController)
//!   driving the device and notifying listeners of changes;
//! - `feed`: fan-out of captured wideband buffers to the channel queues;
//! - `manager`: channel allocation and center frequency placement;
//! - `source`: the per-channel pipeline handed to consumers;
//! - `scheduler`: the fixed-rate thread pool draining every channel.

use std::sync::Arc;

use crate::config::ChannelizerConfig;
use crate::error::Result;

pub mod channel;
pub mod feed;
pub mod frequency;
pub mod manager;
pub mod scheduler;
pub mod source;

use channel::TunerChannel;
use feed::TunerFeed;
use frequency::{FrequencyController, SharedController, Tunable};
use manager::ChannelManager;
use scheduler::Scheduler;
use source::{Demodulation, TunerChannelSource};

pub struct Tuner {
    controller: SharedController,
    feed: Arc<TunerFeed>,
    manager: ChannelManager,
}

impl Tuner {
    /// Take control of `tunable` with its own scheduler
    pub fn new(tunable: Box<dyn Tunable>, config: &ChannelizerConfig) -> Result<Self> {
        config.validate()?;
        let scheduler = Arc::new(Scheduler::new(&config.scheduler)?);
        Self::with_scheduler(tunable, config, scheduler)
    }

    /// Take control of `tunable`, running channels on `scheduler` (which may
    /// be shared between tuners)
    pub fn with_scheduler(
        tunable: Box<dyn Tunable>,
        config: &ChannelizerConfig,
        scheduler: Arc<Scheduler>,
    ) -> Result<Self> {
        config.validate()?;
        let controller = FrequencyController::new(tunable, &config.tuner)?.shared();
        let feed = Arc::new(TunerFeed::new());
        let manager = ChannelManager::new(
            Arc::clone(&controller),
            Arc::clone(&feed),
            scheduler,
            config.channel.clone(),
        );
        Ok(Self {
            controller,
            feed,
            manager,
        })
    }

    pub fn controller(&self) -> &SharedController {
        &self.controller
    }

    /// Where the capture thread delivers wideband buffers
    pub fn feed(&self) -> &Arc<TunerFeed> {
        &self.feed
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    pub fn get_source(&self, channel: TunerChannel) -> Result<TunerChannelSource> {
        self.manager.get_source(channel)
    }

    pub fn get_source_with(
        &self,
        channel: TunerChannel,
        demodulation: Demodulation,
    ) -> Result<TunerChannelSource> {
        self.manager.get_source_with(channel, demodulation)
    }

    /// Uncorrected center frequency in Hz
    pub fn frequency(&self) -> u64 {
        self.controller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frequency()
    }

    pub fn sample_rate(&self) -> u32 {
        self.controller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sample_rate()
    }
}

impl std::fmt::Debug for Tuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tuner")
            .field("frequency", &self.frequency())
            .field("manager", &self.manager)
            .finish()
    }
}
