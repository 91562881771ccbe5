//! Frequency control of a physical tuner.
//!
//! The [`FrequencyController`] owns the tuner center frequency and sample
//! rate. It has two modes:
//!
//! - **unlocked**: any caller may retune or change the sample rate;
//! - **locked**: ordinary setters fail with [`Error::Locked`]; only the
//!   channel allocator retunes, through a crate-private setter.
//!
//! Every change queues a [`FrequencyEvent`]. Queued events are handed out
//! by [`FrequencyController::take_events`] and delivered to the registered
//! [`FrequencyListener`]s only after the controller mutex is released, so a
//! listener may read the controller. [`FrequencyController::update`] does
//! both for callers holding a [`SharedController`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::TunerConfig;
use crate::error::{Error, Result};

/// The device side of a tuner: whatever actually moves the hardware.
pub trait Tunable: Send {
    /// Frequency the device is tuned to, in Hz
    fn tuned_frequency(&self) -> Result<u64>;
    fn set_tuned_frequency(&mut self, frequency: u64) -> Result<()>;
    /// Sample rate in Hz
    fn sample_rate(&self) -> Result<u32>;
    fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()>;
}

/// Change notifications sent by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrequencyEvent {
    /// New uncorrected center frequency in Hz
    FrequencyChange(u64),
    /// New oscillator correction in ppm
    FrequencyCorrectionChange(f64),
    /// New sample rate in Hz
    SampleRateChange(u32),
    LockedState,
    UnlockedState,
}

/// Receives controller events after the controller lock is released.
///
/// Events raised while allocating a channel arrive with the allocator lock
/// still held: a listener must not request or release channels.
pub trait FrequencyListener: Send + Sync {
    fn frequency_event(&self, event: &FrequencyEvent) -> Result<()>;
}

impl<F> FrequencyListener for F
where
    F: Fn(&FrequencyEvent) -> Result<()> + Send + Sync,
{
    fn frequency_event(&self, event: &FrequencyEvent) -> Result<()> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerList = Arc<Vec<(ListenerId, Arc<dyn FrequencyListener>)>>;

/// Listener fan-out.
///
/// The list is an immutable snapshot replaced on every change; delivery
/// iterates the snapshot taken when the broadcast started, so listeners
/// may register or unregister from within a callback.
#[derive(Default)]
pub struct FrequencyBroadcaster {
    listeners: Mutex<ListenerList>,
    next_id: AtomicU64,
}

impl FrequencyBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn FrequencyListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = Vec::with_capacity(listeners.len() + 1);
        next.extend(listeners.iter().cloned());
        next.push((id, listener));
        *listeners = Arc::new(next);
        id
    }

    /// Returns `false` when `id` was not registered
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if !listeners.iter().any(|(candidate, _)| *candidate == id) {
            return false;
        }
        let next: Vec<_> = listeners
            .iter()
            .filter(|(candidate, _)| *candidate != id)
            .cloned()
            .collect();
        *listeners = Arc::new(next);
        true
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> ListenerList {
        Arc::clone(&self.listeners.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Deliver `event` to every listener; failures are logged and skipped
    pub fn broadcast(&self, event: &FrequencyEvent) {
        let listeners = self.snapshot();
        for (id, listener) in listeners.iter() {
            match catch_unwind(AssertUnwindSafe(|| listener.frequency_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(listener = id.0, ?event, %error, "frequency listener failed")
                }
                Err(_) => warn!(listener = id.0, ?event, "frequency listener panicked"),
            }
        }
    }
}

impl std::fmt::Debug for FrequencyBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencyBroadcaster")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Controller shared between the allocator and the channel sources
pub type SharedController = Arc<Mutex<FrequencyController>>;

/// Events taken out of a controller, waiting for delivery
#[must_use = "events are lost unless delivered"]
pub struct PendingEvents {
    broadcaster: Arc<FrequencyBroadcaster>,
    events: Vec<FrequencyEvent>,
}

impl PendingEvents {
    pub fn events(&self) -> &[FrequencyEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Broadcast the events in the order they were raised
    pub fn deliver(self) {
        for event in &self.events {
            self.broadcaster.broadcast(event);
        }
    }
}

pub struct FrequencyController {
    tunable: Box<dyn Tunable>,
    /// Uncorrected center frequency in Hz
    frequency: u64,
    /// Frequency actually sent to the device
    tuned_frequency: u64,
    minimum_frequency: u64,
    maximum_frequency: u64,
    /// Oscillator correction in ppm
    frequency_correction: f64,
    sample_rate: u32,
    center_blackout_bandwidth: u64,
    usable_bandwidth_fraction: f64,
    locked: bool,
    broadcaster: Arc<FrequencyBroadcaster>,
    /// Raised but not yet delivered
    pending: Vec<FrequencyEvent>,
}

impl FrequencyController {
    /// Take control of `tunable`, applying the configured sample rate and
    /// initial frequency.
    pub fn new(tunable: Box<dyn Tunable>, config: &TunerConfig) -> Result<Self> {
        if config.minimum_frequency >= config.maximum_frequency {
            return Err(Error::config("minimum frequency must be below maximum frequency"));
        }
        let mut controller = Self {
            tunable,
            frequency: 0,
            tuned_frequency: 0,
            minimum_frequency: config.minimum_frequency,
            maximum_frequency: config.maximum_frequency,
            frequency_correction: config.frequency_correction,
            sample_rate: 0,
            center_blackout_bandwidth: config.center_blackout_bandwidth,
            usable_bandwidth_fraction: config.usable_bandwidth_fraction,
            locked: false,
            broadcaster: Arc::new(FrequencyBroadcaster::new()),
            pending: Vec::new(),
        };
        controller.set_sample_rate(config.sample_rate)?;
        controller.apply_frequency(config.initial_frequency)?;
        // nobody can be listening yet
        controller.pending.clear();
        Ok(controller)
    }

    pub fn shared(self) -> SharedController {
        Arc::new(Mutex::new(self))
    }

    /// Apply `change` under the lock of `controller`, then deliver the
    /// events it raised once the lock is released.
    ///
    /// ```
    /// # use sdrddc::tuner::frequency::{FrequencyController, SharedController};
    /// # fn retune(controller: &SharedController) -> sdrddc::Result<()> {
    /// FrequencyController::update(controller, |c| c.set_frequency(162_550_000))
    /// # }
    /// ```
    pub fn update<R>(controller: &SharedController, change: impl FnOnce(&mut Self) -> R) -> R {
        let mut guard = controller.lock().unwrap_or_else(|e| e.into_inner());
        let result = change(&mut guard);
        let events = guard.take_events();
        drop(guard);
        events.deliver();
        result
    }

    /// Hand out the events raised since the last call; deliver them after
    /// releasing the controller lock
    pub fn take_events(&mut self) -> PendingEvents {
        PendingEvents {
            broadcaster: Arc::clone(&self.broadcaster),
            events: std::mem::take(&mut self.pending),
        }
    }

    /// Uncorrected center frequency in Hz
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Corrected frequency sent to the device in Hz
    pub fn tuned_frequency(&self) -> u64 {
        self.tuned_frequency
    }

    pub fn minimum_frequency(&self) -> u64 {
        self.minimum_frequency
    }

    pub fn maximum_frequency(&self) -> u64 {
        self.maximum_frequency
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frequency_correction(&self) -> f64 {
        self.frequency_correction
    }

    pub fn center_blackout_bandwidth(&self) -> u64 {
        self.center_blackout_bandwidth
    }

    /// Bandwidth free of filter roll-off, in Hz
    pub fn usable_bandwidth(&self) -> u64 {
        (self.sample_rate as f64 * self.usable_bandwidth_fraction).round() as u64
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// True when `frequency` maps to a tuned frequency within range
    pub fn can_tune(&self, frequency: u64) -> bool {
        let tuned = self.corrected(frequency);
        (self.minimum_frequency..=self.maximum_frequency).contains(&tuned)
    }

    pub fn broadcaster(&self) -> Arc<FrequencyBroadcaster> {
        Arc::clone(&self.broadcaster)
    }

    pub fn add_listener(&self, listener: Arc<dyn FrequencyListener>) -> ListenerId {
        self.broadcaster.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.broadcaster.remove(id)
    }

    /// Retune; fails with [`Error::Locked`] while the allocator holds the
    /// lock
    pub fn set_frequency(&mut self, frequency: u64) -> Result<()> {
        if self.locked {
            return Err(Error::Locked);
        }
        self.apply_frequency(frequency)
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        if self.locked {
            return Err(Error::Locked);
        }
        if sample_rate == 0 {
            return Err(Error::tuner("sample rate must be positive"));
        }
        self.tunable.set_sample_rate(sample_rate)?;
        self.sample_rate = sample_rate;
        info!(sample_rate, "tuner sample rate changed");
        self.pending.push(FrequencyEvent::SampleRateChange(sample_rate));
        Ok(())
    }

    /// Apply a new oscillator correction and re-resolve the tuned frequency.
    ///
    /// The previous correction is restored when the device rejects the
    /// re-resolved frequency.
    pub fn set_frequency_correction(&mut self, ppm: f64) -> Result<()> {
        if !ppm.is_finite() {
            return Err(Error::tuner(format!("invalid frequency correction {ppm} ppm")));
        }
        let previous = self.frequency_correction;
        self.frequency_correction = ppm;
        if self.frequency > 0
            && let Err(error) = self.apply_frequency(self.frequency)
        {
            self.frequency_correction = previous;
            return Err(error);
        }
        self.pending.push(FrequencyEvent::FrequencyCorrectionChange(ppm));
        Ok(())
    }

    /// Allocator-only retune, allowed while locked
    pub(crate) fn set_locked_frequency(&mut self, frequency: u64) -> Result<()> {
        self.apply_frequency(frequency)
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        if self.locked == locked {
            return;
        }
        self.locked = locked;
        if locked {
            info!(frequency = self.frequency, "frequency controller locked");
            self.pending.push(FrequencyEvent::LockedState);
        } else {
            info!(frequency = self.frequency, "frequency controller unlocked");
            self.pending.push(FrequencyEvent::UnlockedState);
        }
    }

    fn corrected(&self, frequency: u64) -> u64 {
        (frequency as f64 / (1.0 + self.frequency_correction / 1e6)).round() as u64
    }

    fn apply_frequency(&mut self, frequency: u64) -> Result<()> {
        let tuned = self.corrected(frequency);
        if !(self.minimum_frequency..=self.maximum_frequency).contains(&tuned) {
            return Err(Error::InvalidFrequency {
                frequency: tuned,
                minimum: self.minimum_frequency,
                maximum: self.maximum_frequency,
            });
        }
        self.tunable.set_tuned_frequency(tuned)?;
        debug!(frequency, tuned, ppm = self.frequency_correction, "tuner retuned");
        self.frequency = frequency;
        self.tuned_frequency = tuned;
        self.pending.push(FrequencyEvent::FrequencyChange(frequency));
        Ok(())
    }
}

impl std::fmt::Debug for FrequencyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencyController")
            .field("frequency", &self.frequency)
            .field("tuned_frequency", &self.tuned_frequency)
            .field("sample_rate", &self.sample_rate)
            .field("frequency_correction", &self.frequency_correction)
            .field("locked", &self.locked)
            .finish()
    }
}
