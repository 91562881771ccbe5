//! Channel allocation and tuner center frequency placement.
//!
//! The manager keeps the set of active channels and decides the tuner
//! center frequency that fits all of them within the usable bandwidth
//! while keeping them clear of the DC spike at the center:
//!
//! - a single channel sits immediately right of the blackout zone,
//!   `center = min − blackout + 1`;
//! - several channels start with the highest one at the upper edge of the
//!   usable bandwidth, `center = max − usable / 2`, then the center moves
//!   right past every channel overlapping `[center − blackout, center +
//!   blackout]` until none does, or until the lowest channel would fall off
//!   the lower edge.
//!
//! Allocation works on a proposed copy of the active set, committed only
//! once the new source exists and the tuner is in place, so a rejected
//! request leaves the manager exactly as it was.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::dsp::cic::DecimatorFactory;
use crate::error::{Error, Result};
use crate::tuner::channel::TunerChannel;
use crate::tuner::feed::TunerFeed;
use crate::tuner::frequency::{FrequencyController, SharedController};
use crate::tuner::scheduler::Scheduler;
use crate::tuner::source::{Demodulation, SourceContext, TunerChannelSource};

/// Identifies one admitted channel; identical channels get distinct ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ActiveChannel {
    channel: TunerChannel,
    id: ChannelId,
}

#[derive(Debug, Default)]
struct Allocation {
    channels: Arc<BTreeSet<ActiveChannel>>,
    version: u64,
    next_id: u64,
}

/// State reachable from released sources
struct ManagerInner {
    allocation: Mutex<Allocation>,
    controller: SharedController,
}

impl ManagerInner {
    fn release(&self, id: ChannelId) -> bool {
        let mut allocation = self.allocation.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = allocation.channels.iter().find(|c| c.id == id).copied() else {
            return false;
        };
        let mut next = (*allocation.channels).clone();
        next.remove(&entry);
        let empty = next.is_empty();
        allocation.channels = Arc::new(next);
        allocation.version += 1;
        if empty {
            FrequencyController::update(&self.controller, |c| c.set_locked(false));
        }
        info!(channel = %entry.channel, id = id.0, remaining = allocation.channels.len(), "channel released");
        true
    }
}

pub struct ChannelManager {
    inner: Arc<ManagerInner>,
    feed: Arc<TunerFeed>,
    scheduler: Arc<Scheduler>,
    factory: DecimatorFactory,
    config: ChannelConfig,
}

impl ChannelManager {
    pub fn new(
        controller: SharedController,
        feed: Arc<TunerFeed>,
        scheduler: Arc<Scheduler>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                allocation: Mutex::new(Allocation::default()),
                controller,
            }),
            feed,
            scheduler,
            factory: DecimatorFactory::new(),
            config,
        }
    }

    pub fn controller(&self) -> &SharedController {
        &self.inner.controller
    }

    /// Source of decimated baseband samples for `channel`
    pub fn get_source(&self, channel: TunerChannel) -> Result<TunerChannelSource> {
        self.get_source_with(channel, Demodulation::None)
    }

    /// Admit `channel`, retuning the tuner if needed, and build its source.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelUnavailable`] when the channel cannot share the tuner
    /// with the active channels, [`Error::NoViableCenter`] when no center
    /// frequency fits them all, or any error from building the decimator
    /// or retuning. The active set, the tuner frequency and its lock are
    /// unchanged on error.
    pub fn get_source_with(
        &self,
        channel: TunerChannel,
        demodulation: Demodulation,
    ) -> Result<TunerChannelSource> {
        let mut allocation = self.inner.allocation.lock().unwrap_or_else(|e| e.into_inner());
        let mut controller = self.inner.controller.lock().unwrap_or_else(|e| e.into_inner());
        let admitted = self.admit(&mut allocation, &mut controller, channel, &demodulation);
        // deliver with the allocator still held so retunes reach listeners in order
        let events = controller.take_events();
        drop(controller);
        events.deliver();
        drop(allocation);
        let (mut source, id) = admitted?;

        let inner: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        source.attach_release(Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.release(id);
            }
        }));
        info!(%channel, id = id.0, "channel allocated");
        Ok(source)
    }

    /// Place `channel` alongside the active set and commit it once its
    /// source exists and the tuner is in place
    fn admit(
        &self,
        allocation: &mut Allocation,
        controller: &mut FrequencyController,
        channel: TunerChannel,
        demodulation: &Demodulation,
    ) -> Result<(TunerChannelSource, ChannelId)> {
        if !can_tune(controller, &allocation.channels, &channel) {
            debug!(%channel, active = allocation.channels.len(), "channel rejected");
            return Err(Error::ChannelUnavailable(format!(
                "{channel} does not fit alongside the {} active channel(s)",
                allocation.channels.len()
            )));
        }

        let id = ChannelId(allocation.next_id);
        let mut proposed = (*allocation.channels).clone();
        proposed.insert(ActiveChannel { channel, id });
        let channels: Vec<TunerChannel> = proposed.iter().map(|c| c.channel).collect();

        let usable = controller.usable_bandwidth();
        let blackout = controller.center_blackout_bandwidth();
        let center = calculate_center_frequency(&channels, usable, blackout)?;
        verify_placement(&channels, center, usable)?;
        if !controller.can_tune(center) {
            return Err(Error::NoViableCenter(format!(
                "center frequency {center} Hz is outside of the tuner range"
            )));
        }
        debug!(%channel, center, usable, blackout, channels = channels.len(), "center frequency selected");

        let source = TunerChannelSource::new(
            channel,
            id,
            demodulation,
            SourceContext {
                controller,
                feed: &self.feed,
                scheduler: &self.scheduler,
                factory: &self.factory,
                config: &self.config,
            },
        )?;

        let was_locked = controller.is_locked();
        controller.set_locked(true);
        if center != controller.frequency() {
            if let Err(error) = controller.set_locked_frequency(center) {
                warn!(%channel, center, %error, "retune failed, channel rejected");
                if !was_locked {
                    controller.set_locked(false);
                }
                return Err(error);
            }
            info!(center, channels = channels.len(), "tuner retuned for channel set");
        }

        allocation.channels = Arc::new(proposed);
        allocation.version += 1;
        allocation.next_id += 1;
        Ok((source, id))
    }

    /// Stop `source` and release its channel. The tuner is not retuned.
    pub fn release_source(&self, source: TunerChannelSource) {
        source.stop();
    }

    /// Release the channel admitted under `id`; unknown ids are ignored.
    pub fn release(&self, id: ChannelId) -> bool {
        self.inner.release(id)
    }

    /// Active channels in frequency order
    pub fn channels(&self) -> Vec<TunerChannel> {
        self.snapshot().iter().map(|c| c.channel).collect()
    }

    pub fn channel_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Incremented on every committed change of the active set
    pub fn version(&self) -> u64 {
        self.inner
            .allocation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .version
    }

    fn snapshot(&self) -> Arc<BTreeSet<ActiveChannel>> {
        Arc::clone(
            &self
                .inner
                .allocation
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .channels,
        )
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.channels())
            .field("version", &self.version())
            .finish()
    }
}

/// Quick admission check before any placement is attempted: the channel
/// must lie strictly within the tuner range and, with channels already
/// active, within one usable bandwidth of their span.
fn can_tune(
    controller: &FrequencyController,
    active: &BTreeSet<ActiveChannel>,
    channel: &TunerChannel,
) -> bool {
    if !(controller.minimum_frequency() < channel.min_frequency()
        && channel.max_frequency() < controller.maximum_frequency())
    {
        return false;
    }
    if active.is_empty() {
        return true;
    }

    let usable = controller.usable_bandwidth();
    let min_locked = active.iter().map(|c| c.channel.min_frequency()).min().unwrap_or(0);
    let max_locked = active.iter().map(|c| c.channel.max_frequency()).max().unwrap_or(0);

    if min_locked <= channel.min_frequency() && channel.max_frequency() <= max_locked {
        return true;
    }
    if channel.max_frequency() > min_locked && channel.max_frequency() - min_locked <= usable {
        return true;
    }
    channel.min_frequency() <= max_locked && max_locked - channel.min_frequency() <= usable
}

/// Center frequency placing every channel in `channels` clear of the
/// blackout zone.
///
/// The search only ever moves the center upwards; it can miss a placement
/// that a downward shift would have found.
pub fn calculate_center_frequency(
    channels: &[TunerChannel],
    usable_bandwidth: u64,
    center_blackout_bandwidth: u64,
) -> Result<u64> {
    if channels.is_empty() {
        return Err(Error::NoViableCenter("no channels".into()));
    }
    let blackout = center_blackout_bandwidth as i64;
    let half_usable = (usable_bandwidth / 2) as i64;
    let min_locked = channels.iter().map(|c| c.min_frequency()).min().unwrap_or(0) as i64;
    let max_locked = channels.iter().map(|c| c.max_frequency()).max().unwrap_or(0) as i64;

    let center = if channels.len() == 1 {
        min_locked - blackout + 1
    } else {
        let mut candidate = max_locked - half_usable;
        if blackout > 0 {
            let mut settled = false;
            for _ in 0..=channels.len() {
                let avoid_min = candidate - blackout;
                let avoid_max = candidate + blackout;
                let overlapping = channels
                    .iter()
                    .find(|c| c.overlaps(avoid_min.max(0) as u64, avoid_max.max(0) as u64));
                let Some(overlapping) = overlapping else {
                    settled = true;
                    break;
                };
                let adjustment = overlapping.max_frequency() as i64 - avoid_min + 1;
                if candidate + adjustment - half_usable > min_locked {
                    return Err(Error::NoViableCenter(format!(
                        "{overlapping} cannot be moved out of the center blackout"
                    )));
                }
                candidate += adjustment;
            }
            if !settled {
                return Err(Error::NoViableCenter(
                    "center blackout search did not settle".into(),
                ));
            }
        }
        candidate
    };

    u64::try_from(center)
        .map_err(|_| Error::NoViableCenter(format!("negative center frequency {center} Hz")))
}

/// Every channel must lie within `center ± usable / 2`
fn verify_placement(channels: &[TunerChannel], center: u64, usable_bandwidth: u64) -> Result<()> {
    let half = usable_bandwidth / 2;
    let lower = center.saturating_sub(half);
    let upper = center.saturating_add(half);
    match channels
        .iter()
        .find(|c| c.min_frequency() < lower || c.max_frequency() > upper)
    {
        Some(channel) => Err(Error::NoViableCenter(format!(
            "{channel} falls outside of [{lower}, {upper}] Hz"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulerConfig, TunerConfig};
    use crate::tuner::frequency::Tunable;

    struct NullTunable;

    impl Tunable for NullTunable {
        fn tuned_frequency(&self) -> Result<u64> {
            Ok(0)
        }

        fn set_tuned_frequency(&mut self, _frequency: u64) -> Result<()> {
            Ok(())
        }

        fn sample_rate(&self) -> Result<u32> {
            Ok(0)
        }

        fn set_sample_rate(&mut self, _sample_rate: u32) -> Result<()> {
            Ok(())
        }
    }

    /// 125 kHz tuner with 100 kHz usable and a 2 kHz blackout
    fn manager() -> ChannelManager {
        let tuner = TunerConfig {
            minimum_frequency: 500_000,
            maximum_frequency: 2_000_000,
            sample_rate: 125_000,
            usable_bandwidth_fraction: 0.8,
            center_blackout_bandwidth: 2_000,
            initial_frequency: 1_000_000,
            ..TunerConfig::default()
        };
        let controller = FrequencyController::new(Box::new(NullTunable), &tuner)
            .unwrap()
            .shared();
        let channel = ChannelConfig {
            sample_rate: 25_000,
            ..ChannelConfig::default()
        };
        let scheduler = Scheduler::new(&SchedulerConfig::default()).unwrap();
        ChannelManager::new(controller, Arc::new(TunerFeed::new()), Arc::new(scheduler), channel)
    }

    fn frequency(manager: &ChannelManager) -> u64 {
        manager.controller().lock().unwrap().frequency()
    }

    #[test]
    fn test_single_channel_right_of_blackout() {
        let channels = [TunerChannel::new(1_000_000, 10_000)];
        assert_eq!(calculate_center_frequency(&channels, 100_000, 2_000).unwrap(), 993_001);
    }

    #[test]
    fn test_two_channels_shift_past_blackout() {
        let channels = [
            TunerChannel::new(1_000_000, 10_000),
            TunerChannel::new(1_050_000, 10_000),
        ];
        assert_eq!(calculate_center_frequency(&channels, 100_000, 2_000).unwrap(), 1_007_001);
        assert_eq!(calculate_center_frequency(&channels, 100_000, 0).unwrap(), 1_005_000);
    }

    #[test]
    fn test_unresolvable_blackout() {
        // clearing the wide upper channel would push the lower one out
        let channels = [
            TunerChannel::new(1_000_000, 40_000),
            TunerChannel::new(1_040_000, 60_000),
        ];
        let err = calculate_center_frequency(&channels, 100_000, 2_000).unwrap_err();
        assert!(matches!(err, Error::NoViableCenter(_)));
        assert!(calculate_center_frequency(&[], 100_000, 2_000).is_err());
    }

    #[test]
    fn test_allocation_sequence() {
        let manager = manager();
        let a = TunerChannel::new(1_000_000, 10_000);
        let b = TunerChannel::new(1_050_000, 10_000);
        let c = TunerChannel::new(1_200_000, 10_000);

        let source_a = manager.get_source(a).unwrap();
        assert_eq!(frequency(&manager), 993_001);
        assert!(manager.controller().lock().unwrap().is_locked());

        let source_b = manager.get_source(b).unwrap();
        assert_eq!(frequency(&manager), 1_007_001);
        assert_eq!(source_a.tuner_frequency(), 1_007_001);
        assert_eq!(source_b.sample_rate(), 25_000);

        let version = manager.version();
        let err = manager.get_source(c).unwrap_err();
        assert!(matches!(err, Error::ChannelUnavailable(_)));
        assert_eq!(manager.channels(), vec![a, b]);
        assert_eq!(manager.version(), version);
        assert_eq!(frequency(&manager), 1_007_001);

        manager.release_source(source_a);
        assert_eq!(manager.channels(), vec![b]);
        assert_eq!(frequency(&manager), 1_007_001);
        drop(source_b);
        assert_eq!(manager.channel_count(), 0);
        assert!(!manager.controller().lock().unwrap().is_locked());
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let manager = manager();
        let _source = manager.get_source(TunerChannel::new(1_000_000, 10_000)).unwrap();
        let version = manager.version();
        assert!(!manager.release(ChannelId(42)));
        assert_eq!(manager.version(), version);
        assert_eq!(manager.channel_count(), 1);
        assert_eq!(frequency(&manager), 993_001);
    }

    #[test]
    fn test_construction_failure_rolls_back() {
        let manager = manager();
        // pass band wider than the 25 kHz channel Nyquist
        let err = manager.get_source(TunerChannel::new(1_000_000, 30_000)).unwrap_err();
        assert!(matches!(err, Error::FilterDesign(_)));
        assert_eq!(manager.channel_count(), 0);
        assert_eq!(manager.version(), 0);
        assert_eq!(frequency(&manager), 1_000_000);
        assert!(!manager.controller().lock().unwrap().is_locked());
    }

    #[test]
    fn test_identical_channels_coexist() {
        let manager = manager();
        let channel = TunerChannel::new(1_000_000, 10_000);
        let first = manager.get_source(channel).unwrap();
        let second = manager.get_source(channel).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(manager.channel_count(), 2);
        drop(first);
        assert_eq!(manager.channels(), vec![channel]);
    }

    #[test]
    fn test_set_frequency_rejected_while_allocated() {
        let manager = manager();
        let _source = manager.get_source(TunerChannel::new(1_000_000, 10_000)).unwrap();
        let err = manager.controller().lock().unwrap().set_frequency(1_100_000).unwrap_err();
        assert!(err.is_locked());
        assert_eq!(frequency(&manager), 993_001);
    }
}
