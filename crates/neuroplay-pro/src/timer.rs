//! # Timers
//!
//! Deadline-based timers for the hub state machine: discovery polling and
//! its timeout, device-start polling and its timeout, and one grab-poll
//! timer per device session.
//!
//! [`Scheduler`] never sleeps. The owner asks for [`next_deadline`] and
//! calls [`fire_expired`] once that instant has passed; the event loop in
//! [`HubClient`](crate::client::HubClient) does this with
//! `tokio::time::sleep_until`, while unit tests pass synthetic instants.
//!
//! Every timer is keyed by a [`TimerKind`]. Starting a kind that is already
//! running re-arms it, so a family never has two overlapping instances.
//!
//! [`next_deadline`]: Scheduler::next_deadline
//! [`fire_expired`]: Scheduler::fire_expired

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::registry::DeviceId;

/// Identity of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Periodic `listdevices` while searching.
    DiscoveryPoll,
    /// One-shot end of the discovery window.
    DiscoveryTimeout,
    /// Periodic `currentdeviceinfo` after a `startdevice` acknowledgement.
    StartPoll,
    /// One-shot end of the device-start window.
    StartTimeout,
    /// Periodic grab-mode requests of one device session.
    Grab(DeviceId),
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    armed_at: Instant,
    deadline: Instant,
    /// `None` for one-shot timers.
    period: Option<Duration>,
}

/// A set of keyed periodic and one-shot timers.
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: HashMap<TimerKind, Timer>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a periodic timer. The first tick is one `period`
    /// after `now`.
    pub fn start_periodic(&mut self, kind: TimerKind, period: Duration, now: Instant) {
        tracing::trace!(?kind, ?period, "Periodic timer armed");
        self.timers.insert(
            kind,
            Timer {
                armed_at: now,
                deadline: now + period,
                period: Some(period),
            },
        );
    }

    /// Start (or restart) a one-shot timer firing `delay` after `now`.
    pub fn start_once(&mut self, kind: TimerKind, delay: Duration, now: Instant) {
        tracing::trace!(?kind, ?delay, "One-shot timer armed");
        self.timers.insert(
            kind,
            Timer {
                armed_at: now,
                deadline: now + delay,
                period: None,
            },
        );
    }

    /// Stop a timer. Returns `true` if it was running.
    pub fn stop(&mut self, kind: TimerKind) -> bool {
        self.timers.remove(&kind).is_some()
    }

    /// Stop every timer.
    pub fn stop_all(&mut self) {
        self.timers.clear();
    }

    #[must_use]
    pub fn is_active(&self, kind: TimerKind) -> bool {
        self.timers.contains_key(&kind)
    }

    /// Change the period of a running periodic timer.
    ///
    /// The next tick moves to one new `period` after the last (re)arm. Does
    /// nothing for stopped or one-shot timers.
    pub fn set_period(&mut self, kind: TimerKind, period: Duration) {
        if let Some(timer) = self.timers.get_mut(&kind)
            && timer.period.is_some()
        {
            timer.period = Some(period);
            timer.deadline = timer.armed_at + period;
        }
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.deadline).min()
    }

    /// Collect every timer whose deadline is at or before `now`, ordered by
    /// deadline.
    ///
    /// One-shot timers are removed. Periodic timers are re-armed one period
    /// after `now`; missed ticks are not replayed.
    pub fn fire_expired(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired: Vec<(Instant, TimerKind)> = self
            .timers
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(kind, t)| (t.deadline, *kind))
            .collect();
        fired.sort();

        for (_, kind) in &fired {
            let rearm = self.timers.get(kind).and_then(|t| t.period);
            match rearm {
                Some(period) => {
                    self.start_periodic(*kind, period, now);
                }
                None => {
                    self.timers.remove(kind);
                }
            }
        }

        fired.into_iter().map(|(_, kind)| kind).collect()
    }
}
