//! Analysis Loop Timers
//!
//! Cancellable periodic tasks feeding ticks into the engine loop.
//! Each kind has at most one live task; rescheduling aborts the old one
//! and bumps a generation so late ticks from it are ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Safety-net stats recompute period
pub const STATS_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    AutoAnalysis,
    StatsRefresh,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::AutoAnalysis => "auto-analysis",
            TimerKind::StatsRefresh => "stats-refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub kind: TimerKind,
    pub generation: u64,
}

struct TimerSlot {
    generation: u64,
    period: Duration,
    next_fire: Instant,
    handle: JoinHandle<()>,
}

pub struct TimerSet {
    tx: mpsc::Sender<Tick>,
    slots: HashMap<TimerKind, TimerSlot>,
    generations: HashMap<TimerKind, u64>,
}

impl TimerSet {
    pub fn new(tx: mpsc::Sender<Tick>) -> Self {
        Self {
            tx,
            slots: HashMap::new(),
            generations: HashMap::new(),
        }
    }

    /// Replace any running task of this kind with a fresh one
    pub fn reschedule(&mut self, kind: TimerKind, period: Duration) {
        self.cancel(kind);

        let generation = {
            let g = self.generations.entry(kind).or_insert(0);
            *g += 1;
            *g
        };

        let start = Instant::now() + period;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(Tick { kind, generation }).await.is_err() {
                    break;
                }
            }
        });

        log::debug!(
            "[TrafficMonitor] Timer {} scheduled every {:?} (gen {})",
            kind.as_str(),
            period,
            generation
        );

        self.slots.insert(
            kind,
            TimerSlot {
                generation,
                period,
                next_fire: start,
                handle,
            },
        );
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(slot) = self.slots.remove(&kind) {
            slot.handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.handle.abort();
        }
    }

    /// Accept a tick if it belongs to the live task; advances the countdown
    pub fn accept(&mut self, tick: Tick) -> bool {
        match self.slots.get_mut(&tick.kind) {
            Some(slot) if slot.generation == tick.generation => {
                slot.next_fire = Instant::now() + slot.period;
                true
            }
            _ => false,
        }
    }

    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Whole seconds until the next tick of this kind
    pub fn seconds_until(&self, kind: TimerKind) -> Option<u64> {
        self.slots.get(&kind).map(|slot| {
            slot.next_fire
                .saturating_duration_since(Instant::now())
                .as_secs()
        })
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_drops_stale_ticks() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut timers = TimerSet::new(tx);

        timers.reschedule(TimerKind::AutoAnalysis, Duration::from_secs(30));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.generation, 1);
        assert!(timers.accept(first));

        timers.reschedule(TimerKind::AutoAnalysis, Duration::from_secs(15));
        // A tick from the aborted task would carry generation 1
        assert!(!timers.accept(first));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.generation, 2);
        assert!(timers.accept(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_and_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let mut timers = TimerSet::new(tx);

        timers.reschedule(TimerKind::AutoAnalysis, Duration::from_secs(60));
        assert_eq!(timers.seconds_until(TimerKind::AutoAnalysis), Some(60));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(timers.seconds_until(TimerKind::AutoAnalysis), Some(40));

        timers.cancel(TimerKind::AutoAnalysis);
        assert!(!timers.is_scheduled(TimerKind::AutoAnalysis));
        assert_eq!(timers.seconds_until(TimerKind::AutoAnalysis), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_independent() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut timers = TimerSet::new(tx);

        timers.reschedule(TimerKind::StatsRefresh, STATS_REFRESH_INTERVAL);
        timers.reschedule(TimerKind::AutoAnalysis, Duration::from_secs(30));

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.kind, TimerKind::StatsRefresh);
        assert!(timers.accept(tick));
        assert!(timers.is_scheduled(TimerKind::AutoAnalysis));
    }
}
