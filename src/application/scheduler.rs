//! Job scheduler. A registry of recurring jobs executed cooperatively on a
//! small worker pool. A handler slower than its cadence does not stack: the
//! overlapping tick is skipped and logged. On first registration the next
//! run time is *now*, so every job fires once right after startup.

use crate::application::clock::SharedClock;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

/// Worker pool size. Two is enough: a slow scan must not delay a monitor
/// tick, and nothing else competes.
const WORKERS: usize = 2;

#[derive(Debug, Clone, Copy)]
pub enum Cadence {
    Every(Duration),
    DailyAt { hour: u32, minute: u32, tz: Tz },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> Result<()>;
}

struct Job {
    name: &'static str,
    cadence: Cadence,
    handler: Arc<dyn JobHandler>,
    next_run: DateTime<Utc>,
    busy: Arc<AtomicBool>,
}

pub struct Scheduler {
    clock: SharedClock,
    jobs: Vec<Job>,
    workers: Arc<Semaphore>,
    grace: Duration,
}

/// Next occurrence of `hour:minute` local time strictly after `now`.
fn next_daily(now: DateTime<Utc>, hour: u32, minute: u32, tz: Tz) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let target_time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();
    let mut candidate_date = local_now.date_naive();
    loop {
        let naive = candidate_date.and_time(target_time);
        if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
            let utc = candidate.with_timezone(&Utc);
            if utc > now {
                return utc;
            }
        }
        candidate_date = match candidate_date.succ_opt() {
            Some(next) => next,
            None => return now + ChronoDuration::days(1),
        };
    }
}

impl Scheduler {
    pub fn new(clock: SharedClock, grace: Duration) -> Self {
        Self {
            clock,
            jobs: Vec::new(),
            workers: Arc::new(Semaphore::new(WORKERS)),
            grace,
        }
    }

    pub fn register(
        &mut self,
        name: &'static str,
        cadence: Cadence,
        handler: Arc<dyn JobHandler>,
    ) {
        let next_run = self.clock.now();
        info!("Scheduler: registered job '{}' ({:?})", name, cadence);
        self.jobs.push(Job {
            name,
            cadence,
            handler,
            next_run,
            busy: Arc::new(AtomicBool::new(false)),
        });
    }

    fn reschedule(&self, cadence: Cadence, fired_at: DateTime<Utc>) -> DateTime<Utc> {
        match cadence {
            Cadence::Every(interval) => {
                fired_at
                    + ChronoDuration::from_std(interval)
                        .unwrap_or_else(|_| ChronoDuration::seconds(1))
            }
            Cadence::DailyAt { hour, minute, tz } => next_daily(fired_at, hour, minute, tz),
        }
    }

    /// Dispatch loop. Returns once shutdown is signalled and every in-flight
    /// handler either finished or exhausted the grace window.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let now = self.clock.now();
            for index in 0..self.jobs.len() {
                if self.jobs[index].next_run > now {
                    continue;
                }

                let cadence = self.jobs[index].cadence;
                self.jobs[index].next_run = self.reschedule(cadence, now);

                if self.jobs[index].busy.load(Ordering::Acquire) {
                    warn!(
                        "Scheduler: job '{}' still running, skipping tick",
                        self.jobs[index].name
                    );
                    continue;
                }

                let job_name = self.jobs[index].name;
                let handler = Arc::clone(&self.jobs[index].handler);
                let busy = Arc::clone(&self.jobs[index].busy);
                let workers = Arc::clone(&self.workers);

                busy.store(true, Ordering::Release);
                tokio::spawn(async move {
                    let _permit = match workers.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            busy.store(false, Ordering::Release);
                            return;
                        }
                    };
                    debug!("Scheduler: running '{}'", job_name);
                    // A failing handler never unwinds the scheduler.
                    if let Err(e) = handler.run().await {
                        error!("Scheduler: job '{}' failed: {:#}", job_name, e);
                    }
                    busy.store(false, Ordering::Release);
                });
            }
        }

        self.drain().await;
    }

    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + self.grace;
        loop {
            let running: Vec<&str> = self
                .jobs
                .iter()
                .filter(|job| job.busy.load(Ordering::Acquire))
                .map(|job| job.name)
                .collect();
            if running.is_empty() {
                info!("Scheduler: drained");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("Scheduler: grace window elapsed with jobs still running: {:?}", running);
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::SystemClock;
    use std::sync::atomic::AtomicUsize;

    struct CountingJob {
        runs: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl JobHandler for CountingJob {
        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[test]
    fn daily_cadence_picks_next_local_occurrence() {
        let tz = chrono_tz::Europe::Berlin;
        // 22:00 UTC == 23:00 UTC+1 in winter, so 23:55 local is still ahead.
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 22, 0, 0).unwrap();
        let next = next_daily(now, 23, 55, tz);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 15, 22, 55, 0).unwrap());

        // Past today's window: rolls to tomorrow.
        let late = Utc.with_ymd_and_hms(2025, 1, 15, 23, 30, 0).unwrap();
        let next = next_daily(late, 23, 55, tz);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 16, 22, 55, 0).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn first_run_is_immediate() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(Arc::new(SystemClock), Duration::from_secs(1));
        scheduler.register(
            "test",
            Cadence::Every(Duration::from_secs(3600)),
            Arc::new(CountingJob {
                runs: Arc::clone(&runs),
                delay: Duration::ZERO,
            }),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_does_not_stack() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new(Arc::new(SystemClock), Duration::from_secs(30));
        // handler takes 5s, cadence is 1s: overlapping ticks are skipped
        scheduler.register(
            "slow",
            Cadence::Every(Duration::from_secs(1)),
            Arc::new(CountingJob {
                runs: Arc::clone(&runs),
                delay: Duration::from_secs(5),
            }),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(11)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // ~11s wall time, 5s handler: at most 3 starts, never 11
        let total = runs.load(Ordering::SeqCst);
        assert!(total >= 2, "expected at least 2 runs, got {}", total);
        assert!(total <= 3, "handler stacked: {} runs", total);
    }
}
