//! Periodic job scheduler
//!
//! Owns named jobs, each running on its own tokio task with an interval and
//! an initial delay. Shutdown stops dispatching; a job already running is
//! allowed to finish.

use super::archive::ArchivalTask;
use super::exchange::SyncService;
use super::replay::ReplayEngine;
use crate::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

/// Random delay in `[0, max]`, spreading first runs of many nodes
pub fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

struct Entry {
    job: Arc<dyn Job>,
    interval: Duration,
    initial_delay: Duration,
}

pub struct Scheduler {
    entries: Vec<Entry>,
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            entries: Vec::new(),
            handles: Vec::new(),
            shutdown,
        }
    }

    /// Register a job; takes effect on `start`
    pub fn add(&mut self, job: Arc<dyn Job>, interval: Duration, initial_delay: Duration) -> &mut Self {
        self.entries.push(Entry {
            job,
            interval,
            initial_delay,
        });
        self
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.job.name()).collect()
    }

    /// Spawn one task per registered job
    pub fn start(&mut self) {
        for entry in self.entries.drain(..) {
            let mut shutdown = self.shutdown.subscribe();
            tracing::info!(
                job = entry.job.name(),
                interval_secs = entry.interval.as_secs_f64(),
                delay_secs = entry.initial_delay.as_secs_f64(),
                "Scheduling job"
            );

            let handle = tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(entry.initial_delay) => {}
                    _ = shutdown.changed() => return,
                }

                let mut ticker = tokio::time::interval(entry.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.changed() => break,
                    }
                    if *shutdown.borrow() {
                        break;
                    }

                    if let Err(e) = entry.job.run().await {
                        tracing::warn!(job = entry.job.name(), error = %e, "Job run failed");
                    }
                }
                tracing::debug!(job = entry.job.name(), "Job stopped");
            });
            self.handles.push(handle);
        }
    }

    /// Stop dispatching and wait for running jobs to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}

/// Fast loop: replay whatever is still unreplayed
pub struct ReplaySweepJob {
    engine: Arc<ReplayEngine>,
}

impl ReplaySweepJob {
    pub fn new(engine: Arc<ReplayEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Job for ReplaySweepJob {
    fn name(&self) -> &'static str {
        "replay-sweep"
    }

    async fn run(&self) -> Result<()> {
        self.engine.replay_pending().await.map(|_| ())
    }
}

/// Slow loop: heartbeat, push and pull
pub struct ExchangeJob {
    service: Arc<SyncService>,
}

impl ExchangeJob {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Job for ExchangeJob {
    fn name(&self) -> &'static str {
        "exchange"
    }

    async fn run(&self) -> Result<()> {
        self.service.exchange().await.map(|_| ())
    }
}

pub struct ArchiveJob {
    task: Arc<ArchivalTask>,
}

impl ArchiveJob {
    pub fn new(task: Arc<ArchivalTask>) -> Self {
        Self { task }
    }
}

#[async_trait]
impl Job for ArchiveJob {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn run(&self) -> Result<()> {
        self.task.run_once().await.map(|_| ())
    }
}
