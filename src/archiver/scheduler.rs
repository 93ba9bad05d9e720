//! Admission-controlled job execution.
//!
//! Jobs run on worker threads; finalization always happens on the calling
//! thread, which is the only thread allowed to touch the open container.
//!
//! Admission is bounded twice: by the number of running jobs and by the sum
//! of their estimated costs. A job whose estimate alone exceeds the cost
//! budget could never be admitted, so it is rejected before anything starts.
//! The first job failure aborts the whole run: nothing further is admitted
//! or finalized, jobs already running are joined and their outputs dropped
//! before the error is returned.

use crate::error::ArchiveError;
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error};

pub trait Job: Send + 'static {
    type Output: Send + 'static;

    fn label(&self) -> String;

    /// Resident cost used for admission control, in bytes.
    fn estimated_cost(&self) -> u64;

    /// Executed on a worker thread.
    fn run(&self) -> Result<Self::Output>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    pub max_concurrency: usize,
    pub max_aggregate_cost: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub started: usize,
    pub finished: usize,
    pub peak_running: usize,
    pub peak_cost: u64,
}

fn check_admissible<J: Job>(jobs: &VecDeque<J>, limits: SchedulerLimits) -> Result<()> {
    if limits.max_concurrency == 0 {
        return Err(ArchiveError::config("scheduler needs at least one worker").into());
    }
    for job in jobs {
        let cost = job.estimated_cost();
        if cost > limits.max_aggregate_cost {
            return Err(ArchiveError::config(format!(
                "found a big job {} ({} bytes estimated, budget {})",
                job.label(),
                cost,
                limits.max_aggregate_cost
            ))
            .into());
        }
    }
    Ok(())
}

struct Admission {
    limits: SchedulerLimits,
    in_flight_cost: u64,
    running: usize,
    stats: SchedulerStats,
}

impl Admission {
    fn new(limits: SchedulerLimits) -> Self {
        Self {
            limits,
            in_flight_cost: 0,
            running: 0,
            stats: SchedulerStats::default(),
        }
    }

    fn admits(&self, cost: u64) -> bool {
        self.running < self.limits.max_concurrency
            && self.in_flight_cost.saturating_add(cost) <= self.limits.max_aggregate_cost
    }

    fn start(&mut self, cost: u64) {
        self.in_flight_cost += cost;
        self.running += 1;
        self.stats.started += 1;
        self.stats.peak_running = self.stats.peak_running.max(self.running);
        self.stats.peak_cost = self.stats.peak_cost.max(self.in_flight_cost);
    }

    fn finish(&mut self, cost: u64) {
        self.in_flight_cost -= cost;
        self.running -= 1;
        self.stats.finished += 1;
    }
}

struct Running<J: Job> {
    label: String,
    cost: u64,
    started_at: Instant,
    handle: JoinHandle<(J, Result<J::Output>)>,
}

fn spawn_worker<J: Job>(job: J) -> Result<JoinHandle<(J, Result<J::Output>)>> {
    thread::Builder::new()
        .name(format!("job-{}", job.label()))
        .spawn(move || {
            let out = job.run();
            (job, out)
        })
        .context("failed to spawn worker thread")
}

/// Join every job still running after a failure and drop its output.
fn discard_running<J: Job>(running: VecDeque<Running<J>>) {
    for job in running {
        match job.handle.join() {
            Ok((_, Ok(_))) => debug!(job = %job.label, "discarded output after failure"),
            Ok((_, Err(err))) => debug!(job = %job.label, err = %format!("{err:#}"), "also failed"),
            Err(_) => debug!(job = %job.label, "worker panicked while draining"),
        }
    }
}

/// Run `jobs` in admission order, always waiting on the earliest-started job
/// and finalizing jobs strictly in start order.
pub fn run_fifo<J, F>(
    jobs: Vec<J>,
    limits: SchedulerLimits,
    mut finalize: F,
) -> Result<SchedulerStats>
where
    J: Job,
    F: FnMut(J, J::Output) -> Result<()>,
{
    let mut pending: VecDeque<J> = jobs.into();
    check_admissible(&pending, limits)?;

    let mut admission = Admission::new(limits);
    let mut running: VecDeque<Running<J>> = VecDeque::new();
    let outcome = drive_fifo(&mut pending, &mut running, &mut admission, &mut finalize);
    if outcome.is_err() {
        error!(draining = running.len(), skipped = pending.len(), "job failed, terminating");
        discard_running(running);
    }
    outcome.map(|()| admission.stats)
}

fn drive_fifo<J, F>(
    pending: &mut VecDeque<J>,
    running: &mut VecDeque<Running<J>>,
    admission: &mut Admission,
    finalize: &mut F,
) -> Result<()>
where
    J: Job,
    F: FnMut(J, J::Output) -> Result<()>,
{
    while !pending.is_empty() || !running.is_empty() {
        while let Some(head) = pending.front() {
            let cost = head.estimated_cost();
            if !admission.admits(cost) {
                break;
            }
            let Some(job) = pending.pop_front() else {
                break;
            };
            let label = job.label();
            admission.start(cost);
            debug!(job = %label, in_flight_cost = admission.in_flight_cost, "starting job");
            running.push_back(Running {
                label,
                cost,
                started_at: Instant::now(),
                handle: spawn_worker(job)?,
            });
        }

        let Some(oldest) = running.pop_front() else {
            break;
        };
        let (job, out) = oldest
            .handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker for {} panicked", oldest.label))?;
        let output = out.with_context(|| format!("job {} failed", oldest.label))?;
        admission.finish(oldest.cost);
        debug!(
            job = %oldest.label,
            secs = oldest.started_at.elapsed().as_secs_f64(),
            in_flight_cost = admission.in_flight_cost,
            "job finished"
        );
        finalize(job, output)?;
    }
    Ok(())
}

type Done<J> = (J, u64, Instant, Result<<J as Job>::Output>);

/// Same admission policy as [`run_fifo`], but jobs are finalized in the order
/// they complete. Workers report completion over a channel.
pub fn run_completion_order<J, F>(
    jobs: Vec<J>,
    limits: SchedulerLimits,
    mut finalize: F,
) -> Result<SchedulerStats>
where
    J: Job,
    F: FnMut(J, J::Output) -> Result<()>,
{
    let mut pending: VecDeque<J> = jobs.into();
    check_admissible(&pending, limits)?;

    let (done_tx, done_rx) = mpsc::channel::<Done<J>>();
    let mut admission = Admission::new(limits);
    let outcome = drive_completion(&mut pending, &mut admission, &done_tx, &done_rx, &mut finalize);
    if outcome.is_err() {
        error!(draining = admission.running, skipped = pending.len(), "job failed, terminating");
        // Workers that never started hold no sender, so recv ends once the
        // live ones have reported.
        drop(done_tx);
        for _ in 0..admission.running {
            let Ok((job, _, _, out)) = done_rx.recv() else {
                break;
            };
            if let Err(err) = out {
                debug!(job = %job.label(), err = %format!("{err:#}"), "also failed");
            } else {
                debug!(job = %job.label(), "discarded output after failure");
            }
        }
    }
    outcome.map(|()| admission.stats)
}

fn drive_completion<J, F>(
    pending: &mut VecDeque<J>,
    admission: &mut Admission,
    done_tx: &mpsc::Sender<Done<J>>,
    done_rx: &mpsc::Receiver<Done<J>>,
    finalize: &mut F,
) -> Result<()>
where
    J: Job,
    F: FnMut(J, J::Output) -> Result<()>,
{
    while !pending.is_empty() || admission.running > 0 {
        while let Some(head) = pending.front() {
            let cost = head.estimated_cost();
            if !admission.admits(cost) {
                break;
            }
            let Some(job) = pending.pop_front() else {
                break;
            };
            let label = job.label();
            let tx = done_tx.clone();
            let started_at = Instant::now();
            thread::Builder::new()
                .name(format!("job-{label}"))
                .spawn(move || {
                    let out = panic::catch_unwind(AssertUnwindSafe(|| job.run()))
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("worker panicked")));
                    let _ = tx.send((job, cost, started_at, out));
                })
                .context("failed to spawn worker thread")?;
            admission.start(cost);
            debug!(job = %label, in_flight_cost = admission.in_flight_cost, "starting job");
        }

        if admission.running == 0 {
            break;
        }
        let (job, cost, started_at, out) = done_rx
            .recv()
            .context("all workers exited without reporting")?;
        admission.finish(cost);
        let label = job.label();
        let output = out.with_context(|| format!("job {label} failed"))?;
        debug!(
            job = %label,
            secs = started_at.elapsed().as_secs_f64(),
            in_flight_cost = admission.in_flight_cost,
            "job finished"
        );
        finalize(job, output)?;
    }
    Ok(())
}
