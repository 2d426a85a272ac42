use std::panic;
use std::thread;

use crossbeam::channel;

use crate::retry::{Outcome, RetryHarness, RetryPolicy};
use crate::transport::Connector;
use crate::{Config, ConnectionContext, Engine, Trace};

/// One independent run: everything a worker needs, owned.
pub struct Job {
    pub trace: Trace,
    pub context: ConnectionContext,
    pub config: Config,
    pub policy: RetryPolicy,
    pub connector: Box<dyn Connector>,
}

/// A finished job. Trace and context hold the last attempt.
#[derive(Debug)]
pub struct JobResult {
    pub trace: Trace,
    pub context: ConnectionContext,
    pub outcome: Outcome,
}

/// Run `jobs` on up to `workers` threads.
///
/// Results come back in the order of `jobs`.
pub fn execute_parallel(jobs: Vec<Job>, workers: usize) -> Vec<JobResult> {
    let count = jobs.len();
    let workers = workers.clamp(1, count.max(1));
    debug!("Run {} jobs on {} workers", count, workers);

    let (job_tx, job_rx) = channel::unbounded::<(usize, Job)>();
    for pair in jobs.into_iter().enumerate() {
        // Cannot fail while `job_rx` is held.
        if job_tx.send(pair).is_err() {
            break;
        }
    }
    drop(job_tx);

    let (done_tx, done_rx) = channel::unbounded::<(usize, JobResult)>();
    let mut joins = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = job_rx.clone();
        let done = done_tx.clone();
        joins.push(thread::spawn(move || {
            for (index, job) in queue.iter() {
                if done.send((index, run_job(job))).is_err() {
                    break;
                }
            }
        }));
    }
    drop(done_tx);

    for join in joins {
        if let Err(e) = join.join() {
            panic::resume_unwind(e);
        }
    }

    let mut done: Vec<_> = done_rx.try_iter().collect();
    done.sort_by_key(|(index, _)| *index);
    done.into_iter().map(|(_, result)| result).collect()
}

fn run_job(job: Job) -> JobResult {
    let Job {
        mut trace,
        mut context,
        config,
        policy,
        connector,
    } = job;

    let mut engine = Engine::new(config);
    let mut harness = RetryHarness::new(policy).connector(connector);
    let outcome = harness.call(&mut engine, &mut trace, &mut context);

    JobResult {
        trace,
        context,
        outcome,
    }
}
