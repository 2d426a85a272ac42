//! Re-executing a trace until the peer plays along.
//!
//! A run can fail for reasons that say nothing about the peer: it was not
//! listening yet, the connection dropped, a read timed out. The harness
//! re-runs the trace a bounded number of times, sleeping in between and
//! resetting the connection context and the trace before each new attempt.
//!
//! The control flow is a small state machine. [`transition`] is pure; the
//! harness performs the side effect each state stands for and feeds the
//! result back in as an event.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::ExecutionReport;
use crate::timer::{LinearBackoff, Sleep, ThreadSleep};
use crate::transport::Connector;
use crate::{ConnectionContext, Engine, Error, Trace};

/// Something that executes a trace against a context.
pub trait Execute {
    fn execute(
        &mut self,
        trace: &mut Trace,
        ctx: &mut ConnectionContext,
    ) -> Result<ExecutionReport, Error>;
}

impl Execute for Engine {
    fn execute(
        &mut self,
        trace: &mut Trace,
        ctx: &mut ConnectionContext,
    ) -> Result<ExecutionReport, Error> {
        self.run(trace, ctx)
    }
}

/// How often and how patiently to re-execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    reexecutions: u32,
    base_sleep: Duration,
    sleep_increment: Duration,
    connect_failure_sleep: Duration,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            reexecutions: 3,
            base_sleep: Duration::from_millis(500),
            sleep_increment: Duration::from_millis(500),
            connect_failure_sleep: Duration::from_secs(5),
        }
    }

    /// Attempts after the first one.
    #[inline(always)]
    pub fn reexecutions(&self) -> u32 {
        self.reexecutions
    }

    #[inline(always)]
    pub fn base_sleep(&self) -> Duration {
        self.base_sleep
    }

    /// Added to the sleep for every earlier failure that counted.
    #[inline(always)]
    pub fn sleep_increment(&self) -> Duration {
        self.sleep_increment
    }

    /// Sleep after failing to connect. Not subject to the increment.
    #[inline(always)]
    pub fn connect_failure_sleep(&self) -> Duration {
        self.connect_failure_sleep
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::builder().build()
    }
}

pub struct RetryPolicyBuilder {
    reexecutions: u32,
    base_sleep: Duration,
    sleep_increment: Duration,
    connect_failure_sleep: Duration,
}

impl RetryPolicyBuilder {
    /// Set the number of attempts after the first.
    ///
    /// Defaults to 3.
    pub fn reexecutions(mut self, n: u32) -> Self {
        self.reexecutions = n;
        self
    }

    /// Set the sleep after the first counted failure.
    ///
    /// Defaults to 500 milliseconds.
    pub fn base_sleep(mut self, d: Duration) -> Self {
        self.base_sleep = d;
        self
    }

    /// Set how much longer each further sleep gets.
    ///
    /// Defaults to 500 milliseconds.
    pub fn sleep_increment(mut self, d: Duration) -> Self {
        self.sleep_increment = d;
        self
    }

    /// Set the sleep after failing to connect.
    ///
    /// Defaults to 5 seconds.
    pub fn connect_failure_sleep(mut self, d: Duration) -> Self {
        self.connect_failure_sleep = d;
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            reexecutions: self.reexecutions,
            base_sleep: self.base_sleep,
            sleep_increment: self.sleep_increment,
            connect_failure_sleep: self.connect_failure_sleep,
        }
    }
}

/// Where the harness is. Attempts count from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Attempting {
        attempt: u32,
        backoff: LinearBackoff,
    },
    Sleeping {
        attempt: u32,
        duration: Duration,
        backoff: LinearBackoff,
    },
    Resetting {
        attempt: u32,
        backoff: LinearBackoff,
    },
    Succeeded {
        attempts: u32,
    },
    /// Every allowed attempt failed.
    Exhausted {
        attempts: u32,
    },
    /// A non-retriable error, a failed reset or cancellation.
    Aborted {
        attempts: u32,
    },
}

impl HarnessState {
    pub fn start(policy: &RetryPolicy) -> Self {
        HarnessState::Attempting {
            attempt: 1,
            backoff: LinearBackoff::new(policy.base_sleep, policy.sleep_increment),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            HarnessState::Succeeded { .. }
                | HarnessState::Exhausted { .. }
                | HarnessState::Aborted { .. }
        )
    }
}

/// What happened in a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessEvent {
    /// The run completed as planned.
    Success,
    /// The run failed transiently or the peer deviated from the plan.
    Failure,
    /// The peer could not be reached.
    CannotConnect,
    /// The run failed in a way another attempt cannot fix.
    Fatal,
    Cancelled,
    Slept,
    ResetDone,
    ResetFailed,
}

/// Next state of the harness. Events that do not apply leave the state as is.
pub fn transition(state: HarnessState, event: HarnessEvent, policy: &RetryPolicy) -> HarnessState {
    use HarnessEvent as E;
    use HarnessState as S;

    match (state, event) {
        (S::Attempting { attempt, .. }, E::Success) => S::Succeeded { attempts: attempt },
        (S::Attempting { attempt, .. }, E::Fatal | E::Cancelled) => {
            S::Aborted { attempts: attempt }
        }
        (S::Attempting { attempt, .. }, E::Failure | E::CannotConnect)
            if attempt > policy.reexecutions =>
        {
            S::Exhausted { attempts: attempt }
        }
        (S::Attempting { attempt, backoff }, E::CannotConnect) => S::Sleeping {
            attempt,
            duration: policy.connect_failure_sleep,
            backoff,
        },
        (S::Attempting { attempt, mut backoff }, E::Failure) => {
            let duration = backoff.delay();
            backoff.attempt();
            S::Sleeping {
                attempt,
                duration,
                backoff,
            }
        }
        (S::Sleeping { attempt, backoff, .. }, E::Slept) => S::Resetting { attempt, backoff },
        (S::Resetting { attempt, backoff }, E::ResetDone) => S::Attempting {
            attempt: attempt + 1,
            backoff,
        },
        (S::Resetting { attempt, .. }, E::ResetFailed) => S::Aborted { attempts: attempt },
        (state, _) => state,
    }
}

/// How a harness call ended, from the peer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    AsPlanned,
    /// Runs completed but the peer did not do what was planned.
    Deviated,
    /// The trace could not be executed: the peer was unreachable, the
    /// connection broke or the harness itself failed.
    CouldNotExecute,
}

/// Result of [`RetryHarness::call`].
#[derive(Debug)]
pub struct Outcome {
    pub attempts: u32,
    /// Report of the last run that completed, if any.
    pub report: Option<ExecutionReport>,
    /// Error of the last attempt, if it ended in one.
    pub error: Option<Error>,
    /// Total time slept between attempts.
    pub slept: Duration,
    pub state: HarnessState,
}

impl Outcome {
    pub fn has_error(&self) -> bool {
        !matches!(self.state, HarnessState::Succeeded { .. })
    }

    pub fn verdict(&self) -> Verdict {
        if !self.has_error() {
            return Verdict::AsPlanned;
        }
        match (&self.error, &self.report) {
            (None, Some(_)) => Verdict::Deviated,
            _ => Verdict::CouldNotExecute,
        }
    }
}

/// Runs a trace with bounded re-execution.
pub struct RetryHarness<S: Sleep = ThreadSleep> {
    policy: RetryPolicy,
    sleeper: S,
    connector: Option<Box<dyn Connector>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl RetryHarness<ThreadSleep> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleep(policy, ThreadSleep)
    }
}

impl<S: Sleep> RetryHarness<S> {
    pub fn with_sleep(policy: RetryPolicy, sleeper: S) -> Self {
        RetryHarness {
            policy,
            sleeper,
            connector: None,
            cancel: None,
        }
    }

    /// Connect a fresh transport before every attempt that lacks one.
    pub fn connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Stop before the next attempt once `flag` is set.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `trace` until it runs as planned or attempts run out.
    ///
    /// `trace` must not carry results. Between attempts both `trace` and
    /// `ctx` are reset; after the call they hold the last attempt. With a
    /// connector every attempt runs over a fresh transport, without one the
    /// transport attached to `ctx` is kept across attempts.
    pub fn call(
        &mut self,
        engine: &mut dyn Execute,
        trace: &mut Trace,
        ctx: &mut ConnectionContext,
    ) -> Outcome {
        let mut state = HarnessState::start(&self.policy);
        let mut report = None;
        let mut last = ExecutionAttempt::default();
        let mut pending_sleep = Duration::ZERO;
        let mut slept = Duration::ZERO;

        loop {
            let event = match state {
                HarnessState::Attempting { attempt, .. } => {
                    let (event, mut current) = self.attempt(engine, trace, ctx, &mut report);
                    current.slept = mem::take(&mut pending_sleep);
                    match &current.error {
                        Some(e) => info!(
                            "{}: attempt {} (after {:?}): {:?} ({})",
                            ctx.alias(),
                            attempt,
                            current.slept,
                            event,
                            e
                        ),
                        None => info!(
                            "{}: attempt {} (after {:?}): {:?}",
                            ctx.alias(),
                            attempt,
                            current.slept,
                            event
                        ),
                    }
                    last = current;
                    event
                }
                HarnessState::Sleeping { duration, .. } => {
                    debug!("{}: sleep {:?} before next attempt", ctx.alias(), duration);
                    self.sleeper.sleep(duration);
                    pending_sleep += duration;
                    slept += duration;
                    HarnessEvent::Slept
                }
                HarnessState::Resetting { .. } => {
                    trace.reset();
                    // Without a connector the stream in place is all there is.
                    let reset = if self.connector.is_some() {
                        ctx.reset()
                    } else {
                        ctx.reset_state();
                        Ok(())
                    };
                    match reset {
                        Ok(()) => HarnessEvent::ResetDone,
                        Err(e) => {
                            warn!("{}: {}", ctx.alias(), e);
                            last.error = Some(e);
                            HarnessEvent::ResetFailed
                        }
                    }
                }
                HarnessState::Succeeded { attempts }
                | HarnessState::Exhausted { attempts }
                | HarnessState::Aborted { attempts } => {
                    return Outcome {
                        attempts,
                        report,
                        error: last.error,
                        slept,
                        state,
                    };
                }
            };
            state = transition(state, event, &self.policy);
        }
    }

    fn attempt(
        &mut self,
        engine: &mut dyn Execute,
        trace: &mut Trace,
        ctx: &mut ConnectionContext,
        report: &mut Option<ExecutionReport>,
    ) -> (HarnessEvent, ExecutionAttempt) {
        let mut attempt = ExecutionAttempt::default();

        if self
            .cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
        {
            return (HarnessEvent::Cancelled, attempt);
        }

        if let Some(connector) = &mut self.connector {
            if !ctx.has_transport() {
                match connector.connect(ctx) {
                    Ok(transport) => ctx.attach_transport(transport),
                    Err(e) => return (attempt.fail(e), attempt),
                }
            }
        }

        let event = match engine.execute(trace, ctx) {
            Ok(r) => {
                let planned = r.executed_as_planned;
                *report = Some(r);
                if planned {
                    HarnessEvent::Success
                } else {
                    HarnessEvent::Failure
                }
            }
            // Nothing will ever attach a transport.
            Err(Error::NotConnected) if self.connector.is_none() => {
                attempt.error = Some(Error::NotConnected);
                HarnessEvent::Fatal
            }
            Err(e) => attempt.fail(e),
        };
        (event, attempt)
    }
}

/// One attempt as seen by the harness. Only the last one survives the call,
/// as the error of the [`Outcome`].
#[derive(Debug, Default)]
struct ExecutionAttempt {
    error: Option<Error>,
    /// Sleep taken between the previous attempt and this one.
    slept: Duration,
}

impl ExecutionAttempt {
    /// Store `e` and classify it.
    fn fail(&mut self, e: Error) -> HarnessEvent {
        let event = classify(&e);
        self.error = Some(e);
        event
    }
}

fn classify(e: &Error) -> HarnessEvent {
    if e.is_connect_failure() {
        HarnessEvent::CannotConnect
    } else if e.is_transient() {
        HarnessEvent::Failure
    } else {
        HarnessEvent::Fatal
    }
}
