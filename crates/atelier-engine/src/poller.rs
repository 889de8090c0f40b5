use std::time::Duration;

use async_trait::async_trait;
use atelier_contracts::{DispatchError, Result};
use tokio_util::sync::CancellationToken;

use crate::config::PollSettings;

/// Suspends the current task without occupying a worker thread.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Provider status for one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Done {
        /// Base64 video payload, if the provider attached one.
        video: Option<String>,
        error: Option<String>,
    },
}

#[async_trait]
pub trait OperationClient: Send + Sync {
    async fn fetch_status(&self, operation: &str) -> Result<PollStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Done,
    Failed,
    TimedOut,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutCause {
    PollCeiling,
    /// Provider reported `done` without any video payload.
    MissingPayload,
}

impl TimeoutCause {
    fn describe(&self) -> &'static str {
        match self {
            Self::PollCeiling => "poll ceiling reached",
            Self::MissingPayload => "operation completed without a video payload",
        }
    }
}

/// Result and error live inside the state, so a terminal operation carries
/// exactly one of them and a pending one carries neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Done { video: String },
    Failed { detail: String },
    TimedOut(TimeoutCause),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    name: String,
    state: OperationState,
    polls: u32,
}

impl Operation {
    pub fn submitted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: OperationState::Pending,
            polls: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn status(&self) -> OperationStatus {
        match self.state {
            OperationState::Pending => OperationStatus::Pending,
            OperationState::Done { .. } => OperationStatus::Done,
            OperationState::Failed { .. } => OperationStatus::Failed,
            OperationState::TimedOut(_) => OperationStatus::TimedOut,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status() != OperationStatus::Pending
    }

    /// Applies one poll response. Terminal operations ignore further input.
    pub fn observe(&mut self, status: PollStatus) {
        if self.is_terminal() {
            return;
        }
        self.polls += 1;
        if let PollStatus::Done { video, error } = status {
            self.state = match (video.filter(|v| !v.trim().is_empty()), error) {
                (Some(video), _) => OperationState::Done { video },
                (None, Some(detail)) => OperationState::Failed { detail },
                (None, None) => OperationState::TimedOut(TimeoutCause::MissingPayload),
            };
        }
    }

    fn time_out(&mut self) {
        if !self.is_terminal() {
            self.state = OperationState::TimedOut(TimeoutCause::PollCeiling);
        }
    }

    /// Base64 video payload of a completed job, or the matching error.
    pub fn into_video(self) -> Result<String> {
        match self.state {
            OperationState::Done { video } => Ok(video),
            OperationState::Failed { detail } => Err(DispatchError::OperationFailed {
                operation: self.name,
                detail,
            }),
            OperationState::TimedOut(cause) => Err(DispatchError::Timeout {
                operation: self.name,
                polls: self.polls,
                reason: cause.describe().to_string(),
            }),
            OperationState::Pending => Err(DispatchError::Timeout {
                operation: self.name,
                polls: self.polls,
                reason: "operation still pending".to_string(),
            }),
        }
    }
}

/// `submitted -> pending -> { done | failed | timed_out }`, one status
/// request per interval, at most `max_polls` requests.
pub struct OperationPoller<'a> {
    client: &'a dyn OperationClient,
    sleeper: &'a dyn Sleeper,
    settings: PollSettings,
    cancel: Option<CancellationToken>,
}

impl<'a> OperationPoller<'a> {
    pub fn new(
        client: &'a dyn OperationClient,
        sleeper: &'a dyn Sleeper,
        settings: PollSettings,
    ) -> Self {
        Self {
            client,
            sleeper,
            settings,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// One iteration: sleep, then fetch the status once. Returns `false`
    /// without polling when the operation is terminal or has used its poll
    /// budget; in the latter case it is marked timed out.
    pub async fn step(&self, operation: &mut Operation) -> Result<bool> {
        if operation.is_terminal() {
            return Ok(false);
        }
        if operation.polls() >= self.settings.max_polls {
            operation.time_out();
            tracing::warn!(
                operation = operation.name(),
                polls = operation.polls(),
                "poll ceiling reached"
            );
            return Ok(false);
        }
        self.pause(operation).await?;
        let status = self.client.fetch_status(operation.name()).await?;
        operation.observe(status);
        tracing::debug!(
            operation = operation.name(),
            polls = operation.polls(),
            status = operation.status().as_str(),
            "operation polled"
        );
        Ok(true)
    }

    /// Steps until terminal. Errors from a status request end the loop.
    pub async fn run(
        &self,
        mut operation: Operation,
        mut on_poll: impl FnMut(&Operation),
    ) -> Result<Operation> {
        while self.step(&mut operation).await? {
            on_poll(&operation);
        }
        Ok(operation)
    }

    async fn pause(&self, operation: &Operation) -> Result<()> {
        let cancelled = || DispatchError::Cancelled {
            operation: operation.name().to_string(),
            polls: operation.polls(),
        };
        match &self.cancel {
            Some(cancel) => {
                if cancel.is_cancelled() {
                    return Err(cancelled());
                }
                tokio::select! {
                    _ = cancel.cancelled() => Err(cancelled()),
                    _ = self.sleeper.sleep(self.settings.interval) => Ok(()),
                }
            }
            None => {
                self.sleeper.sleep(self.settings.interval).await;
                Ok(())
            }
        }
    }
}
