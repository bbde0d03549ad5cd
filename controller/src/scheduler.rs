use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::reconciler::Reconciler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Running,
    ShuttingDown,
    Terminated,
}

impl SchedulerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Terminated => "TERMINATED",
        }
    }
}

pub struct Scheduler {
    reconciler: Reconciler,
    last_poll: Instant,
    loop_delay: Duration,
    phase: SchedulerPhase,
}

impl Scheduler {
    /// `last_poll` is the time of the startup seed pass.
    pub fn new(reconciler: Reconciler, loop_delay: Duration, last_poll: Instant) -> Self {
        Self {
            reconciler,
            last_poll,
            loop_delay,
            phase: SchedulerPhase::Running,
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.reconciler.poll_interval_secs())
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_poll) > self.poll_interval()
    }

    /// Runs a pass when the interval has elapsed. Returns whether it polled.
    pub async fn step(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.reconciler.reconcile(true).await;
        self.last_poll = now;
        true
    }

    /// Loops until `shutdown` fires; a pass in flight is allowed to finish.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            "scheduler {} with {}s poll interval",
            self.phase.as_str(),
            self.reconciler.poll_interval_secs()
        );

        while !shutdown.is_cancelled() {
            self.step(Instant::now()).await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.loop_delay) => {}
            }
        }

        self.transition(SchedulerPhase::ShuttingDown);
    }

    pub fn finish(&mut self) {
        self.transition(SchedulerPhase::Terminated);
    }

    fn transition(&mut self, next: SchedulerPhase) {
        if self.phase != next {
            info!("scheduler {} -> {}", self.phase.as_str(), next.as_str());
            self.phase = next;
        }
    }
}
