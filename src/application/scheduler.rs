use crate::application::controller::{PomodoroController, TimerSnapshot};
use crate::domain::session::Completion;
use crate::infrastructure::api_client::SessionApi;
use crate::infrastructure::state_store::KeyValueStore;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);
pub const UNLOAD_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledJob {
    Tick,
    AuthPoll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub tick_every: Duration,
    pub auth_poll_every: Duration,
}

impl Schedule {
    pub fn new(auth_poll_every: Duration) -> Self {
        Self {
            tick_every: TICK_PERIOD,
            auth_poll_every: auth_poll_every.max(Duration::from_millis(1)),
        }
    }

    pub fn jobs(&self) -> [(ScheduledJob, Duration); 2] {
        [
            (ScheduledJob::Tick, self.tick_every),
            (ScheduledJob::AuthPoll, self.auth_poll_every),
        ]
    }
}

/// Virtual clock for driving the controller without waiting.
#[derive(Debug, Clone)]
pub struct ManualScheduler {
    now: Duration,
    slots: Vec<(ScheduledJob, Duration, Duration)>,
}

impl ManualScheduler {
    pub fn new(schedule: &Schedule) -> Self {
        Self {
            now: Duration::ZERO,
            slots: schedule
                .jobs()
                .into_iter()
                .map(|(job, period)| (job, period, period))
                .collect(),
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Moves the clock forward and returns every job that fell due, oldest
    /// first. Jobs due at the same instant keep schedule order.
    pub fn advance(&mut self, by: Duration) -> Vec<ScheduledJob> {
        let target = self.now + by;
        let mut due = Vec::new();
        loop {
            let next = self
                .slots
                .iter_mut()
                .filter(|(_, _, next_due)| *next_due <= target)
                .min_by_key(|(_, _, next_due)| *next_due);
            let Some((job, period, next_due)) = next else {
                break;
            };
            due.push(*job);
            *next_due += *period;
        }
        self.now = target;
        due
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusCommand {
    Start { task_id: i64, title: String },
    Pause,
    Resume,
    Skip,
    Stop,
    Status,
    Away,
    Quit,
}

impl FocusCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Err("empty command".to_string());
        };
        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => {
                const USAGE: &str = "usage: start TASK_ID TITLE";
                let task_id = parts
                    .next()
                    .ok_or_else(|| USAGE.to_string())?
                    .parse::<i64>()
                    .map_err(|error| format!("invalid task id: {error}"))?;
                let title = parts.collect::<Vec<_>>().join(" ");
                if title.is_empty() {
                    return Err(USAGE.to_string());
                }
                return Ok(Self::Start { task_id, title });
            }
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "skip" => Self::Skip,
            "stop" => Self::Stop,
            "status" => Self::Status,
            "away" => Self::Away,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command: {other}")),
        };
        if parts.next().is_some() {
            return Err(format!("{verb} takes no arguments"));
        }
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusEvent {
    Status(TimerSnapshot),
    Completed(Completion),
    AuthLost(TimerSnapshot),
    Failed(String),
    Unloaded { snapshot: TimerSnapshot, drained: bool },
}

pub fn run_job<A, K>(
    controller: &mut PomodoroController<A, K>,
    job: ScheduledJob,
) -> Option<FocusEvent>
where
    A: SessionApi + ?Sized + 'static,
    K: KeyValueStore + ?Sized,
{
    match job {
        ScheduledJob::Tick => controller.tick().map(FocusEvent::Completed),
        ScheduledJob::AuthPoll => controller
            .poll_auth()
            .then(|| FocusEvent::AuthLost(controller.snapshot())),
    }
}

/// Returns false when the loop should exit.
async fn run_command<A, K>(
    controller: &mut PomodoroController<A, K>,
    command: FocusCommand,
    on_event: &mut (dyn FnMut(FocusEvent) + Send),
) -> bool
where
    A: SessionApi + ?Sized + 'static,
    K: KeyValueStore + ?Sized,
{
    match command {
        FocusCommand::Start { task_id, title } => {
            match controller.start(task_id, &title).await {
                Ok(()) => on_event(FocusEvent::Status(controller.snapshot())),
                Err(error) => on_event(FocusEvent::Failed(error.to_string())),
            }
        }
        FocusCommand::Pause => controller.pause(),
        FocusCommand::Resume => controller.resume(),
        FocusCommand::Skip => {
            if let Some(completion) = controller.skip() {
                on_event(FocusEvent::Completed(completion));
            }
        }
        FocusCommand::Stop => controller.stop().await,
        FocusCommand::Status => on_event(FocusEvent::Status(controller.snapshot())),
        FocusCommand::Away => controller.visibility_lost(),
        FocusCommand::Quit => return false,
    }
    true
}

/// Owns the controller for the lifetime of a focus session: scheduled jobs
/// and user commands are applied one at a time. Ctrl-C, `quit` and a closed
/// command channel all unload.
pub async fn run_focus_loop<A, K>(
    controller: &mut PomodoroController<A, K>,
    schedule: Schedule,
    mut commands: mpsc::Receiver<FocusCommand>,
    on_event: &mut (dyn FnMut(FocusEvent) + Send),
) -> TimerSnapshot
where
    A: SessionApi + ?Sized + 'static,
    K: KeyValueStore + ?Sized,
{
    let start = Instant::now();
    let mut ticks = interval_at(start + schedule.tick_every, schedule.tick_every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut auth_polls = interval_at(start + schedule.auth_poll_every, schedule.auth_poll_every);
    auth_polls.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if let Some(event) = run_job(controller, ScheduledJob::Tick) {
                    on_event(event);
                }
            }
            _ = auth_polls.tick() => {
                if let Some(event) = run_job(controller, ScheduledJob::AuthPoll) {
                    on_event(event);
                }
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    break;
                };
                if !run_command(controller, command, on_event).await {
                    break;
                }
                // Seconds spent awaiting the server are not countdown time.
                ticks.reset();
            }
            _ = &mut ctrl_c => {
                tracing::info!("interrupted; unloading focus session");
                break;
            }
        }
    }

    let drained = controller.unload(UNLOAD_GRACE).await;
    let snapshot = controller.snapshot();
    on_event(FocusEvent::Unloaded {
        snapshot: snapshot.clone(),
        drained,
    });
    snapshot
}
