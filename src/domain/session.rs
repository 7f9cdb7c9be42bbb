//! Pomodoro session state and its transition function.
//!
//! `apply` is pure: it never performs I/O. Remote calls the transition implies
//! are returned as [`SessionEffect`]s for the controller to execute.

use crate::domain::models::SessionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const WORK_MINUTES: u32 = 25;
pub const SHORT_BREAK_MINUTES: u32 = 5;
pub const LONG_BREAK_MINUTES: u32 = 15;
pub const WORK_SESSIONS_PER_LONG_BREAK: u32 = 4;
pub const REMOTE_SYNC_EVERY_SECONDS: u32 = 10;

pub fn session_minutes(kind: SessionKind) -> u32 {
    match kind {
        SessionKind::Work => WORK_MINUTES,
        SessionKind::ShortBreak => SHORT_BREAK_MINUTES,
        SessionKind::LongBreak => LONG_BREAK_MINUTES,
    }
}

pub fn session_duration_seconds(kind: SessionKind) -> u32 {
    session_minutes(kind) * 60
}

/// Whole minutes reported to the server, rounded up.
pub fn elapsed_minutes(elapsed_seconds: u32) -> u32 {
    elapsed_seconds.div_ceil(60)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("a {kind} session is already active ({remaining} remaining)")]
    Conflict { kind: &'static str, remaining: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRef {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    pub active_task_id: Option<i64>,
    pub active_task_title: Option<String>,
    pub remaining_seconds: u32,
    pub is_running: bool,
    pub is_completed: bool,
    pub remote_session_id: Option<i64>,
    pub elapsed_seconds: u32,
    pub session_kind: SessionKind,
    pub completed_work_sessions: u32,
    #[serde(default)]
    pub previous_task: Option<TaskRef>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            active_task_id: None,
            active_task_title: None,
            remaining_seconds: session_duration_seconds(SessionKind::Work),
            is_running: false,
            is_completed: false,
            remote_session_id: None,
            elapsed_seconds: 0,
            session_kind: SessionKind::Work,
            completed_work_sessions: 0,
            previous_task: None,
        }
    }
}

impl SessionState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::idle()
    }

    /// A work session bound to a task, or a break that has been entered, and
    /// in either case not yet completed.
    pub fn has_active_timer(&self) -> bool {
        !self.is_completed && (self.session_kind.is_break() || self.active_task_id.is_some())
    }

    pub fn remaining_display(&self) -> String {
        format!(
            "{:02}:{:02}",
            self.remaining_seconds / 60,
            self.remaining_seconds % 60
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        let duration = session_duration_seconds(self.session_kind);
        if self.remaining_seconds > duration {
            return Err(format!(
                "remaining_seconds {} exceeds {} session length {duration}",
                self.remaining_seconds,
                self.session_kind.as_str()
            ));
        }
        if self.session_kind.is_break() {
            if self.active_task_id.is_some() {
                return Err("break sessions must not carry a task".to_string());
            }
            if self.remote_session_id.is_some() {
                return Err("break sessions must not carry a remote session".to_string());
            }
        }
        if self.remote_session_id.is_some() && self.active_task_id.is_none() {
            return Err("remote session requires an active task".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    Unload,
    VisibilityLost,
    TokenLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Remote record already created and started by the caller.
    Started {
        task_id: i64,
        task_title: String,
        remote_session_id: i64,
    },
    Pause,
    Resume,
    Skip,
    Stop,
    Tick,
    Suspend(SuspendReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    SyncElapsed { session_id: i64, minutes: u32 },
    /// Flush `minutes`, then mark the record complete.
    CompleteRemote { session_id: i64, minutes: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub kind: SessionKind,
    pub elapsed_seconds: u32,
    pub next_kind: SessionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SessionState,
    pub effects: Vec<SessionEffect>,
    pub completion: Option<Completion>,
}

impl Transition {
    fn unchanged(state: &SessionState) -> Self {
        Self::to(state.clone())
    }

    fn to(state: SessionState) -> Self {
        Self {
            state,
            effects: Vec::new(),
            completion: None,
        }
    }

    fn with_effect(mut self, effect: Option<SessionEffect>) -> Self {
        self.effects.extend(effect);
        self
    }
}

pub fn ensure_can_start(state: &SessionState) -> Result<(), SessionError> {
    if state.has_active_timer() {
        return Err(SessionError::Conflict {
            kind: state.session_kind.as_str(),
            remaining: state.remaining_display(),
        });
    }
    Ok(())
}

pub fn apply(state: &SessionState, event: SessionEvent) -> Result<Transition, SessionError> {
    let transition = match event {
        SessionEvent::Started {
            task_id,
            task_title,
            remote_session_id,
        } => {
            ensure_can_start(state)?;
            Transition::to(SessionState {
                active_task_id: Some(task_id),
                active_task_title: Some(task_title),
                remaining_seconds: session_duration_seconds(SessionKind::Work),
                is_running: true,
                is_completed: false,
                remote_session_id: Some(remote_session_id),
                elapsed_seconds: 0,
                session_kind: SessionKind::Work,
                completed_work_sessions: state.completed_work_sessions,
                previous_task: None,
            })
        }
        SessionEvent::Pause => {
            let mut next = state.clone();
            next.is_running = false;
            Transition::to(next).with_effect(flush_effect(state))
        }
        SessionEvent::Resume => resume(state),
        SessionEvent::Skip => {
            if state.has_active_timer() || (state.is_completed && state.session_kind.is_break()) {
                complete(state)
            } else {
                Transition::unchanged(state)
            }
        }
        SessionEvent::Stop => Transition::to(SessionState::idle()).with_effect(flush_effect(state)),
        SessionEvent::Tick => tick(state),
        SessionEvent::Suspend(reason) => {
            if reason == SuspendReason::TokenLost && !state.is_running {
                Transition::unchanged(state)
            } else {
                let mut next = state.clone();
                next.is_running = false;
                Transition::to(next).with_effect(flush_effect(state))
            }
        }
    };
    Ok(transition)
}

fn flush_effect(state: &SessionState) -> Option<SessionEffect> {
    let session_id = state.remote_session_id?;
    if state.elapsed_seconds == 0 {
        return None;
    }
    Some(SessionEffect::SyncElapsed {
        session_id,
        minutes: elapsed_minutes(state.elapsed_seconds),
    })
}

fn resume(state: &SessionState) -> Transition {
    if !state.is_completed {
        if !state.has_active_timer() {
            return Transition::unchanged(state);
        }
        let mut next = state.clone();
        next.is_running = true;
        return Transition::to(next);
    }

    // A finished work session leaves its break prepared; a finished break
    // needs a task, which only `start` can provide.
    if state.session_kind.is_break() {
        let mut next = state.clone();
        next.is_completed = false;
        next.is_running = true;
        return Transition::to(next);
    }
    Transition::unchanged(state)
}

fn tick(state: &SessionState) -> Transition {
    if !state.is_running || state.is_completed {
        return Transition::unchanged(state);
    }

    let mut next = state.clone();
    next.elapsed_seconds = next.elapsed_seconds.saturating_add(1);
    next.remaining_seconds = next.remaining_seconds.saturating_sub(1);

    if next.remaining_seconds == 0 {
        return complete(&next);
    }

    let periodic = if next.elapsed_seconds % REMOTE_SYNC_EVERY_SECONDS == 0 {
        flush_effect(&next)
    } else {
        None
    };
    Transition::to(next).with_effect(periodic)
}

fn complete(state: &SessionState) -> Transition {
    let finished = state.session_kind;
    let mut effects = Vec::new();
    if let Some(session_id) = state.remote_session_id {
        if state.elapsed_seconds > 0 {
            effects.push(SessionEffect::CompleteRemote {
                session_id,
                minutes: elapsed_minutes(state.elapsed_seconds),
            });
        }
    }

    let mut next = state.clone();
    match finished {
        SessionKind::Work => {
            next.completed_work_sessions = next.completed_work_sessions.saturating_add(1);
            next.session_kind = if next.completed_work_sessions % WORK_SESSIONS_PER_LONG_BREAK == 0 {
                SessionKind::LongBreak
            } else {
                SessionKind::ShortBreak
            };
            next.previous_task = match (next.active_task_id.take(), next.active_task_title.take()) {
                (Some(id), title) => Some(TaskRef {
                    id,
                    title: title.unwrap_or_default(),
                }),
                (None, _) => None,
            };
        }
        SessionKind::ShortBreak | SessionKind::LongBreak => {
            next.session_kind = SessionKind::Work;
            if let Some(task) = next.previous_task.take() {
                next.active_task_id = Some(task.id);
                next.active_task_title = Some(task.title);
            }
        }
    }

    next.remaining_seconds = session_duration_seconds(next.session_kind);
    next.elapsed_seconds = 0;
    next.remote_session_id = None;
    next.is_completed = true;
    next.is_running = false;

    let completion = Completion {
        kind: finished,
        elapsed_seconds: state.elapsed_seconds,
        next_kind: next.session_kind,
    };
    Transition {
        state: next,
        effects,
        completion: Some(completion),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedSession {
    pub state: SessionState,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(SessionState),
    /// The countdown would have reached zero while the process was gone.
    Expired,
    /// Snapshot of a session that had already completed.
    Finished,
    Invalid(String),
}

pub fn restore(snapshot: PersistedSession, now: DateTime<Utc>) -> RestoreOutcome {
    let PersistedSession { mut state, saved_at } = snapshot;
    if let Err(reason) = state.validate() {
        return RestoreOutcome::Invalid(reason);
    }
    if state.is_completed {
        return RestoreOutcome::Finished;
    }

    let away = if state.is_running {
        let seconds = (now - saved_at).num_seconds().max(0);
        u32::try_from(seconds).unwrap_or(u32::MAX)
    } else {
        0
    };
    if away >= state.remaining_seconds {
        return RestoreOutcome::Expired;
    }

    state.remaining_seconds -= away;
    state.elapsed_seconds = state.elapsed_seconds.saturating_add(away);
    state.is_running = false;
    RestoreOutcome::Restored(state)
}
