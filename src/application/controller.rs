//! Drives the session reducer: executes its remote effects, persists every
//! change and recovers the snapshot on startup.

use crate::application::auth::TokenQuery;
use crate::domain::models::{CreateSessionRequest, SessionKind, UpdateSessionRequest};
use crate::domain::session::{
    apply, ensure_can_start, restore, Completion, RestoreOutcome, SessionEffect, SessionEvent,
    SessionState, SuspendReason, Transition, WORK_MINUTES,
};
use crate::infrastructure::api_client::SessionApi;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::state_store::{KeyValueStore, SessionSnapshotStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub session_kind: SessionKind,
    pub task_id: Option<i64>,
    pub task_title: Option<String>,
    pub remaining: String,
    pub remaining_seconds: u32,
    pub elapsed_seconds: u32,
    pub is_running: bool,
    pub is_completed: bool,
    pub completed_work_sessions: u32,
    pub remote_session_id: Option<i64>,
    pub has_active_timer: bool,
}

impl From<&SessionState> for TimerSnapshot {
    fn from(state: &SessionState) -> Self {
        Self {
            session_kind: state.session_kind,
            task_id: state.active_task_id,
            task_title: state.active_task_title.clone(),
            remaining: state.remaining_display(),
            remaining_seconds: state.remaining_seconds,
            elapsed_seconds: state.elapsed_seconds,
            is_running: state.is_running,
            is_completed: state.is_completed,
            completed_work_sessions: state.completed_work_sessions,
            remote_session_id: state.remote_session_id,
            has_active_timer: state.has_active_timer(),
        }
    }
}

pub struct PomodoroController<A, K>
where
    A: SessionApi + ?Sized + 'static,
    K: KeyValueStore + ?Sized,
{
    session_api: Arc<A>,
    snapshots: SessionSnapshotStore<K>,
    token_query: TokenQuery,
    now_provider: NowProvider,
    state: SessionState,
    last_token: Option<String>,
    pending: JoinSet<()>,
}

impl<A, K> PomodoroController<A, K>
where
    A: SessionApi + ?Sized + 'static,
    K: KeyValueStore + ?Sized,
{
    pub fn new(
        session_api: Arc<A>,
        snapshots: SessionSnapshotStore<K>,
        token_query: TokenQuery,
    ) -> Self {
        Self {
            session_api,
            snapshots,
            token_query,
            now_provider: Arc::new(Utc::now),
            state: SessionState::idle(),
            last_token: None,
            pending: JoinSet::new(),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot::from(&self.state)
    }

    pub fn has_active_timer(&self) -> bool {
        self.state.has_active_timer()
    }

    pub fn pending_effects(&self) -> usize {
        self.pending.len()
    }

    /// Loads the persisted snapshot, if any. Anything that cannot be resumed
    /// is discarded and the controller stays idle.
    pub fn restore_persisted(&mut self) -> Option<RestoreOutcome> {
        let snapshot = match self.snapshots.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(%error, "discarding unreadable session snapshot");
                self.reset_persisted();
                return Some(RestoreOutcome::Invalid(error.to_string()));
            }
        };

        let outcome = restore(snapshot, (self.now_provider)());
        match &outcome {
            RestoreOutcome::Restored(state) => {
                tracing::info!(
                    kind = state.session_kind.as_str(),
                    remaining = %state.remaining_display(),
                    "restored session"
                );
                self.state = state.clone();
                self.persist();
            }
            RestoreOutcome::Expired => {
                tracing::info!("persisted session ran out while offline");
                self.reset_persisted();
            }
            RestoreOutcome::Finished => self.reset_persisted(),
            RestoreOutcome::Invalid(reason) => {
                tracing::warn!(%reason, "discarding inconsistent session snapshot");
                self.reset_persisted();
            }
        }
        Some(outcome)
    }

    /// Adopts an in-flight remote record for a restored work session that
    /// lost track of its remote id. Returns whether one was adopted.
    pub async fn reconcile_remote(&mut self) -> bool {
        let Some(task_id) = self.state.active_task_id else {
            return false;
        };
        if self.state.session_kind != SessionKind::Work
            || self.state.is_completed
            || self.state.remote_session_id.is_some()
        {
            return false;
        }
        let Some(token) = self.current_token() else {
            return false;
        };

        let sessions = match self.session_api.list_sessions(&token, Some(task_id)).await {
            Ok(sessions) => sessions,
            Err(error) => {
                tracing::warn!(%error, task_id, "remote session lookup failed");
                return false;
            }
        };
        let Some(in_flight) = sessions
            .into_iter()
            .filter(|session| {
                session.task_id == task_id
                    && session.session_type == SessionKind::Work
                    && session.is_in_flight()
            })
            .max_by_key(|session| session.id)
        else {
            return false;
        };

        tracing::info!(session_id = in_flight.id, task_id, "adopted in-flight remote session");
        self.state.remote_session_id = Some(in_flight.id);
        self.persist();
        true
    }

    /// Creates and starts the remote record before touching local state, so a
    /// remote failure leaves the controller unchanged.
    pub async fn start(&mut self, task_id: i64, task_title: &str) -> Result<(), InfraError> {
        ensure_can_start(&self.state)?;
        let token = self.current_token().ok_or(InfraError::Unauthenticated)?;

        let created = self
            .session_api
            .create_session(
                &token,
                &CreateSessionRequest {
                    task_id,
                    duration_minutes: WORK_MINUTES,
                    session_type: SessionKind::Work,
                },
            )
            .await?;
        self.session_api.start_session(&token, created.id).await?;

        let transition = apply(
            &self.state,
            SessionEvent::Started {
                task_id,
                task_title: task_title.to_string(),
                remote_session_id: created.id,
            },
        )?;
        tracing::info!(task_id, session_id = created.id, "work session started");
        self.commit(transition, Some(token));
        Ok(())
    }

    pub fn pause(&mut self) {
        self.dispatch(SessionEvent::Pause);
    }

    pub fn resume(&mut self) {
        self.dispatch(SessionEvent::Resume);
    }

    pub fn skip(&mut self) -> Option<Completion> {
        self.dispatch(SessionEvent::Skip)
    }

    /// Flushes the final elapsed time, waiting for the server, then resets.
    pub async fn stop(&mut self) {
        let transition = match apply(&self.state, SessionEvent::Stop) {
            Ok(transition) => transition,
            Err(error) => {
                tracing::warn!(%error, "stop rejected");
                return;
            }
        };
        if let Some(token) = self.current_token() {
            for effect in &transition.effects {
                if let Err(error) = execute_effect(self.session_api.as_ref(), &token, effect).await
                {
                    tracing::warn!(%error, ?effect, "final session flush failed");
                }
            }
        } else if !transition.effects.is_empty() {
            tracing::warn!("skipping final session flush: not authenticated");
        }

        self.state = transition.state;
        self.persist();
        tracing::info!("session stopped");
    }

    /// One second of countdown.
    pub fn tick(&mut self) -> Option<Completion> {
        self.reap_finished();
        self.dispatch(SessionEvent::Tick)
    }

    /// Pauses a running session once the token disappears. The flush uses the
    /// last token seen, which is still accepted by the server right after a
    /// local logout.
    pub fn poll_auth(&mut self) -> bool {
        let query = Arc::clone(&self.token_query);
        if let Some(token) = query() {
            self.last_token = Some(token);
            return false;
        }
        if !self.state.is_running {
            return false;
        }

        let token = self.last_token.take();
        match apply(&self.state, SessionEvent::Suspend(SuspendReason::TokenLost)) {
            Ok(transition) => {
                tracing::info!("token gone; pausing session");
                self.commit(transition, token);
                true
            }
            Err(error) => {
                tracing::warn!(%error, "auth poll transition rejected");
                false
            }
        }
    }

    /// The user stepped away.
    pub fn visibility_lost(&mut self) {
        self.dispatch(SessionEvent::Suspend(SuspendReason::VisibilityLost));
    }

    /// Pauses, persists and waits up to `grace` for outstanding remote calls.
    pub async fn unload(&mut self, grace: Duration) -> bool {
        self.dispatch(SessionEvent::Suspend(SuspendReason::Unload));
        self.drain_pending(grace).await
    }

    /// Waits for spawned remote effects. Returns false if `limit` elapsed
    /// first; the rest are aborted.
    pub async fn drain_pending(&mut self, limit: Duration) -> bool {
        let pending = &mut self.pending;
        let drained = tokio::time::timeout(limit, async {
            while let Some(result) = pending.join_next().await {
                if let Err(error) = result {
                    tracing::warn!(%error, "remote sync task failed to join");
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                outstanding = self.pending.len(),
                "abandoning remote sync still in flight"
            );
            self.pending.abort_all();
            return false;
        }
        true
    }

    fn dispatch(&mut self, event: SessionEvent) -> Option<Completion> {
        match apply(&self.state, event.clone()) {
            Ok(transition) => {
                let token = self.current_token();
                self.commit(transition, token)
            }
            Err(error) => {
                tracing::warn!(%error, ?event, "session event rejected");
                None
            }
        }
    }

    fn commit(&mut self, transition: Transition, token: Option<String>) -> Option<Completion> {
        let Transition {
            state,
            effects,
            completion,
        } = transition;

        let changed = state != self.state;
        self.state = state;
        if changed {
            self.persist();
        }
        self.spawn_effects(effects, token);

        if let Some(completion) = &completion {
            tracing::info!(
                finished = completion.kind.as_str(),
                next = completion.next_kind.as_str(),
                elapsed_seconds = completion.elapsed_seconds,
                "session completed"
            );
        }
        completion
    }

    fn spawn_effects(&mut self, effects: Vec<SessionEffect>, token: Option<String>) {
        if effects.is_empty() {
            return;
        }
        let Some(token) = token else {
            tracing::warn!(count = effects.len(), "skipping remote sync: not authenticated");
            return;
        };

        for effect in effects {
            let session_api = Arc::clone(&self.session_api);
            let token = token.clone();
            self.pending.spawn(async move {
                if let Err(error) = execute_effect(session_api.as_ref(), &token, &effect).await {
                    tracing::warn!(%error, ?effect, "remote session sync failed");
                }
            });
        }
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.pending.try_join_next() {
            if let Err(error) = result {
                tracing::warn!(%error, "remote sync task failed to join");
            }
        }
    }

    fn current_token(&mut self) -> Option<String> {
        let token = (self.token_query)();
        if token.is_some() {
            self.last_token.clone_from(&token);
        }
        token
    }

    fn persist(&self) {
        let result = if self.state.is_idle() {
            self.snapshots.clear()
        } else {
            self.snapshots.save(&self.state, (self.now_provider)())
        };
        if let Err(error) = result {
            tracing::warn!(%error, "failed to persist session snapshot");
        }
    }

    fn reset_persisted(&mut self) {
        self.state = SessionState::idle();
        if let Err(error) = self.snapshots.clear() {
            tracing::warn!(%error, "failed to clear session snapshot");
        }
    }
}

async fn execute_effect<A>(
    session_api: &A,
    access_token: &str,
    effect: &SessionEffect,
) -> Result<(), InfraError>
where
    A: SessionApi + ?Sized,
{
    match *effect {
        SessionEffect::SyncElapsed {
            session_id,
            minutes,
        } => {
            session_api
                .update_session(
                    access_token,
                    session_id,
                    &UpdateSessionRequest {
                        actual_duration_minutes: minutes,
                    },
                )
                .await?;
        }
        SessionEffect::CompleteRemote {
            session_id,
            minutes,
        } => {
            session_api
                .update_session(
                    access_token,
                    session_id,
                    &UpdateSessionRequest {
                        actual_duration_minutes: minutes,
                    },
                )
                .await?;
            session_api
                .complete_session(access_token, session_id)
                .await?;
        }
    }
    Ok(())
}
