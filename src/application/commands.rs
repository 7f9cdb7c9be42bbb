use crate::application::auth::AuthManager;
use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::application::controller::{PomodoroController, TimerSnapshot};
use crate::application::scheduler::{run_focus_loop, FocusCommand, FocusEvent, Schedule};
use crate::domain::models::{
    DashboardStats, RemoteSession, Task, TaskDraft, TaskPatch, TaskPriority, TaskStatus, User,
};
use crate::domain::session::{restore, RestoreOutcome, SessionState};
use crate::infrastructure::api_client::{ReqwestApiClient, SessionApi, StatsApi, TaskApi};
use crate::infrastructure::auth_client::{AuthHttpClient, ReqwestAuthClient};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::state_store::{SessionSnapshotStore, SqliteKeyValueStore};
use crate::infrastructure::token_store::{KeyringTokenStore, TokenStore};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const FOCUS_COMMAND_BUFFER: usize = 16;

/// Everything the command layer talks to on the server.
pub trait BackendApi: SessionApi + TaskApi + StatsApi {}

impl<T> BackendApi for T where T: SessionApi + TaskApi + StatsApi {}

type Controller = PomodoroController<dyn BackendApi, SqliteKeyValueStore>;

pub struct AppState {
    workspace_root: PathBuf,
    database_path: PathBuf,
    config: AppConfig,
    token_store: Arc<dyn TokenStore>,
    auth_client: Arc<dyn AuthHttpClient>,
    backend: Arc<dyn BackendApi>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let base_url = bootstrap.config.api_base_url.clone();
        let timeout = bootstrap.config.request_timeout;
        let auth_client = Arc::new(ReqwestAuthClient::new(base_url.clone(), timeout)?);
        let backend = Arc::new(ReqwestApiClient::new(base_url, timeout)?);

        Ok(Self::from_bootstrap(
            bootstrap,
            Arc::new(KeyringTokenStore::default()),
            auth_client,
            backend,
        ))
    }

    pub fn with_services(
        workspace_root: PathBuf,
        token_store: Arc<dyn TokenStore>,
        auth_client: Arc<dyn AuthHttpClient>,
        backend: Arc<dyn BackendApi>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self::from_bootstrap(
            bootstrap,
            token_store,
            auth_client,
            backend,
        ))
    }

    fn from_bootstrap(
        bootstrap: BootstrapResult,
        token_store: Arc<dyn TokenStore>,
        auth_client: Arc<dyn AuthHttpClient>,
        backend: Arc<dyn BackendApi>,
    ) -> Self {
        Self {
            workspace_root: bootstrap.workspace_root,
            database_path: bootstrap.database_path,
            config: bootstrap.config,
            token_store,
            auth_client,
            backend,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        tracing::info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        tracing::error!(command, "{message}");
    }

    fn auth(&self) -> AuthManager<dyn TokenStore, dyn AuthHttpClient> {
        AuthManager::new(Arc::clone(&self.token_store), Arc::clone(&self.auth_client))
    }

    fn snapshots(&self) -> SessionSnapshotStore<SqliteKeyValueStore> {
        SessionSnapshotStore::new(Arc::new(SqliteKeyValueStore::new(&self.database_path)))
    }

    fn controller(&self) -> Controller {
        PomodoroController::new(
            Arc::clone(&self.backend),
            self.snapshots(),
            self.auth().token_query(),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub username: String,
    pub token_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TaskInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<String>,
}

pub async fn login_impl(
    state: &AppState,
    username: String,
    password: String,
) -> Result<LoginResponse, InfraError> {
    let token = state.auth().login(&username, &password).await?;
    state.log_info("login", &format!("logged in as {}", username.trim()));
    Ok(LoginResponse {
        username: username.trim().to_string(),
        token_type: token.token_type,
    })
}

pub async fn register_impl(
    state: &AppState,
    email: String,
    username: String,
    password: String,
) -> Result<User, InfraError> {
    let user = state.auth().register(&email, &username, &password).await?;
    state.log_info("register", &format!("registered user_id={}", user.id));
    Ok(user)
}

pub fn logout_impl(state: &AppState) -> Result<LogoutResponse, InfraError> {
    let auth = state.auth();
    let logged_out = auth.access_token()?.is_some();
    auth.logout()?;
    Ok(LogoutResponse { logged_out })
}

pub async fn whoami_impl(state: &AppState) -> Result<User, InfraError> {
    state.auth().current_user().await
}

pub async fn list_tasks_impl(
    state: &AppState,
    status: Option<String>,
) -> Result<Vec<Task>, InfraError> {
    let status = status.as_deref().map(parse_task_status).transpose()?;
    let token = state.auth().require_access_token()?;
    state.backend.list_tasks(&token, status).await
}

pub async fn create_task_impl(state: &AppState, input: TaskInput) -> Result<Task, InfraError> {
    let title = input.title.as_deref().map(str::trim).unwrap_or_default();
    let mut draft = TaskDraft::new(title);
    draft.description = normalize_optional_text(input.description);
    if let Some(status) = input.status.as_deref() {
        draft.status = parse_task_status(status)?;
    }
    if let Some(priority) = input.priority.as_deref() {
        draft.priority = parse_task_priority(priority)?;
    }
    draft.due_date = input
        .due_date
        .as_deref()
        .map(|value| parse_due_date(value, "due_date"))
        .transpose()?;
    draft.validate().map_err(InfraError::InvalidInput)?;

    let token = state.auth().require_access_token()?;
    let task = state.backend.create_task(&token, &draft).await?;
    state.log_info("create_task", &format!("created task_id={}", task.id));
    Ok(task)
}

pub async fn update_task_impl(
    state: &AppState,
    task_id: i64,
    input: TaskInput,
) -> Result<Task, InfraError> {
    let patch = TaskPatch {
        title: input.title.map(|title| title.trim().to_string()),
        description: input.description.map(|description| description.trim().to_string()),
        status: input.status.as_deref().map(parse_task_status).transpose()?,
        priority: input.priority.as_deref().map(parse_task_priority).transpose()?,
        due_date: input
            .due_date
            .as_deref()
            .map(|value| parse_due_date(value, "due_date"))
            .transpose()?,
    };
    patch.validate().map_err(InfraError::InvalidInput)?;

    let token = state.auth().require_access_token()?;
    let task = state.backend.update_task(&token, task_id, &patch).await?;
    state.log_info("update_task", &format!("updated task_id={task_id}"));
    Ok(task)
}

pub async fn delete_task_impl(state: &AppState, task_id: i64) -> Result<bool, InfraError> {
    let token = state.auth().require_access_token()?;
    state.backend.delete_task(&token, task_id).await?;
    state.log_info("delete_task", &format!("deleted task_id={task_id}"));
    Ok(true)
}

pub async fn list_sessions_impl(
    state: &AppState,
    task_id: Option<i64>,
) -> Result<Vec<RemoteSession>, InfraError> {
    let token = state.auth().require_access_token()?;
    state.backend.list_sessions(&token, task_id).await
}

pub async fn dashboard_stats_impl(state: &AppState) -> Result<DashboardStats, InfraError> {
    let token = state.auth().require_access_token()?;
    state.backend.dashboard_stats(&token).await
}

/// Read-only view of the persisted timer, projected to the current time.
/// A focus loop in another process keeps ownership of the snapshot.
pub fn timer_status_impl(state: &AppState) -> Result<TimerSnapshot, InfraError> {
    let Some(snapshot) = state.snapshots().load()? else {
        return Ok(TimerSnapshot::from(&SessionState::idle()));
    };
    let was_running = snapshot.state.is_running;
    match restore(snapshot, Utc::now()) {
        RestoreOutcome::Restored(mut restored) => {
            restored.is_running = was_running;
            Ok(TimerSnapshot::from(&restored))
        }
        RestoreOutcome::Expired | RestoreOutcome::Finished | RestoreOutcome::Invalid(_) => Ok(
            TimerSnapshot::from(&SessionState::idle()),
        ),
    }
}

pub async fn timer_stop_impl(state: &AppState) -> Result<TimerSnapshot, InfraError> {
    let mut controller = state.controller();
    controller.restore_persisted();
    controller.reconcile_remote().await;
    controller.stop().await;
    state.log_info("timer_stop", "timer reset");
    Ok(controller.snapshot())
}

/// Runs the foreground timer until `quit`, end of the command stream or
/// Ctrl-C. With a task id, a work session is started first.
pub async fn focus_impl(
    state: &AppState,
    task_id: Option<i64>,
    title: Option<String>,
    commands: mpsc::Receiver<FocusCommand>,
    on_event: &mut (dyn FnMut(FocusEvent) + Send),
) -> Result<TimerSnapshot, InfraError> {
    let mut controller = state.controller();
    if let Some(outcome) = controller.restore_persisted() {
        state.log_info("focus", &format!("restore outcome: {outcome:?}"));
    }
    controller.reconcile_remote().await;

    if let Some(task_id) = task_id {
        let title = match normalize_optional_text(title) {
            Some(title) => title,
            None => {
                let token = state.auth().require_access_token()?;
                state.backend.get_task(&token, task_id).await?.title
            }
        };
        controller.start(task_id, &title).await?;
        state.log_info("focus", &format!("started task_id={task_id}"));
    }
    on_event(FocusEvent::Status(controller.snapshot()));

    let schedule = Schedule::new(state.config.auth_poll_interval);
    Ok(run_focus_loop(&mut controller, schedule, commands, on_event).await)
}

/// Feeds stdin lines to the focus loop. End of input leaves the loop
/// running until Ctrl-C.
pub fn spawn_stdin_commands() -> mpsc::Receiver<FocusCommand> {
    let (sender, receiver) = mpsc::channel(FOCUS_COMMAND_BUFFER);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match FocusCommand::parse(&line) {
                    Ok(command) => {
                        if sender.send(command).await.is_err() {
                            return;
                        }
                    }
                    Err(message) => tracing::warn!(%message, "ignored focus command"),
                },
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(%error, "stopped reading focus commands");
                    break;
                }
            }
        }
        sender.closed().await;
    });
    receiver
}

fn normalize_optional_text(value: Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn parse_task_status(value: &str) -> Result<TaskStatus, InfraError> {
    TaskStatus::parse(value).map_err(InfraError::InvalidInput)
}

fn parse_task_priority(value: &str) -> Result<TaskPriority, InfraError> {
    TaskPriority::parse(value).map_err(InfraError::InvalidInput)
}

fn parse_due_date(value: &str, field_name: &str) -> Result<NaiveDateTime, InfraError> {
    let value = value.trim();
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Ok(parsed);
    }
    if let Some(midnight) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight);
    }
    Err(InfraError::InvalidInput(format!(
        "{field_name} must be YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS]"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AuthToken, CreateSessionRequest, PomodoroStats, Registration, SessionKind, TaskStats,
        UpdateSessionRequest,
    };
    use crate::infrastructure::auth_client::LoginRequest;
    use crate::infrastructure::token_store::InMemoryTokenStore;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 16)
            .and_then(|date| date.and_hms_opt(9, 0, 0))
            .expect("valid timestamp")
    }

    #[derive(Debug, Default)]
    struct FakeBackend {
        tasks: Mutex<Vec<Task>>,
        sessions: Mutex<Vec<RemoteSession>>,
        next_id: AtomicI64,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn next_id(&self) -> i64 {
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn session(&self, session_id: i64) -> Result<RemoteSession, InfraError> {
            self.sessions
                .lock()
                .expect("sessions poisoned")
                .iter()
                .find(|session| session.id == session_id)
                .cloned()
                .ok_or_else(|| InfraError::Remote("session not found: http 404".to_string()))
        }

        fn edit_session(
            &self,
            session_id: i64,
            edit: impl FnOnce(&mut RemoteSession),
        ) -> Result<RemoteSession, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut sessions = self.sessions.lock().expect("sessions poisoned");
            let session = sessions
                .iter_mut()
                .find(|session| session.id == session_id)
                .ok_or_else(|| InfraError::Remote("session not found: http 404".to_string()))?;
            edit(session);
            Ok(session.clone())
        }
    }

    #[async_trait]
    impl SessionApi for FakeBackend {
        async fn create_session(
            &self,
            _access_token: &str,
            request: &CreateSessionRequest,
        ) -> Result<RemoteSession, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let session = RemoteSession {
                id: self.next_id(),
                task_id: request.task_id,
                duration_minutes: request.duration_minutes,
                session_type: request.session_type,
                actual_duration_minutes: None,
                started_at: None,
                completed_at: None,
                created_at: timestamp(),
            };
            self.sessions
                .lock()
                .expect("sessions poisoned")
                .push(session.clone());
            Ok(session)
        }

        async fn start_session(
            &self,
            _access_token: &str,
            session_id: i64,
        ) -> Result<RemoteSession, InfraError> {
            self.edit_session(session_id, |session| session.started_at = Some(timestamp()))
        }

        async fn update_session(
            &self,
            _access_token: &str,
            session_id: i64,
            request: &UpdateSessionRequest,
        ) -> Result<RemoteSession, InfraError> {
            self.edit_session(session_id, |session| {
                session.actual_duration_minutes = Some(request.actual_duration_minutes)
            })
        }

        async fn complete_session(
            &self,
            _access_token: &str,
            session_id: i64,
        ) -> Result<RemoteSession, InfraError> {
            self.edit_session(session_id, |session| session.completed_at = Some(timestamp()))
        }

        async fn list_sessions(
            &self,
            _access_token: &str,
            task_id: Option<i64>,
        ) -> Result<Vec<RemoteSession>, InfraError> {
            Ok(self
                .sessions
                .lock()
                .expect("sessions poisoned")
                .iter()
                .filter(|session| task_id.is_none_or(|task_id| session.task_id == task_id))
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl TaskApi for FakeBackend {
        async fn list_tasks(
            &self,
            _access_token: &str,
            status: Option<TaskStatus>,
        ) -> Result<Vec<Task>, InfraError> {
            Ok(self
                .tasks
                .lock()
                .expect("tasks poisoned")
                .iter()
                .filter(|task| status.is_none_or(|status| task.status == status))
                .cloned()
                .collect())
        }

        async fn get_task(&self, _access_token: &str, task_id: i64) -> Result<Task, InfraError> {
            self.tasks
                .lock()
                .expect("tasks poisoned")
                .iter()
                .find(|task| task.id == task_id)
                .cloned()
                .ok_or_else(|| InfraError::Remote("reading task failed: http 404".to_string()))
        }

        async fn create_task(
            &self,
            _access_token: &str,
            draft: &TaskDraft,
        ) -> Result<Task, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let task = Task {
                id: self.next_id(),
                title: draft.title.clone(),
                description: draft.description.clone(),
                status: draft.status,
                priority: draft.priority,
                due_date: draft.due_date,
                created_at: timestamp(),
                updated_at: timestamp(),
                completed_at: None,
                pomodoro_sessions: Vec::new(),
            };
            self.tasks.lock().expect("tasks poisoned").push(task.clone());
            Ok(task)
        }

        async fn update_task(
            &self,
            _access_token: &str,
            task_id: i64,
            patch: &TaskPatch,
        ) -> Result<Task, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut tasks = self.tasks.lock().expect("tasks poisoned");
            let task = tasks
                .iter_mut()
                .find(|task| task.id == task_id)
                .ok_or_else(|| InfraError::Remote("updating task failed: http 404".to_string()))?;
            if let Some(title) = &patch.title {
                task.title = title.clone();
            }
            if let Some(status) = patch.status {
                task.status = status;
            }
            if let Some(priority) = patch.priority {
                task.priority = priority;
            }
            Ok(task.clone())
        }

        async fn delete_task(&self, _access_token: &str, task_id: i64) -> Result<(), InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tasks
                .lock()
                .expect("tasks poisoned")
                .retain(|task| task.id != task_id);
            Ok(())
        }
    }

    #[async_trait]
    impl StatsApi for FakeBackend {
        async fn dashboard_stats(&self, _access_token: &str) -> Result<DashboardStats, InfraError> {
            let tasks = self.tasks.lock().expect("tasks poisoned");
            let total = u32::try_from(tasks.len()).unwrap_or(u32::MAX);
            Ok(DashboardStats {
                task_stats: TaskStats {
                    total_tasks: total,
                    completed_tasks: 0,
                    in_progress_tasks: 0,
                    todo_tasks: total,
                    completion_rate: 0.0,
                },
                pomodoro_stats: PomodoroStats {
                    total_sessions: 0,
                    completed_sessions: 0,
                    total_work_minutes: 0,
                    average_session_duration: 0.0,
                    sessions_today: 0,
                    work_minutes_today: 0,
                },
            })
        }
    }

    #[derive(Debug, Default)]
    struct FakeAuthClient;

    #[async_trait]
    impl AuthHttpClient for FakeAuthClient {
        async fn login(&self, request: LoginRequest) -> Result<AuthToken, InfraError> {
            Ok(AuthToken {
                access_token: format!("token-for-{}", request.username),
                token_type: "bearer".to_string(),
            })
        }

        async fn register(&self, registration: &Registration) -> Result<User, InfraError> {
            Ok(User {
                id: 1,
                email: registration.email.clone(),
                username: registration.username.clone(),
                is_active: true,
                created_at: timestamp(),
                updated_at: timestamp(),
            })
        }

        async fn me(&self, access_token: &str) -> Result<User, InfraError> {
            let username = access_token.trim_start_matches("token-for-").to_string();
            Ok(User {
                id: 1,
                email: format!("{username}@example.com"),
                username,
                is_active: true,
                created_at: timestamp(),
                updated_at: timestamp(),
            })
        }
    }

    struct TempWorkspace {
        path: PathBuf,
        backend: Arc<FakeBackend>,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "pomotask-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp workspace");
            Self {
                path,
                backend: Arc::new(FakeBackend::default()),
            }
        }

        fn app_state(&self) -> AppState {
            AppState::with_services(
                self.path.clone(),
                Arc::new(InMemoryTokenStore::default()),
                Arc::new(FakeAuthClient),
                Arc::clone(&self.backend) as Arc<dyn BackendApi>,
            )
            .expect("initialize app state")
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    async fn logged_in(workspace: &TempWorkspace) -> AppState {
        let state = workspace.app_state();
        login_impl(&state, "alice".to_string(), "secret1".to_string())
            .await
            .expect("login");
        state
    }

    #[tokio::test]
    async fn task_commands_require_login() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        assert!(matches!(
            list_tasks_impl(&state, None).await,
            Err(InfraError::Unauthenticated)
        ));
        assert!(matches!(
            dashboard_stats_impl(&state).await,
            Err(InfraError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn create_task_rejects_empty_title_before_any_request() {
        let workspace = TempWorkspace::new();
        let state = logged_in(&workspace).await;
        let result = create_task_impl(
            &state,
            TaskInput {
                title: Some("   ".to_string()),
                ..TaskInput::default()
            },
        )
        .await;
        assert!(matches!(result, Err(InfraError::InvalidInput(_))));
        assert_eq!(workspace.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_update_list_and_delete_tasks() {
        let workspace = TempWorkspace::new();
        let state = logged_in(&workspace).await;

        let created = create_task_impl(
            &state,
            TaskInput {
                title: Some(" Write report ".to_string()),
                description: Some("  ".to_string()),
                priority: Some("HIGH".to_string()),
                due_date: Some("2026-03-01".to_string()),
                ..TaskInput::default()
            },
        )
        .await
        .expect("create task");
        assert_eq!(created.title, "Write report");
        assert_eq!(created.description, None);
        assert_eq!(created.priority, TaskPriority::High);
        assert_eq!(
            created.due_date.map(|due| due.date()),
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );

        let updated = update_task_impl(
            &state,
            created.id,
            TaskInput {
                status: Some("in-progress".to_string()),
                ..TaskInput::default()
            },
        )
        .await
        .expect("update task");
        assert_eq!(updated.status, TaskStatus::InProgress);

        let in_progress = list_tasks_impl(&state, Some("in_progress".to_string()))
            .await
            .expect("list tasks");
        assert_eq!(in_progress.len(), 1);
        assert!(list_tasks_impl(&state, Some("done".to_string()))
            .await
            .expect("list done")
            .is_empty());

        assert!(delete_task_impl(&state, created.id).await.expect("delete"));
        assert!(list_tasks_impl(&state, None).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let workspace = TempWorkspace::new();
        let state = logged_in(&workspace).await;
        assert!(matches!(
            update_task_impl(&state, 1, TaskInput::default()).await,
            Err(InfraError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn unknown_status_filter_is_rejected() {
        let workspace = TempWorkspace::new();
        let state = logged_in(&workspace).await;
        assert!(matches!(
            list_tasks_impl(&state, Some("archived".to_string())).await,
            Err(InfraError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn login_whoami_and_logout_flow() {
        let workspace = TempWorkspace::new();
        let state = logged_in(&workspace).await;
        let user = whoami_impl(&state).await.expect("whoami");
        assert_eq!(user.username, "alice");

        assert!(logout_impl(&state).expect("logout").logged_out);
        assert!(!logout_impl(&state).expect("second logout").logged_out);
        assert!(matches!(
            whoami_impl(&state).await,
            Err(InfraError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn timer_status_defaults_to_idle() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let status = timer_status_impl(&state).expect("status");
        assert!(!status.has_active_timer);
        assert_eq!(status.remaining, "25:00");
        assert_eq!(status.session_kind, SessionKind::Work);
    }

    #[tokio::test]
    async fn focus_session_persists_and_timer_stop_flushes() {
        let workspace = TempWorkspace::new();
        let state = logged_in(&workspace).await;
        let task = create_task_impl(
            &state,
            TaskInput {
                title: Some("Deep work".to_string()),
                ..TaskInput::default()
            },
        )
        .await
        .expect("create task");

        let (sender, receiver) = mpsc::channel(4);
        sender.send(FocusCommand::Quit).await.expect("queue quit");
        let mut events = Vec::new();
        let last = focus_impl(&state, Some(task.id), None, receiver, &mut |event| {
            events.push(event)
        })
        .await
        .expect("focus");
        assert_eq!(last.task_title.as_deref(), Some("Deep work"));
        assert!(matches!(events.first(), Some(FocusEvent::Status(snapshot)) if snapshot.is_running));

        let status = timer_status_impl(&state).expect("status");
        assert!(status.has_active_timer);
        assert_eq!(status.task_id, Some(task.id));

        // Pretend a minute went by before the process exited.
        let snapshots = state.snapshots();
        let mut persisted = snapshots.load().expect("load").expect("snapshot");
        persisted.state.elapsed_seconds = 61;
        persisted.state.remaining_seconds -= 61;
        snapshots
            .save(&persisted.state, persisted.saved_at)
            .expect("rewrite snapshot");

        let stopped = timer_stop_impl(&state).await.expect("stop");
        assert!(!stopped.has_active_timer);
        assert!(snapshots.load().expect("load").is_none());

        let sessions = list_sessions_impl(&state, Some(task.id))
            .await
            .expect("sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].actual_duration_minutes, Some(2));
        assert!(sessions[0].is_in_flight());
    }

    #[tokio::test]
    async fn focus_rejects_second_start_while_active() {
        let workspace = TempWorkspace::new();
        let state = logged_in(&workspace).await;
        let snapshots = state.snapshots();
        snapshots
            .save(
                &SessionState {
                    active_task_id: Some(9),
                    active_task_title: Some("Existing".to_string()),
                    remaining_seconds: 600,
                    elapsed_seconds: 900,
                    ..SessionState::idle()
                },
                Utc::now(),
            )
            .expect("seed snapshot");

        let (_sender, receiver) = mpsc::channel(1);
        let result = focus_impl(
            &state,
            Some(9),
            Some("Existing".to_string()),
            receiver,
            &mut |_| {},
        )
        .await;
        assert!(matches!(result, Err(InfraError::Session(_))));
    }

    #[test]
    fn due_dates_accept_date_or_datetime() {
        assert_eq!(
            parse_due_date("2026-02-16T09:00:00", "due").expect("datetime"),
            timestamp()
        );
        assert_eq!(
            parse_due_date("2026-02-16T09:00", "due").expect("short datetime"),
            timestamp()
        );
        assert!(parse_due_date("2026-02-16", "due").is_ok());
        assert!(parse_due_date("16/02/2026", "due").is_err());
    }
}
