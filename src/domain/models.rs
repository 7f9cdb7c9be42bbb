use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const TASK_TITLE_MAX_CHARS: usize = 200;
pub const TASK_DESCRIPTION_MAX_CHARS: usize = 1000;
pub const SESSION_DURATION_MAX_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "todo" => Ok(Self::Todo),
            "in_progress" | "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(format!("unsupported task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unsupported task priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub due_date: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub pomodoro_sessions: Vec<RemoteSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDateTime>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            due_date: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_title(&self.title, "task.title")?;
        if let Some(description) = self.description.as_deref() {
            validate_description(description, "task.description")?;
        }
        Ok(())
    }
}

/// Partial update; unset fields are left untouched by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDateTime>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.due_date.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("task update must change at least one field".to_string());
        }
        if let Some(title) = self.title.as_deref() {
            validate_title(title, "task.title")?;
        }
        if let Some(description) = self.description.as_deref() {
            validate_description(description, "task.description")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Work,
    ShortBreak,
    LongBreak,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::ShortBreak => "short_break",
            Self::LongBreak => "long_break",
        }
    }

    pub fn is_break(self) -> bool {
        !matches!(self, Self::Work)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteSession {
    pub id: i64,
    pub task_id: i64,
    pub duration_minutes: u32,
    pub session_type: SessionKind,
    pub actual_duration_minutes: Option<u32>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl RemoteSession {
    pub fn is_in_flight(&self) -> bool {
        self.started_at.is_some() && self.completed_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateSessionRequest {
    pub task_id: i64,
    pub duration_minutes: u32,
    pub session_type: SessionKind,
}

impl CreateSessionRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.duration_minutes == 0 || self.duration_minutes > SESSION_DURATION_MAX_MINUTES {
            return Err(format!(
                "session.duration_minutes must be within 1..={SESSION_DURATION_MAX_MINUTES}"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateSessionRequest {
    pub actual_duration_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl AuthToken {
    pub fn is_usable(&self) -> bool {
        !self.access_token.trim().is_empty()
    }
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), String> {
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err("registration.email must be a valid address".to_string());
        }
        validate_credentials(&self.username, &self.password)
    }
}

pub fn validate_credentials(username: &str, password: &str) -> Result<(), String> {
    if username.trim().chars().count() < 3 {
        return Err("username must be at least 3 characters".to_string());
    }
    if password.chars().count() < 6 {
        return Err("password must be at least 6 characters".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStats {
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub in_progress_tasks: u32,
    pub todo_tasks: u32,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PomodoroStats {
    pub total_sessions: u32,
    pub completed_sessions: u32,
    pub total_work_minutes: u32,
    pub average_session_duration: f64,
    pub sessions_today: u32,
    pub work_minutes_today: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardStats {
    pub task_stats: TaskStats,
    pub pomodoro_stats: PomodoroStats,
}

fn validate_title(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    if value.chars().count() > TASK_TITLE_MAX_CHARS {
        return Err(format!(
            "{field_name} must be at most {TASK_TITLE_MAX_CHARS} characters"
        ));
    }
    Ok(())
}

fn validate_description(value: &str, field_name: &str) -> Result<(), String> {
    if value.chars().count() > TASK_DESCRIPTION_MAX_CHARS {
        return Err(format!(
            "{field_name} must be at most {TASK_DESCRIPTION_MAX_CHARS} characters"
        ));
    }
    Ok(())
}
