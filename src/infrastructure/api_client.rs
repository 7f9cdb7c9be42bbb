use crate::domain::models::{
    CreateSessionRequest, DashboardStats, RemoteSession, Task, TaskDraft, TaskPatch, TaskStatus,
    UpdateSessionRequest,
};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

const SESSIONS: &str = "sessions";
const TASKS: &str = "tasks";

#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create_session(
        &self,
        access_token: &str,
        request: &CreateSessionRequest,
    ) -> Result<RemoteSession, InfraError>;

    async fn start_session(
        &self,
        access_token: &str,
        session_id: i64,
    ) -> Result<RemoteSession, InfraError>;

    async fn update_session(
        &self,
        access_token: &str,
        session_id: i64,
        request: &UpdateSessionRequest,
    ) -> Result<RemoteSession, InfraError>;

    async fn complete_session(
        &self,
        access_token: &str,
        session_id: i64,
    ) -> Result<RemoteSession, InfraError>;

    async fn list_sessions(
        &self,
        access_token: &str,
        task_id: Option<i64>,
    ) -> Result<Vec<RemoteSession>, InfraError>;
}

#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_tasks(
        &self,
        access_token: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, InfraError>;

    async fn get_task(&self, access_token: &str, task_id: i64) -> Result<Task, InfraError>;

    async fn create_task(&self, access_token: &str, draft: &TaskDraft) -> Result<Task, InfraError>;

    async fn update_task(
        &self,
        access_token: &str,
        task_id: i64,
        patch: &TaskPatch,
    ) -> Result<Task, InfraError>;

    async fn delete_task(&self, access_token: &str, task_id: i64) -> Result<(), InfraError>;
}

#[async_trait]
pub trait StatsApi: Send + Sync {
    async fn dashboard_stats(&self, access_token: &str) -> Result<DashboardStats, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestApiClient {
    client: Client,
    base_url: Url,
}

impl ReqwestApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Remote(format!("failed building http client: {error}")))?;
        Ok(Self { client, base_url })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidInput(format!("{field} must not be empty")));
        }
        Ok(())
    }

    /// Collection endpoints keep a trailing slash to match the server routes.
    pub(crate) fn collection_endpoint(&self, collection: &str) -> Result<Url, InfraError> {
        self.endpoint(&[collection, ""])
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("api base URL cannot be a base".to_string())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn send_json<T>(&self, request: RequestBuilder, action: &str) -> Result<T, InfraError>
    where
        T: DeserializeOwned,
    {
        let body = self.send(request, action).await?;
        serde_json::from_str(&body).map_err(|error| {
            InfraError::Remote(format!("invalid {action} payload: {error}; body={body}"))
        })
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<String, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Remote(format!("failed reading {action} response: {error}")))?;

        if !status.is_success() {
            return Err(http_error(status, action, &body));
        }
        Ok(body)
    }
}

pub(crate) fn http_error(status: StatusCode, action: &str, body: &str) -> InfraError {
    if status == StatusCode::UNAUTHORIZED {
        return InfraError::Unauthenticated;
    }
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .and_then(serde_json::Value::as_str)
                .map(ToOwned::to_owned)
        });
    let message = match detail {
        Some(detail) => format!("{action} failed: http {}; {detail}", status.as_u16()),
        None if body.trim().is_empty() => format!("{action} failed: http {}", status.as_u16()),
        None => format!("{action} failed: http {}; body={body}", status.as_u16()),
    };
    InfraError::Remote(message)
}

#[async_trait]
impl SessionApi for ReqwestApiClient {
    async fn create_session(
        &self,
        access_token: &str,
        request: &CreateSessionRequest,
    ) -> Result<RemoteSession, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        request.validate().map_err(InfraError::InvalidInput)?;

        let endpoint = self.collection_endpoint(SESSIONS)?;
        self.send_json(
            self.client.post(endpoint).bearer_auth(access_token).json(request),
            "creating session",
        )
        .await
    }

    async fn start_session(
        &self,
        access_token: &str,
        session_id: i64,
    ) -> Result<RemoteSession, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&[SESSIONS, &session_id.to_string(), "start"])?;
        self.send_json(
            self.client.post(endpoint).bearer_auth(access_token),
            "starting session",
        )
        .await
    }

    async fn update_session(
        &self,
        access_token: &str,
        session_id: i64,
        request: &UpdateSessionRequest,
    ) -> Result<RemoteSession, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&[SESSIONS, &session_id.to_string()])?;
        self.send_json(
            self.client.put(endpoint).bearer_auth(access_token).json(request),
            "updating session",
        )
        .await
    }

    async fn complete_session(
        &self,
        access_token: &str,
        session_id: i64,
    ) -> Result<RemoteSession, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&[SESSIONS, &session_id.to_string(), "complete"])?;
        self.send_json(
            self.client.post(endpoint).bearer_auth(access_token),
            "completing session",
        )
        .await
    }

    async fn list_sessions(
        &self,
        access_token: &str,
        task_id: Option<i64>,
    ) -> Result<Vec<RemoteSession>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.collection_endpoint(SESSIONS)?;
        let mut request = self.client.get(endpoint).bearer_auth(access_token);
        if let Some(task_id) = task_id {
            request = request.query(&[("task_id", task_id)]);
        }
        self.send_json(request, "listing sessions").await
    }
}

#[async_trait]
impl TaskApi for ReqwestApiClient {
    async fn list_tasks(
        &self,
        access_token: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.collection_endpoint(TASKS)?;
        let mut request = self.client.get(endpoint).bearer_auth(access_token);
        if let Some(status) = status {
            request = request.query(&[("status_filter", status.as_str())]);
        }
        self.send_json(request, "listing tasks").await
    }

    async fn get_task(&self, access_token: &str, task_id: i64) -> Result<Task, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&[TASKS, &task_id.to_string()])?;
        self.send_json(
            self.client.get(endpoint).bearer_auth(access_token),
            "reading task",
        )
        .await
    }

    async fn create_task(&self, access_token: &str, draft: &TaskDraft) -> Result<Task, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        draft.validate().map_err(InfraError::InvalidInput)?;

        let endpoint = self.collection_endpoint(TASKS)?;
        self.send_json(
            self.client.post(endpoint).bearer_auth(access_token).json(draft),
            "creating task",
        )
        .await
    }

    async fn update_task(
        &self,
        access_token: &str,
        task_id: i64,
        patch: &TaskPatch,
    ) -> Result<Task, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        patch.validate().map_err(InfraError::InvalidInput)?;

        let endpoint = self.endpoint(&[TASKS, &task_id.to_string()])?;
        self.send_json(
            self.client.put(endpoint).bearer_auth(access_token).json(patch),
            "updating task",
        )
        .await
    }

    async fn delete_task(&self, access_token: &str, task_id: i64) -> Result<(), InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&[TASKS, &task_id.to_string()])?;
        self.send(
            self.client.delete(endpoint).bearer_auth(access_token),
            "deleting task",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StatsApi for ReqwestApiClient {
    async fn dashboard_stats(&self, access_token: &str) -> Result<DashboardStats, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let endpoint = self.endpoint(&["stats", "dashboard"])?;
        self.send_json(
            self.client.get(endpoint).bearer_auth(access_token),
            "reading dashboard stats",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SessionKind;
    use crate::infrastructure::config::parse_base_url;

    fn client() -> ReqwestApiClient {
        let base = parse_base_url("http://localhost:8000/api/v1").expect("base url");
        ReqwestApiClient::new(base, Duration::from_secs(1)).expect("client")
    }

    #[test]
    fn endpoints_extend_the_base_path() {
        let client = client();
        assert_eq!(
            client.collection_endpoint(SESSIONS).expect("collection").as_str(),
            "http://localhost:8000/api/v1/sessions/"
        );
        assert_eq!(
            client
                .endpoint(&[SESSIONS, "42", "complete"])
                .expect("member")
                .as_str(),
            "http://localhost:8000/api/v1/sessions/42/complete"
        );
    }

    #[test]
    fn unauthorized_status_maps_to_unauthenticated() {
        let error = http_error(StatusCode::UNAUTHORIZED, "listing tasks", "");
        assert!(matches!(error, InfraError::Unauthenticated));
    }

    #[test]
    fn server_detail_is_surfaced() {
        let error = http_error(
            StatusCode::BAD_REQUEST,
            "starting session",
            r#"{"detail":"Session already started"}"#,
        );
        match error {
            InfraError::Remote(message) => {
                assert!(message.contains("http 400"));
                assert!(message.contains("Session already started"));
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_token_is_rejected_before_any_request() {
        let client = client();
        let result = client
            .create_session(
                " ",
                &CreateSessionRequest {
                    task_id: 1,
                    duration_minutes: 25,
                    session_type: SessionKind::Work,
                },
            )
            .await;
        assert!(matches!(result, Err(InfraError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_before_any_request() {
        let client = client();
        let result = client.create_task("token", &TaskDraft::new("")).await;
        assert!(matches!(result, Err(InfraError::InvalidInput(_))));
    }
}
