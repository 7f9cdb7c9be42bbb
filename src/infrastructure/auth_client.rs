use crate::domain::models::{AuthToken, Registration, User};
use crate::infrastructure::api_client::http_error;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[async_trait]
pub trait AuthHttpClient: Send + Sync {
    async fn login(&self, request: LoginRequest) -> Result<AuthToken, InfraError>;

    async fn register(&self, registration: &Registration) -> Result<User, InfraError>;

    async fn me(&self, access_token: &str) -> Result<User, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestAuthClient {
    client: Client,
    base_url: Url,
}

#[derive(Debug, serde::Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    token_type: Option<String>,
}

impl ReqwestAuthClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Remote(format!("failed building http client: {error}")))?;
        Ok(Self { client, base_url })
    }

    fn auth_endpoint(&self, name: &str) -> Result<Url, InfraError> {
        self.base_url
            .join(&format!("auth/{name}"))
            .map_err(|error| InfraError::InvalidConfig(format!("invalid auth endpoint: {error}")))
    }

    async fn send_json<T>(&self, request: RequestBuilder, action: &str) -> Result<T, InfraError>
    where
        T: DeserializeOwned,
    {
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
        serde_json::from_str(&body).map_err(|error| {
            InfraError::Remote(format!("invalid {action} payload: {error}; body={body}"))
        })
    }
}

#[async_trait]
impl AuthHttpClient for ReqwestAuthClient {
    async fn login(&self, request: LoginRequest) -> Result<AuthToken, InfraError> {
        let endpoint = self.auth_endpoint("login")?;
        let payload: TokenPayload = self
            .send_json(
                self.client.post(endpoint).form(&[
                    ("username", request.username.as_str()),
                    ("password", request.password.as_str()),
                ]),
                "logging in",
            )
            .await?;

        let token = AuthToken {
            access_token: payload.access_token.unwrap_or_default(),
            token_type: payload.token_type.unwrap_or_else(|| "bearer".to_string()),
        };
        if !token.is_usable() {
            return Err(InfraError::Remote(
                "login response did not include an access token".to_string(),
            ));
        }
        Ok(token)
    }

    async fn register(&self, registration: &Registration) -> Result<User, InfraError> {
        let endpoint = self.auth_endpoint("register")?;
        self.send_json(self.client.post(endpoint).json(registration), "registering")
            .await
    }

    async fn me(&self, access_token: &str) -> Result<User, InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::Unauthenticated);
        }
        let endpoint = self.auth_endpoint("me")?;
        self.send_json(
            self.client.get(endpoint).bearer_auth(access_token),
            "reading current user",
        )
        .await
    }
}
