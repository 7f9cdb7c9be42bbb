use crate::domain::models::{validate_credentials, AuthToken, Registration, User};
use crate::infrastructure::auth_client::{AuthHttpClient, LoginRequest};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::token_store::TokenStore;
use std::sync::Arc;

/// Token-presence query consulted by the session controller.
pub type TokenQuery = Arc<dyn Fn() -> Option<String> + Send + Sync>;

pub struct AuthManager<S, C>
where
    S: TokenStore + ?Sized,
    C: AuthHttpClient + ?Sized,
{
    token_store: Arc<S>,
    auth_client: Arc<C>,
}

impl<S, C> AuthManager<S, C>
where
    S: TokenStore + ?Sized + 'static,
    C: AuthHttpClient + ?Sized,
{
    pub fn new(token_store: Arc<S>, auth_client: Arc<C>) -> Self {
        Self {
            token_store,
            auth_client,
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthToken, InfraError> {
        validate_credentials(username, password).map_err(InfraError::InvalidInput)?;

        let token = self
            .auth_client
            .login(LoginRequest {
                username: username.trim().to_string(),
                password: password.to_string(),
            })
            .await?;
        self.token_store.save_token(&token)?;
        tracing::info!(username = username.trim(), "logged in");
        Ok(token)
    }

    /// Creates the account, then signs in with the same credentials.
    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<User, InfraError> {
        let registration = Registration {
            email: email.trim().to_string(),
            username: username.trim().to_string(),
            password: password.to_string(),
        };
        registration.validate().map_err(InfraError::InvalidInput)?;

        let user = self.auth_client.register(&registration).await?;
        self.login(&registration.username, &registration.password)
            .await?;
        Ok(user)
    }

    pub async fn current_user(&self) -> Result<User, InfraError> {
        let token = self.access_token()?.ok_or(InfraError::Unauthenticated)?;
        match self.auth_client.me(&token).await {
            Err(InfraError::Unauthenticated) => {
                // The server rejected the stored token; drop it so the next
                // command asks for a fresh login.
                self.token_store.delete_token()?;
                Err(InfraError::Unauthenticated)
            }
            other => other,
        }
    }

    pub fn logout(&self) -> Result<(), InfraError> {
        self.token_store.delete_token()?;
        tracing::info!("logged out");
        Ok(())
    }

    pub fn access_token(&self) -> Result<Option<String>, InfraError> {
        Ok(self
            .token_store
            .load_token()?
            .map(|token| token.access_token))
    }

    pub fn require_access_token(&self) -> Result<String, InfraError> {
        self.access_token()?.ok_or(InfraError::Unauthenticated)
    }

    /// Store read failures count as "no token".
    pub fn token_query(&self) -> TokenQuery {
        let token_store = Arc::clone(&self.token_store);
        Arc::new(move || match token_store.load_token() {
            Ok(token) => token.map(|token| token.access_token),
            Err(error) => {
                tracing::warn!(%error, "token lookup failed");
                None
            }
        })
    }
}
