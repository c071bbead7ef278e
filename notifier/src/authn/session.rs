//! Session manager for user authentication

use std::sync::Arc;

use openapi_client::models::{LoginRequest, LoginResponse};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::authn::access_token::AccessToken;
use crate::errors::UpdateError;
use crate::http::auth::AuthApi;
use crate::storage::kv::{KeyValueStore, ACCESS_TOKEN_KEY, SESSION_KEY, USER_KEY};

/// Profile of the logged in user, as stored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub usuario: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub departamento: serde_json::Value,
    #[serde(default)]
    pub rol: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_email_verified: bool,
}

impl From<&LoginResponse> for UserProfile {
    fn from(response: &LoginResponse) -> Self {
        let user = &response.user;
        Self {
            id: user.id.clone(),
            usuario: user.usuario.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            departamento: user.departamento.clone(),
            rol: user.rol.clone(),
            is_active: user.is_active,
            is_email_verified: user.is_email_verified,
        }
    }
}

/// Result of a login attempt. Rejections are values, not errors, so callers
/// can render them inline.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Success(UserProfile),
    Failure { message: String },
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginOutcome::Success(_))
    }
}

/// Session manager
pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn KeyValueStore>,
    user: RwLock<Option<UserProfile>>,
}

impl SessionManager {
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            api,
            store,
            user: RwLock::new(None),
        }
    }

    /// Load a previously saved session. Unreadable profiles are discarded.
    pub async fn restore(&self) -> Result<Option<UserProfile>, UpdateError> {
        let saved_user = self.store.get(USER_KEY).await?;
        let saved_token = self.store.get(ACCESS_TOKEN_KEY).await?;

        let (Some(saved_user), Some(_)) = (saved_user, saved_token) else {
            return Ok(None);
        };

        match serde_json::from_str::<UserProfile>(&saved_user) {
            Ok(profile) => {
                info!("Restored session for {}", profile.usuario);
                *self.user.write().await = Some(profile.clone());
                Ok(Some(profile))
            }
            Err(e) => {
                warn!("Failed to parse saved user, clearing session: {}", e);
                self.store.remove(USER_KEY).await?;
                self.store.remove(ACCESS_TOKEN_KEY).await?;
                Ok(None)
            }
        }
    }

    /// Log in and persist the returned profile, token and session
    pub async fn login(&self, usuario: &str, password: SecretString) -> LoginOutcome {
        let request = LoginRequest {
            usuario: usuario.to_string(),
            password: password.expose_secret().to_string(),
        };

        let response = match self.api.login(&request).await {
            Ok(response) => response,
            Err(UpdateError::AuthError(message)) => {
                warn!("Login rejected for {}: {}", usuario, message);
                return LoginOutcome::Failure { message };
            }
            Err(e) => {
                error!("Login failed: {}", e);
                return LoginOutcome::Failure {
                    message: e.to_string(),
                };
            }
        };

        let profile = UserProfile::from(&response);
        if let Err(e) = self.save(&profile, &response).await {
            error!("Failed to save session: {}", e);
            self.discard_partial_session().await;
            return LoginOutcome::Failure {
                message: e.to_string(),
            };
        }

        info!("Logged in as {}", profile.usuario);
        *self.user.write().await = Some(profile.clone());
        LoginOutcome::Success(profile)
    }

    async fn save(&self, profile: &UserProfile, response: &LoginResponse) -> Result<(), UpdateError> {
        self.store
            .set(USER_KEY, &serde_json::to_string(profile)?)
            .await?;
        self.store
            .set(ACCESS_TOKEN_KEY, &response.access_token)
            .await?;
        self.store
            .set(SESSION_KEY, &serde_json::to_string(&response.session)?)
            .await?;
        Ok(())
    }

    async fn discard_partial_session(&self) {
        for key in [USER_KEY, ACCESS_TOKEN_KEY, SESSION_KEY] {
            if let Err(e) = self.store.remove(key).await {
                warn!("Failed to remove {} after an incomplete login: {}", key, e);
            }
        }
    }

    /// Forget the session locally
    pub async fn logout(&self) -> Result<(), UpdateError> {
        self.store.remove(USER_KEY).await?;
        self.store.remove(ACCESS_TOKEN_KEY).await?;
        self.store.remove(SESSION_KEY).await?;
        *self.user.write().await = None;
        info!("Logged out");
        Ok(())
    }

    /// Stored access token, if any
    pub async fn token(&self) -> Result<Option<AccessToken>, UpdateError> {
        Ok(self
            .store
            .get(ACCESS_TOKEN_KEY)
            .await?
            .map(AccessToken::from_raw))
    }

    pub async fn current_user(&self) -> Option<UserProfile> {
        self.user.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.user.read().await.is_some()
    }
}
