//! OAuth authorization handshake
//!
//! `begin` stores who started the flow together with a PKCE verifier and
//! returns the opaque `state` and code challenge to put in the provider's
//! authorize URL. When the provider redirects back, `complete` consumes the
//! state exactly once; the token exchange itself belongs to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::oauth_state::{OAuthStateStore, PkcePair};
use crate::types::PlatformName;

/// What is remembered between redirect and callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    pub user_id: String,
    pub platform: PlatformName,
    pub code_verifier: String,
    pub redirect_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for the provider's authorize URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

#[derive(Clone)]
pub struct AuthorizationFlow {
    states: OAuthStateStore,
}

impl AuthorizationFlow {
    pub fn new(states: OAuthStateStore) -> Self {
        Self { states }
    }

    pub fn states(&self) -> &OAuthStateStore {
        &self.states
    }

    pub async fn begin(
        &self,
        user_id: &str,
        platform: PlatformName,
        redirect_uri: Option<String>,
    ) -> Result<AuthorizationRequest> {
        let pkce = PkcePair::generate();
        let payload = AuthorizationState {
            user_id: user_id.to_string(),
            platform,
            code_verifier: pkce.verifier,
            redirect_uri,
            created_at: Utc::now(),
        };

        let state = self.states.create(&payload).await?;
        info!("Started {} authorization for user {}", platform, user_id);

        Ok(AuthorizationRequest {
            state,
            code_challenge: pkce.challenge,
            code_challenge_method: PkcePair::METHOD.to_string(),
        })
    }

    pub async fn peek(&self, state: &str) -> Result<Option<AuthorizationState>> {
        self.states.peek(state).await
    }

    /// Consume the state of a finished redirect
    ///
    /// # Errors
    ///
    /// `StateExpiredOrMissing` when the state is unknown, expired, or was
    /// already used.
    pub async fn complete(&self, state: &str) -> Result<AuthorizationState> {
        let authorization: AuthorizationState = self.states.consume_required(state).await?;
        info!(
            "Completed {} authorization for user {}",
            authorization.platform, authorization.user_id
        );
        Ok(authorization)
    }

    pub async fn cancel(&self, state: &str) -> Result<bool> {
        let cancelled = self.states.cancel(state).await?;
        debug!("Cancelled authorization state (existed: {})", cancelled);
        Ok(cancelled)
    }
}
