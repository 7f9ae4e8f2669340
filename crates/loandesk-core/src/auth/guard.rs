use std::sync::Mutex;

use tracing::{debug, info};

use super::session::Role;
use crate::api::ApiClient;

/// Progress of a single auth check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardState {
    #[default]
    Unknown,
    Checking,
    Authenticated,
    Unauthenticated,
}

/// Decides whether the current session may view a page.
///
/// The guard only answers the question; redirecting to the login page on
/// `false` is up to the caller.
pub struct AuthGuard {
    client: ApiClient,
    state: Mutex<GuardState>,
}

impl AuthGuard {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            state: Mutex::new(GuardState::Unknown),
        }
    }

    pub fn state(&self) -> GuardState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: GuardState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Check the session, optionally requiring a specific role.
    ///
    /// Never fails: every error ends as `false`.
    pub async fn check_auth(&self, required_role: Option<&Role>) -> bool {
        self.set_state(GuardState::Checking);

        let authenticated = self.evaluate(required_role).await;

        self.set_state(if authenticated {
            GuardState::Authenticated
        } else {
            GuardState::Unauthenticated
        });
        authenticated
    }

    async fn evaluate(&self, required_role: Option<&Role>) -> bool {
        let Some(token) = self.client.store().access_token() else {
            debug!("No access token, attempting refresh");
            return self.client.refresher().refresh().await.is_some();
        };

        match self.client.current_user().await {
            Ok(user) => match required_role {
                Some(role) if !user.has_role(role) => {
                    info!(user_role = %user.role, required_role = %role, "User lacks required role");
                    false
                }
                _ => true,
            },
            Err(e) => {
                debug!(error = %e, "Who-am-i check failed, attempting refresh");
                self.client.refresher().refresh_after(&token).await.is_some()
            }
        }
    }
}
