//! The session manager: issues, renews, and drops login sessions.
//!
//! All state lives in the shared store under `planpoker_login:{login_id}`,
//! holding the session id as a string with a sliding TTL. The manager
//! itself holds nothing but a store handle and its config, so any number
//! of server nodes can serve logins for the same user.
//!
//! ```text
//! login(id, None)        ──→ no key?  create (fresh secret, TTL)
//! login(id, None | same) ──→ key?     renew  (reset TTL, same secret)
//! login(id, other)       ──→ key?     PreconditionFailed
//! logout(id)             ──→ delete (missing key is fine)
//! ```

use std::sync::Arc;

use planpoker_protocol::{LoginId, Session};
use planpoker_store::StateStore;
use rand::Rng;

use crate::{SessionConfig, SessionError};

const KEY_PREFIX: &str = "planpoker_login";

/// How many times `login` re-reads after losing a creation race before
/// giving up.
const MAX_LOGIN_ATTEMPTS: usize = 3;

fn session_key(login_id: &LoginId) -> String {
    format!("{KEY_PREFIX}:{login_id}")
}

/// Issues and renews login sessions stored in a [`StateStore`].
pub struct SessionManager<S: StateStore> {
    store: Arc<S>,
    config: SessionConfig,
}

impl<S: StateStore> SessionManager<S> {
    pub fn new(store: Arc<S>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    /// Logs `login_id` in.
    ///
    /// - No session yet: creates one with a fresh session id.
    /// - Session exists and `session_id` is `None`, empty, or equal to the
    ///   stored one: renews the TTL and returns the stored session.
    /// - Session exists and `session_id` is something else: fails.
    ///
    /// # Errors
    /// - [`SessionError::PreconditionFailed`] on a session id mismatch
    /// - [`SessionError::Contended`] if concurrent logins for the same id
    ///   kept racing this one
    /// - [`SessionError::Store`] if the store fails
    pub async fn login(
        &self,
        login_id: &LoginId,
        session_id: Option<&str>,
    ) -> Result<Session, SessionError> {
        let key = session_key(login_id);
        let presented = session_id.filter(|s| !s.is_empty());

        for _ in 0..MAX_LOGIN_ATTEMPTS {
            let Some(stored) = self.get(login_id).await? else {
                let token = generate_token();
                let created = self
                    .store
                    .set_if_absent(&key, &token, self.config.ttl)
                    .await
                    .map_err(SessionError::store("login", login_id))?;
                if created {
                    tracing::info!(%login_id, "session created");
                    return Ok(Session {
                        login_id: login_id.clone(),
                        session_id: token,
                    });
                }
                // Someone else created it between our read and write.
                continue;
            };

            if presented.is_some_and(|p| p != stored.session_id) {
                tracing::info!(%login_id, "login rejected: session id mismatch");
                return Err(SessionError::PreconditionFailed(login_id.clone()));
            }

            let renewed = self
                .store
                .expire(&key, self.config.ttl)
                .await
                .map_err(SessionError::store("login", login_id))?;
            if !renewed {
                // Expired between the read and the renewal; start over.
                continue;
            }

            tracing::debug!(%login_id, "session renewed");
            return Ok(stored);
        }

        Err(SessionError::Contended(login_id.clone()))
    }

    /// Drops the session for `login_id`. Dropping a session that does
    /// not exist is not an error.
    pub async fn logout(&self, login_id: &LoginId) -> Result<(), SessionError> {
        let existed = self
            .store
            .delete(&session_key(login_id))
            .await
            .map_err(SessionError::store("logout", login_id))?;
        tracing::info!(%login_id, existed, "session dropped");
        Ok(())
    }

    /// Looks up the current session for `login_id` without renewing it.
    pub async fn get(&self, login_id: &LoginId) -> Result<Option<Session>, SessionError> {
        let stored = self
            .store
            .get(&session_key(login_id))
            .await
            .map_err(SessionError::store("get", login_id))?;
        Ok(stored.map(|session_id| Session {
            login_id: login_id.clone(),
            session_id,
        }))
    }
}

/// Generates a random 32-character hex string (128 bits of entropy).
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
