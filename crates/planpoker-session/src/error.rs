//! Error types for the session layer.

use planpoker_protocol::LoginId;
use planpoker_store::StoreError;

/// Errors that can occur during login and logout.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A session exists for this login id and the caller presented a
    /// different, non-empty session id.
    #[error("session id does not match for {0}")]
    PreconditionFailed(LoginId),

    /// Concurrent logins for the same id kept creating or expiring the
    /// session underneath this one.
    #[error("login for {0} kept losing to concurrent logins")]
    Contended(LoginId),

    /// The shared store failed. `op` names the session operation that
    /// was running.
    #[error("{op} failed for {login_id}: {source}")]
    Store {
        op: &'static str,
        login_id: LoginId,
        #[source]
        source: StoreError,
    },
}

impl SessionError {
    pub(crate) fn store(op: &'static str, login_id: &LoginId) -> impl FnOnce(StoreError) -> Self {
        let login_id = login_id.clone();
        move |source| Self::Store {
            op,
            login_id,
            source,
        }
    }
}
