//! Session capability trait and the in-process implementation

use std::fmt;
use tokio::sync::watch;

/// Auth provider user id
pub type UserId = String;

/// Capability the engine consumes from the authentication provider.
///
/// Implementations push session changes through a watch channel; the
/// engine tears down all service scopes when the session ends (see
/// `EngineState::spawn_session_guard`).
pub trait AuthSession: Send + Sync + fmt::Debug {
    /// Currently signed-in user, if any.
    fn current_user(&self) -> Option<UserId>;

    /// Watch for session changes. The channel holds the current user.
    fn watch_session(&self) -> watch::Receiver<Option<UserId>>;

    /// End the session. Observers see `None` on the watch channel.
    fn sign_out(&self);
}

/// In-process session, used by tests and demos.
#[derive(Debug)]
pub struct LocalSession {
    tx: watch::Sender<Option<UserId>>,
}

impl LocalSession {
    pub fn signed_in(user_id: &str) -> Self {
        let (tx, _) = watch::channel(Some(user_id.to_string()));
        Self { tx }
    }

    pub fn signed_out() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn sign_in(&self, user_id: &str) {
        let _ = self.tx.send(Some(user_id.to_string()));
    }
}

impl AuthSession for LocalSession {
    fn current_user(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn watch_session(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }

    fn sign_out(&self) {
        let _ = self.tx.send(None);
    }
}
