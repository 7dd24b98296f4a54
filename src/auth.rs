use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use crate::{core::hosting::ContentStore, error::AppError};

/// Operator token, validated once against the hosting API and kept for the
/// lifetime of the process (or until sign-out).
#[derive(Default)]
pub struct Session {
    token: RwLock<Option<String>>,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    /// Validates `token` and makes it the session token. Returns the login
    /// of the token owner. A rejected token leaves the session as it was.
    pub async fn sign_in(&self, store: &dyn ContentStore, token: &str) -> Result<String, AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::Validation("Please provide a token.".to_string()));
        }

        let login = store.current_user(token).await.map_err(|error| {
            warn!("Failed to authorize: {}", error);
            AppError::Unauthorized
        })?;
        *self.write() = Some(token.to_string());
        info!("Signed in as {}", login);
        Ok(login)
    }

    pub fn sign_out(&self) {
        *self.write() = None;
        info!("Signed out");
    }

    pub fn is_signed_in(&self) -> bool {
        self.read().is_some()
    }

    /// Accepts a bearer token only when it is the validated session token.
    pub fn check_auth(&self, remote_key: &str) -> Result<(), AppError> {
        match self.read().as_deref() {
            Some(local_key) if local_key == remote_key.trim() => Ok(()),
            Some(_) => {
                warn!("Rejected a token that does not match the session");
                Err(AppError::Unauthorized)
            }
            None => {
                warn!("Rejected an admin call without a session");
                Err(AppError::Unauthorized)
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<String>> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<String>> {
        self.token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
