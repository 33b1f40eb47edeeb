//! Logged-in user identity, kept in a JSON file across restarts

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::DashboardError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub logged_in_at: DateTime<Utc>,
}

impl UserIdentity {
    /// Validate login input and mint a fresh identity
    pub fn login(name: &str, email: &str) -> Result<Self, DashboardError> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(DashboardError::InvalidLogin("name is required".to_string()));
        }
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(DashboardError::InvalidLogin(format!("invalid email '{}'", email))),
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            logged_in_at: Utc::now(),
        })
    }
}

/// File-backed identity store; a store without a path keeps nothing
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    path: Option<PathBuf>,
}

impl SessionStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Previously saved identity. A corrupt file is ignored.
    pub fn load(&self) -> Option<UserIdentity> {
        let path = self.path.as_ref()?;
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("Ignoring unreadable session file {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, user: &UserIdentity) -> Result<(), DashboardError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(user).map_err(|e| DashboardError::Session(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| DashboardError::Session(format!("{}: {}", path.display(), e)))?;
        info!("Saved session for {} to {}", user.email, path.display());
        Ok(())
    }

    pub fn clear(&self) -> Result<(), DashboardError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DashboardError::Session(format!("{}: {}", path.display(), e))),
        }
    }
}
