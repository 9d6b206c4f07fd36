use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UserProfile;

/// Profile file name in the cache directory
const PROFILE_FILE: &str = "current_user.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredProfile {
    pub user: UserProfile,
    pub stored_at: DateTime<Utc>,
}

/// Session-scoped copy of the signed-in user, used to paint immediately
/// while the authoritative profile is fetched.
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn load(&self) -> Result<Option<StoredProfile>> {
        let path = self.profile_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .context("Failed to read stored profile")?;
        let stored = serde_json::from_str(&contents)
            .context("Failed to parse stored profile")?;
        Ok(Some(stored))
    }

    pub fn save(&self, user: &UserProfile) -> Result<()> {
        let path = self.profile_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredProfile {
            user: user.clone(),
            stored_at: Utc::now(),
        };
        let contents = serde_json::to_string_pretty(&stored)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let path = self.profile_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn profile_path(&self) -> PathBuf {
        self.dir.join(PROFILE_FILE)
    }
}
