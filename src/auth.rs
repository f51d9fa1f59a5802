use anyhow::{Context, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const LOGIN_ATTEMPT_LIMIT: u32 = 5;
pub const LOGIN_ATTEMPT_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted,
    BadPassword,
    RateLimited,
}

struct LoginAttempt {
    count: u32,
    window_start: Instant,
}

struct IdSets {
    admins: HashSet<i64>,
    users: HashSet<i64>,
}

/// Admin/user identity sets persisted as JSON integer arrays, plus the
/// in-memory login attempt counters. Set mutations take the mutex around the
/// whole read-modify-persist sequence; attempt counters are memory-only and
/// lost on restart.
pub struct AuthStore {
    admins_path: PathBuf,
    users_path: PathBuf,
    sets: Mutex<IdSets>,
    attempts: DashMap<i64, LoginAttempt>,
}

impl AuthStore {
    /// Load both ID lists. A missing file starts an empty set; an unreadable
    /// or corrupt file is logged and likewise starts empty (never fatal).
    pub fn load(admins_path: impl Into<PathBuf>, users_path: impl Into<PathBuf>) -> Self {
        let admins_path = admins_path.into();
        let users_path = users_path.into();

        Self {
            sets: Mutex::new(IdSets {
                admins: load_ids(&admins_path),
                users: load_ids(&users_path),
            }),
            admins_path,
            users_path,
            attempts: DashMap::new(),
        }
    }

    pub async fn is_admin(&self, id: i64) -> bool {
        self.sets.lock().await.admins.contains(&id)
    }

    pub async fn is_user(&self, id: i64) -> bool {
        self.sets.lock().await.users.contains(&id)
    }

    /// Member of either set; gates the approve/deny buttons.
    pub async fn is_authorized(&self, id: i64) -> bool {
        let sets = self.sets.lock().await;
        sets.admins.contains(&id) || sets.users.contains(&id)
    }

    pub async fn add_admin(&self, id: i64) -> Result<bool> {
        let mut sets = self.sets.lock().await;
        let added = sets.admins.insert(id);
        if added {
            save_ids(&self.admins_path, &sets.admins)?;
        }
        Ok(added)
    }

    pub async fn remove_admin(&self, id: i64) -> Result<bool> {
        let mut sets = self.sets.lock().await;
        let removed = sets.admins.remove(&id);
        if removed {
            save_ids(&self.admins_path, &sets.admins)?;
        }
        Ok(removed)
    }

    pub async fn add_user(&self, id: i64) -> Result<bool> {
        let mut sets = self.sets.lock().await;
        let added = sets.users.insert(id);
        if added {
            save_ids(&self.users_path, &sets.users)?;
        }
        Ok(added)
    }

    pub async fn remove_user(&self, id: i64) -> Result<bool> {
        let mut sets = self.sets.lock().await;
        let removed = sets.users.remove(&id);
        if removed {
            save_ids(&self.users_path, &sets.users)?;
        }
        Ok(removed)
    }

    pub async fn list_admins(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.sets.lock().await.admins.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn list_users(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.sets.lock().await.users.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Whether the identity is currently locked out. Applies the same window
    /// reset as `attempt_login`, so an expired window clears here too.
    pub fn is_rate_limited(&self, user_id: i64) -> bool {
        let Some(mut attempt) = self.attempts.get_mut(&user_id) else {
            return false;
        };
        let now = Instant::now();
        if now.duration_since(attempt.window_start) > LOGIN_ATTEMPT_WINDOW {
            attempt.count = 0;
            attempt.window_start = now;
        }
        attempt.count >= LOGIN_ATTEMPT_LIMIT
    }

    /// One login attempt against the stored credential hash. Five failures
    /// inside the five-minute window lock the identity out without comparing
    /// the secret; success clears the counter and grants admin.
    pub async fn attempt_login(
        &self,
        user_id: i64,
        supplied: &str,
        stored_hash: &str,
    ) -> LoginOutcome {
        let now = Instant::now();
        {
            let mut attempt = self.attempts.entry(user_id).or_insert(LoginAttempt {
                count: 0,
                window_start: now,
            });

            if now.duration_since(attempt.window_start) > LOGIN_ATTEMPT_WINDOW {
                attempt.count = 0;
                attempt.window_start = now;
            }

            if attempt.count >= LOGIN_ATTEMPT_LIMIT {
                return LoginOutcome::RateLimited;
            }
        }

        // Argon2 verification burns real CPU; run it on the blocking pool with
        // the attempt guard released so other updates keep flowing.
        let supplied = supplied.to_string();
        let stored_hash = stored_hash.to_string();
        let verified =
            match tokio::task::spawn_blocking(move || verify_password(&stored_hash, &supplied))
                .await
            {
                Ok(verified) => verified,
                Err(e) => {
                    tracing::error!(user_id, error = %e, "password verification task failed");
                    false
                }
            };

        if verified {
            self.attempts.remove(&user_id);
            if let Err(e) = self.add_admin(user_id).await {
                tracing::error!(user_id, error = %e, "failed to persist new admin");
            }
            LoginOutcome::Accepted
        } else {
            let mut attempt = self.attempts.entry(user_id).or_insert(LoginAttempt {
                count: 0,
                window_start: now,
            });
            attempt.count += 1;
            attempt.window_start = Instant::now();
            LoginOutcome::BadPassword
        }
    }

    #[cfg(test)]
    fn backdate_attempt(&self, user_id: i64, age: Duration) {
        if let Some(mut attempt) = self.attempts.get_mut(&user_id) {
            attempt.window_start = Instant::now() - age;
        }
    }
}

/// Constant-time verification of an Argon2 PHC credential hash. An invalid
/// stored hash verifies as a mismatch.
pub fn verify_password(stored_hash: &str, supplied: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::warn!("stored credential hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(supplied.as_bytes(), &parsed)
        .is_ok()
}

/// Argon2id PHC string with a fresh random salt, for /generatehash.
pub fn generate_password_hash(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

fn load_ids(path: &Path) -> HashSet<i64> {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e,
                    "corrupt ID list, starting empty");
                HashSet::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e,
                "failed to read ID list, starting empty");
            HashSet::new()
        }
    }
}

fn save_ids(path: &Path, ids: &HashSet<i64>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let mut sorted: Vec<i64> = ids.iter().copied().collect();
    sorted.sort_unstable();
    let text = serde_json::to_string(&sorted)?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
