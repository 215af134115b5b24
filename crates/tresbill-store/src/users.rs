//! Users, tier overrides, and the login throttle.

use std::collections::BTreeMap;

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use rand_core::OsRng;
use sqlx::{FromRow, Row};

use tresbill_core::{classify_username, Tier};

use crate::error::{Result, StoreError};
use crate::{now_iso, parse_iso, to_iso, Store};

/// A portal user.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    /// Row id.
    pub id: i64,
    /// Login name; also the cluster username for billing.
    pub username: String,
    /// Argon2 password hash.
    pub password_hash: String,
    /// `user` or `admin`.
    pub role: String,
    /// Creation timestamp.
    pub created_at: String,
}

impl User {
    /// Whether the user holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

impl Store {
    /// Create a user with an argon2-hashed password.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the username is taken.
    pub async fn create_user(&self, username: &str, password: &str, role: &str) -> Result<i64> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?
            .to_string();

        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, role, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(username)
        .bind(&hash)
        .bind(role)
        .bind(now_iso())
        .execute(self.pool())
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(e) => {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return Err(StoreError::Conflict(format!(
                            "username already exists: {username}"
                        )));
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Create the bootstrap admin if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup or insert fails.
    pub async fn ensure_admin(&self, username: &str, password: &str) -> Result<()> {
        if self.get_user(username).await?.is_none() {
            self.create_user(username, password, "admin").await?;
            tracing::info!(username = %username, "bootstrap admin created");
        }
        Ok(())
    }

    /// Look up a user by username.
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup fails.
    pub async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?;
        Ok(user)
    }

    /// Verify a password, returning the user on success.
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup fails; a wrong password or
    /// unknown user is `Ok(None)`, not an error.
    pub async fn verify_password(&self, username: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.get_user(username).await? else {
            return Ok(None);
        };
        let Ok(parsed) = PasswordHash::new(&user.password_hash) else {
            return Ok(None);
        };
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
        {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Tier overrides
    // ------------------------------------------------------------------

    /// Pin a username to a tier, overriding classification.
    ///
    /// # Errors
    ///
    /// Returns a database error if the upsert fails.
    pub async fn upsert_tier_override(
        &self,
        username: &str,
        tier: Tier,
        updated_by: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_tier_overrides (username, tier, updated_at, updated_by) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(username) DO UPDATE SET \
               tier = excluded.tier, \
               updated_at = excluded.updated_at, \
               updated_by = excluded.updated_by",
        )
        .bind(username)
        .bind(tier.as_str())
        .bind(now_iso())
        .bind(updated_by)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Remove a tier override; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the delete fails.
    pub async fn clear_tier_override(&self, username: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM user_tier_overrides WHERE username = ?")
            .bind(username)
            .execute(self.pool())
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// All overrides, keyed by username.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    pub async fn load_tier_overrides(&self) -> Result<BTreeMap<String, Tier>> {
        let rows = sqlx::query("SELECT username, tier FROM user_tier_overrides")
            .fetch_all(self.pool())
            .await?;
        let mut map = BTreeMap::new();
        for row in rows {
            let username: String = row.try_get("username")?;
            let tier_text: String = row.try_get("tier")?;
            if let Ok(tier) = tier_text.parse::<Tier>() {
                map.insert(username, tier);
            }
        }
        Ok(map)
    }

    /// Billing tier for a username: override first, classification second.
    ///
    /// # Errors
    ///
    /// Returns a database error if the override lookup fails.
    pub async fn resolve_tier(&self, username: &str) -> Result<Tier> {
        let row = sqlx::query("SELECT tier FROM user_tier_overrides WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?;
        if let Some(row) = row {
            let text: String = row.try_get("tier")?;
            if let Ok(tier) = text.parse::<Tier>() {
                return Ok(tier);
            }
        }
        Ok(classify_username(username))
    }

    // ------------------------------------------------------------------
    // Login throttle
    // ------------------------------------------------------------------

    /// Whether `(username, ip)` is currently locked out, and for how long.
    ///
    /// # Errors
    ///
    /// Returns a database error if the lookup fails.
    pub async fn throttle_is_locked(&self, username: &str, ip: &str) -> Result<(bool, i64)> {
        let row = sqlx::query(
            "SELECT locked_until FROM auth_throttle WHERE username = ? AND ip = ?",
        )
        .bind(username)
        .bind(ip)
        .fetch_optional(self.pool())
        .await?;
        if let Some(row) = row {
            if let Some(until) = row
                .try_get::<Option<String>, _>("locked_until")?
                .as_deref()
                .and_then(parse_iso)
            {
                let now = Utc::now();
                if now < until {
                    return Ok((true, (until - now).num_seconds()));
                }
            }
        }
        Ok((false, 0))
    }

    /// Count one failed login. Returns `true` when this failure triggers a
    /// new lock. Failures outside the rolling window reset the count.
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails.
    pub async fn throttle_register_failure(
        &self,
        username: &str,
        ip: &str,
        window_sec: i64,
        max_fails: i64,
        lock_sec: i64,
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now();

        let row = sqlx::query(
            "SELECT window_start, fail_count FROM auth_throttle WHERE username = ? AND ip = ?",
        )
        .bind(username)
        .bind(ip)
        .fetch_optional(&mut *tx)
        .await?;

        let locked_now = if let Some(row) = row {
            let window_start = row
                .try_get::<Option<String>, _>("window_start")?
                .as_deref()
                .and_then(parse_iso);
            let mut fails: i64 = row.try_get("fail_count")?;

            let expired =
                window_start.map_or(true, |ws| (now - ws).num_seconds() > window_sec);
            if expired {
                fails = 0;
            }
            fails += 1;

            let locked_until = if fails >= max_fails {
                Some(to_iso(now + Duration::seconds(lock_sec)))
            } else {
                None
            };
            sqlx::query(
                "UPDATE auth_throttle \
                 SET window_start = ?, fail_count = ?, locked_until = ? \
                 WHERE username = ? AND ip = ?",
            )
            .bind(to_iso(now))
            .bind(fails)
            .bind(&locked_until)
            .bind(username)
            .bind(ip)
            .execute(&mut *tx)
            .await?;
            locked_until.is_some()
        } else {
            sqlx::query(
                "INSERT INTO auth_throttle (username, ip, window_start, fail_count, locked_until) \
                 VALUES (?, ?, ?, 1, NULL)",
            )
            .bind(username)
            .bind(ip)
            .bind(to_iso(now))
            .execute(&mut *tx)
            .await?;
            false
        };

        tx.commit().await?;
        Ok(locked_now)
    }

    /// Clear failures and any lock after a successful login.
    ///
    /// # Errors
    ///
    /// Returns a database error if the update fails.
    pub async fn throttle_reset(&self, username: &str, ip: &str) -> Result<()> {
        sqlx::query(
            "UPDATE auth_throttle \
             SET window_start = ?, fail_count = 0, locked_until = NULL \
             WHERE username = ? AND ip = ?",
        )
        .bind(now_iso())
        .bind(username)
        .bind(ip)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_store;

    #[tokio::test]
    async fn create_and_verify_password() {
        let store = test_store().await;
        store.create_user("alice.w", "s3cret-pass", "user").await.unwrap();

        assert!(store
            .verify_password("alice.w", "s3cret-pass")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .verify_password("alice.w", "wrong")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .verify_password("nobody", "s3cret-pass")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let store = test_store().await;
        store.create_user("bob", "pw-one-two", "user").await.unwrap();
        let err = store.create_user("bob", "pw-two-three", "user").await;
        assert!(matches!(err, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn tier_override_beats_classification() {
        let store = test_store().await;
        // Classifies private by default.
        assert_eq!(store.resolve_tier("x9z").await.unwrap(), Tier::Private);

        store.upsert_tier_override("x9z", Tier::Gov, "admin").await.unwrap();
        assert_eq!(store.resolve_tier("x9z").await.unwrap(), Tier::Gov);

        assert!(store.clear_tier_override("x9z").await.unwrap());
        assert_eq!(store.resolve_tier("x9z").await.unwrap(), Tier::Private);
        assert!(!store.clear_tier_override("x9z").await.unwrap());
    }

    #[tokio::test]
    async fn throttle_locks_after_max_fails() {
        let store = test_store().await;
        for i in 0..4 {
            let locked = store
                .throttle_register_failure("eve", "10.0.0.9", 60, 5, 300)
                .await
                .unwrap();
            assert!(!locked, "locked too early at failure {i}");
        }
        let locked = store
            .throttle_register_failure("eve", "10.0.0.9", 60, 5, 300)
            .await
            .unwrap();
        assert!(locked);

        let (is_locked, left) = store.throttle_is_locked("eve", "10.0.0.9").await.unwrap();
        assert!(is_locked);
        assert!(left > 0 && left <= 300);

        // Another IP is unaffected.
        let (other, _) = store.throttle_is_locked("eve", "10.0.0.10").await.unwrap();
        assert!(!other);

        store.throttle_reset("eve", "10.0.0.9").await.unwrap();
        let (is_locked, _) = store.throttle_is_locked("eve", "10.0.0.9").await.unwrap();
        assert!(!is_locked);
    }
}
