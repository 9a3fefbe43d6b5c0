//! Auth orchestrator: register, login and refresh on top of the directory,
//! the credential hasher and the token service.

use std::sync::Arc;

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{LoginRequest, RegisterRequest},
        jwt::{TokenPair, TokenService},
        password::CredentialHasher,
        repo::{DirectoryError, UserDirectory},
        repo_types::{PublicUser, User},
    },
    config::PasswordConfig,
    error::{AuthError, AuthResult},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A user (hash stripped) plus a fresh token pair.
#[derive(Debug)]
pub struct Authenticated {
    pub user: PublicUser,
    pub tokens: TokenPair,
}

pub struct AuthService {
    directory: Arc<dyn UserDirectory>,
    hasher: CredentialHasher,
    tokens: TokenService,
    min_password_len: usize,
    /// Verified against when the email is unknown so both login failures cost the same.
    decoy_hash: String,
}

impl AuthService {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        hasher: CredentialHasher,
        tokens: TokenService,
        password: &PasswordConfig,
    ) -> anyhow::Result<Self> {
        let decoy_hash = hasher
            .hash(&Uuid::new_v4().to_string())
            .context("compute decoy password hash")?;
        Ok(Self {
            directory,
            hasher,
            tokens,
            min_password_len: password.min_length,
            decoy_hash,
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub async fn register(&self, payload: RegisterRequest) -> AuthResult<Authenticated> {
        let RegisterRequest {
            username,
            email,
            password,
            bio,
        } = payload;

        let username = username.trim().to_string();
        if username.is_empty() {
            return Err(AuthError::Validation("Username is required".into()));
        }
        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(AuthError::Validation("Invalid email".into()));
        }
        if password.chars().count() < self.min_password_len {
            warn!("password too short");
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                self.min_password_len
            )));
        }
        let bio = bio
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());

        // Fast path only; insert_if_absent below is what actually enforces uniqueness.
        if self.directory.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AuthError::EmailConflict);
        }

        let password_hash = self.hash_blocking(password).await?;
        let user = User {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            bio,
            created_at: OffsetDateTime::now_utc(),
        };

        match self.directory.insert_if_absent(&user).await {
            Ok(()) => {}
            Err(DirectoryError::Conflict) => {
                warn!(email = %user.email, "lost concurrent registration race");
                return Err(AuthError::EmailConflict);
            }
            Err(e) => return Err(e.into()),
        }

        let tokens = self.tokens.issue(user.id)?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(Authenticated {
            user: user.into(),
            tokens,
        })
    }

    pub async fn login(&self, payload: LoginRequest) -> AuthResult<Authenticated> {
        let LoginRequest { email, password } = payload;
        let email = normalize_email(&email);
        if !is_valid_email(&email) {
            warn!(email = %email, "invalid email");
            return Err(AuthError::Validation("Invalid email".into()));
        }
        if password.is_empty() {
            return Err(AuthError::Validation("Password is required".into()));
        }

        let user = self.directory.find_by_email(&email).await?;
        let stored_hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.decoy_hash.clone());
        let matched = self.verify_blocking(password, stored_hash).await?;

        let user = match user {
            Some(u) if matched => u,
            Some(u) => {
                warn!(user_id = %u.id, "login invalid password");
                return Err(AuthError::InvalidCredentials);
            }
            None => {
                warn!(email = %email, "login unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let tokens = self.tokens.issue(user.id)?;
        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok(Authenticated {
            user: user.into(),
            tokens,
        })
    }

    /// Rotates both tokens. The presented refresh token is not blocklisted and
    /// stays usable until it expires.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::Validation("Missing refresh token".into()));
        }
        let user_id = self.tokens.verify_refresh(refresh_token)?;

        let Some(user) = self.directory.find_by_id(user_id).await? else {
            warn!(user_id = %user_id, "refresh for unknown user");
            return Err(AuthError::UserNotFound);
        };

        let tokens = self.tokens.issue(user.id)?;
        info!(user_id = %user.id, "tokens refreshed");
        Ok(tokens)
    }

    pub async fn profile(&self, user_id: Uuid) -> AuthResult<PublicUser> {
        self.directory
            .find_by_id(user_id)
            .await?
            .map(PublicUser::from)
            .ok_or(AuthError::UserNotFound)
    }

    // Argon2 is CPU-bound; keep it off the async workers. A spawned blocking
    // job runs to completion even if the request future is dropped.
    async fn hash_blocking(&self, password: String) -> AuthResult<String> {
        let hasher = self.hasher.clone();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("password hashing task")??;
        Ok(hash)
    }

    async fn verify_blocking(&self, password: String, hash: String) -> AuthResult<bool> {
        let hasher = self.hasher.clone();
        let matched = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .context("password verification task")?;
        Ok(matched)
    }
}
