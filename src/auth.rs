use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue},
};
use bcrypt::{hash, verify, BcryptError};
use chrono::Utc;
use rand::Rng;

use crate::db::{self, DbConnection};
use crate::error::AppError;
use crate::models::User;
use crate::AppState;

const TOKEN_KEYWORD: &str = "token";

/// bcrypt at a fixed cost, plus a throwaway hash of the same cost that login
/// verifies against when the username is unknown.
#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    dummy_hash: Arc<str>,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Result<Self, BcryptError> {
        let dummy_hash = hash(generate_token(), cost)?;
        Ok(Self {
            cost,
            dummy_hash: dummy_hash.into(),
        })
    }

    pub async fn hash(&self, password: String) -> Result<String, AppError> {
        let cost = self.cost;
        tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
            .map_err(AppError::from)
    }

    pub async fn verify(&self, password: String, password_hash: String) -> bool {
        tokio::task::spawn_blocking(move || verify(password, &password_hash).unwrap_or(false))
            .await
            .unwrap_or(false)
    }

    /// Returns the user when `username` exists and `password` matches.
    ///
    /// Unknown usernames still pay for one bcrypt verify, so response time
    /// does not reveal which accounts exist.
    pub async fn authenticate(
        &self,
        db: &DbConnection,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        let Some(user) = db::find_user_by_username(db, username).await? else {
            self.verify(password.to_string(), self.dummy_hash.to_string()).await;
            return Ok(None);
        };
        if self.verify(password.to_string(), user.password_hash.clone()).await {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }
}

/// 40 lowercase hex characters from 20 random bytes.
pub fn generate_token() -> String {
    let bytes: [u8; 20] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub async fn get_or_create_token(db: &DbConnection, user: &User) -> Result<String, AppError> {
    let token = db::get_or_create_token(db, user.id, &generate_token(), Utc::now()).await?;
    Ok(token)
}

/// Extracts the key from `Authorization: Token <key>`.
///
/// `Ok(None)` means no token credentials were offered at all.
fn parse_authorization(value: Option<&HeaderValue>) -> Result<Option<String>, AppError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| {
        AppError::AuthenticationFailed(
            "Invalid token header. Token string should not contain invalid characters."
                .to_string(),
        )
    })?;

    let mut parts = value.split_whitespace();
    match parts.next() {
        Some(keyword) if keyword.eq_ignore_ascii_case(TOKEN_KEYWORD) => {}
        _ => return Ok(None),
    }

    let key = parts.next().ok_or_else(|| {
        AppError::AuthenticationFailed("Invalid token header. No credentials provided.".to_string())
    })?;
    if parts.next().is_some() {
        return Err(AppError::AuthenticationFailed(
            "Invalid token header. Token string should not contain spaces.".to_string(),
        ));
    }

    Ok(Some(key.to_string()))
}

/// The authenticated caller, resolved once per request from its token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let key = parse_authorization(parts.headers.get(header::AUTHORIZATION))?
            .ok_or(AppError::NotAuthenticated)?;

        match db::find_user_by_token(&state.db, &key).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(AppError::AuthenticationFailed("Invalid token.".to_string())),
        }
    }
}
