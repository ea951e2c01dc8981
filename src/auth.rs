use actix_web::cookie::{time, Cookie, SameSite};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::future::{ready, Ready};

use crate::error::AppError;
use crate::models::{Id, User};
use crate::routes::AppState;

pub const SESSION_COOKIE: &str = "session";
const SESSION_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // username
    pub uid: Id,
    pub exp: usize,
    pub roles: Vec<Role>,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| matches!(r, Role::Admin))
    }
}

/// HS256 key pair derived from the configured secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self { encoding: EncodingKey::from_secret(secret), decoding: DecodingKey::from_secret(secret) }
    }
}

/// Validate a JWT and return its claims.
pub fn decode_jwt(keys: &JwtKeys, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &keys.decoding, &validation)?;
    Ok(data.claims)
}

/// Issue a session token for a user.
pub fn create_jwt(keys: &JwtKeys, user_id: Id, username: &str, roles: Vec<Role>) -> Result<String, jsonwebtoken::errors::Error> {
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(SESSION_HOURS)).timestamp() as usize;
    let claims = Claims { sub: username.to_string(), uid: user_id, exp: expiration, roles };
    encode(&Header::default(), &claims, &keys.encoding)
}

pub fn roles_for(user: &User) -> Vec<Role> {
    if user.is_admin { vec![Role::User, Role::Admin] } else { vec![Role::User] }
}

pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::hours(SESSION_HOURS))
        .finish()
}

pub fn clear_session_cookie() -> Cookie<'static> {
    let mut c = Cookie::build(SESSION_COOKIE, "").path("/").finish();
    c.make_removal();
    c
}

/// Path plus query of the current request; the `next` target for login redirects.
pub fn full_path(req: &HttpRequest) -> String {
    match req.uri().query() {
        Some(q) if !q.is_empty() => format!("{}?{}", req.path(), q),
        _ => req.path().to_string(),
    }
}

/// Extractor yielding validated `Claims`. Anonymous requests fail with a
/// redirect to the login page; wrap in `Option` for optional sessions.
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> Id { self.0.uid }
}

impl FromRequest for Auth {
    type Error = AppError;
    type Future = Ready<Result<Self, AppError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            tracing::error!("AppState missing from app data");
            return ready(Err(AppError::Internal));
        };
        // header wins over cookie
        let token = match BearerAuth::from_request(req, pl).into_inner() {
            Ok(bearer) => Some(bearer.token().to_string()),
            Err(_) => req.cookie(SESSION_COOKIE).map(|c| c.value().to_string()),
        };
        let claims = token.and_then(|t| match decode_jwt(&state.keys, &t) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::debug!("rejected session token: {e}");
                None
            }
        });
        ready(claims.map(Auth).ok_or_else(|| AppError::LoginRequired { next: full_path(req) }))
    }
}

/// Helper macro for role-guarding handlers.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:pat) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, $role)) {
            return Err($crate::error::AppError::Forbidden);
        }
    };
}

static ARGON2: Lazy<Argon2<'static>> = Lazy::new(|| {
    Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon2::Params::DEFAULT)
});

#[derive(thiserror::Error, Debug)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(String);

pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    ARGON2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| PasswordError(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|e| PasswordError(e.to_string()))?;
    match ARGON2.verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> JwtKeys { JwtKeys::from_secret(b"test-secret-must-be-32-bytes-long!!") }

    #[test]
    fn token_round_trip() {
        let token = create_jwt(&keys(), 7, "leo", vec![Role::User]).unwrap();
        let claims = decode_jwt(&keys(), &token).unwrap();
        assert_eq!(claims.uid, 7);
        assert_eq!(claims.sub, "leo");
        assert!(!claims.is_admin());
    }

    #[test]
    fn foreign_secret_rejected() {
        let token = create_jwt(&keys(), 1, "leo", vec![Role::Admin]).unwrap();
        let other = JwtKeys::from_secret(b"another-secret-also-32-bytes-long!!");
        assert!(decode_jwt(&other, &token).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let claims = Claims { sub: "leo".into(), uid: 1, exp: 1_000, roles: vec![Role::User] };
        let token = encode(&Header::default(), &claims, &keys().encoding).unwrap();
        assert!(decode_jwt(&keys(), &token).is_err());
    }

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
    }
}
