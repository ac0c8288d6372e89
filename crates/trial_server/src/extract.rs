//! Request extractors
//!
//! Wrappers that turn axum's rejections into [`ApiError`] bodies, and the
//! caller identity forwarded by the authentication layer.

use axum::{
    extract::{FromRequest, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::str::FromStr;
use trial_core::types::{Caller, Role, UserId};

use crate::error::ApiError;

/// Header carrying the authenticated user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the authenticated user's role
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// JSON body with [`ApiError`] rejections
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Path parameters with [`ApiError`] rejections
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

/// Caller resolved from `X-User-Id` and `X-User-Role`
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity(pub Caller);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .ok_or_else(|| ApiError::Unauthenticated(format!("missing {} header", name)))?
        .to_str()
        .map(str::trim)
        .map_err(|_| ApiError::Unauthenticated(format!("{} header is not valid text", name)))
}

impl CallerIdentity {
    /// Resolve the caller from request headers
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let user_id = header(headers, USER_ID_HEADER)?;
        let user_id = UserId::from_str(user_id).map_err(|_| {
            ApiError::Unauthenticated(format!("invalid user id '{}'", user_id))
        })?;
        let role = Role::from_str(header(headers, USER_ROLE_HEADER)?)
            .map_err(ApiError::Unauthenticated)?;
        Ok(Self(Caller::new(user_id, role)))
    }
}

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
