//! # Request identity
//!
//! The upstream authentication layer sets `x-owner-id` on every buyer
//! request. Operator endpoints additionally need `x-operator-key`.

use crate::handlers::ErrorResponse;
use crate::state::AppState;
use checkout_core::constant_time_eq;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};

pub const OWNER_HEADER: &str = "x-owner-id";
pub const OPERATOR_KEY_HEADER: &str = "x-operator-key";

type Rejection = (StatusCode, Json<ErrorResponse>);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Authenticated buyer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for OwnerId {
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header(parts, OWNER_HEADER)
            .map(|owner| OwnerId(owner.to_string()))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse::new("Missing owner identity", 401)),
                )
            })
    }
}

/// Caller holding the operator key
#[derive(Debug, Clone, Copy)]
pub struct Operator;

impl FromRequestParts<AppState> for Operator {
    type Rejection = Rejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let forbidden = || {
            (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new("Operator access required", 403)),
            )
        };

        let expected = state.config.operator_api_key.as_deref().ok_or_else(forbidden)?;
        let presented = header(parts, OPERATOR_KEY_HEADER).ok_or_else(forbidden)?;

        if constant_time_eq(presented, expected) {
            Ok(Operator)
        } else {
            tracing::warn!("Rejected operator key");
            Err(forbidden())
        }
    }
}
