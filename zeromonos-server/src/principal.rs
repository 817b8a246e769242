//! Principal forwarded by the upstream authentication layer.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use zeromonos_core::{Principal, PrincipalId, Role};

use crate::error::AppError;

/// Header carrying the verified principal id.
pub(crate) const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
/// Header carrying the verified role, `CITIZEN` or `STAFF`.
pub(crate) const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";

/// Extractor that rejects requests without a usable principal with 401.
#[derive(Debug, Clone)]
pub(crate) struct Authenticated(pub(crate) Principal);

impl<S: Send + Sync> FromRequestParts<S> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal_from_headers(&parts.headers).map(Self)
    }
}

fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, AppError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let id = header(PRINCIPAL_ID_HEADER)
        .ok_or_else(|| AppError::unauthorized("missing principal id"))?;
    let role = header(PRINCIPAL_ROLE_HEADER)
        .ok_or_else(|| AppError::unauthorized("missing principal role"))?
        .parse::<Role>()
        .map_err(|err| AppError::unauthorized(err.to_string()))?;

    Ok(Principal {
        id: PrincipalId(id.to_owned()),
        role,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn role_header_is_case_insensitive() {
        let principal = principal_from_headers(&headers(&[
            (PRINCIPAL_ID_HEADER, "op@zeromonos.pt"),
            (PRINCIPAL_ROLE_HEADER, "staff"),
        ]))
        .expect("valid principal");

        assert_eq!(principal, Principal::staff("op@zeromonos.pt"));
    }

    #[test]
    fn incomplete_headers_are_rejected() {
        assert!(principal_from_headers(&headers(&[])).is_err(), "no headers");
        assert!(
            principal_from_headers(&headers(&[(PRINCIPAL_ID_HEADER, "alice")])).is_err(),
            "no role"
        );
        assert!(
            principal_from_headers(&headers(&[
                (PRINCIPAL_ID_HEADER, "alice"),
                (PRINCIPAL_ROLE_HEADER, "ADMIN"),
            ]))
            .is_err(),
            "unknown role"
        );
    }
}
