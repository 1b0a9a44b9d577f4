use axum::http::HeaderMap;

use crate::config::BridgeCredential;
use crate::error::BridgeError;
use crate::server::util::bearer_token;

// 校验入站桥接令牌：必须在任何上游调用之前完成
pub fn ensure_bridge_token(
    headers: &HeaderMap,
    credential: &BridgeCredential,
) -> Result<(), BridgeError> {
    let Some(provided) = bearer_token(headers) else {
        tracing::warn!("rejected request without bearer token");
        return Err(BridgeError::Unauthorized(
            "Invalid Authorization header.".into(),
        ));
    };
    if provided != credential.inbound_token() {
        tracing::warn!("rejected request with invalid bridge token");
        return Err(BridgeError::Unauthorized("Invalid API Key.".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header::AUTHORIZATION};

    fn credential() -> BridgeCredential {
        BridgeCredential::new("bridge-secret", "poe-secret")
    }

    fn headers(value: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_static(value));
        h
    }

    #[test]
    fn accepts_matching_token() {
        assert!(ensure_bridge_token(&headers("Bearer bridge-secret"), &credential()).is_ok());
    }

    #[test]
    fn rejects_missing_malformed_and_wrong_tokens() {
        for h in [
            HeaderMap::new(),
            headers("bridge-secret"),
            headers("Bearer wrong"),
            headers("Bearer poe-secret"),
        ] {
            let err = ensure_bridge_token(&h, &credential()).unwrap_err();
            assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
        }
    }
}
