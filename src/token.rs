//! Client-side token liveness.
//!
//! Tokens are JWT-shaped (`header.payload.signature`). Only the `exp` claim of
//! the payload is read; the signature is the server's business and is never
//! checked here.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("expected 3 dot-separated segments, found {0}")]
    Shape(usize),
    #[error("payload is not base64url: {0}")]
    Encoding(String),
    #[error("payload is not a JSON object: {0}")]
    Payload(String),
    #[error("payload has no numeric exp claim")]
    MissingExpiry,
}

/// Claims carry seconds since the epoch; all comparisons happen in milliseconds.
pub fn expiry_millis(exp_secs: i64) -> i64 {
    exp_secs.saturating_mul(1000)
}

/// Extract the `exp` claim (seconds since epoch) from a token.
pub fn decode_expiry(token: &str) -> Result<i64, TokenError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Shape(segments.len()));
    }

    // Some issuers keep the padding
    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Encoding(e.to_string()))?;

    let claims: Value =
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Payload(e.to_string()))?;
    if !claims.is_object() {
        return Err(TokenError::Payload("not an object".to_string()));
    }

    match claims.get("exp") {
        Some(exp) => exp
            .as_i64()
            .or_else(|| exp.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .ok_or(TokenError::MissingExpiry),
        None => Err(TokenError::MissingExpiry),
    }
}

/// True while the token's expiry lies strictly after `now`. Fails closed.
pub fn is_live(token: &str, now: DateTime<Utc>) -> bool {
    is_live_with_leeway(token, now, 0)
}

/// Like [`is_live`], treating the token as expired `leeway_secs` early.
pub fn is_live_with_leeway(token: &str, now: DateTime<Utc>, leeway_secs: u64) -> bool {
    match decode_expiry(token) {
        Ok(exp) => {
            let leeway = i64::try_from(leeway_secs).unwrap_or(i64::MAX);
            expiry_millis(exp.saturating_sub(leeway)) > now.timestamp_millis()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
pub(crate) fn token_with_claims(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}

#[cfg(test)]
pub(crate) fn token_with_exp(exp: i64) -> String {
    token_with_claims(&serde_json::json!({ "sub": "T-100", "exp": exp }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_expiry_millis() {
        assert_eq!(expiry_millis(0), 0);
        assert_eq!(expiry_millis(1_700_000_000), 1_700_000_000_000);
        assert_eq!(expiry_millis(i64::MAX), i64::MAX);
    }

    #[test]
    fn test_past_expiry_is_dead() {
        let now = at(1_700_000_000);
        for delta in [1, 60, 86_400, 1_000_000] {
            assert!(!is_live(&token_with_exp(1_700_000_000 - delta), now));
        }
    }

    #[test]
    fn test_future_expiry_is_live() {
        let now = at(1_700_000_000);
        for delta in [1, 60, 86_400, 1_000_000] {
            assert!(is_live(&token_with_exp(1_700_000_000 + delta), now));
        }
    }

    #[test]
    fn test_expiry_equal_to_now_is_dead() {
        let now = at(1_700_000_000);
        assert!(!is_live(&token_with_exp(1_700_000_000), now));
    }

    #[test]
    fn test_sub_second_precision() {
        // exp is one second ahead; 999ms into the last second is still live
        let now = Utc.timestamp_millis_opt(1_700_000_000_999).unwrap();
        assert!(is_live(&token_with_exp(1_700_000_001), now));
    }

    #[test]
    fn test_seconds_not_compared_as_millis() {
        // Compared without conversion this exp would look like 1970
        let now = at(1_700_000_000);
        assert!(is_live(&token_with_exp(1_800_000_000), now));
    }

    #[test]
    fn test_malformed_tokens_fail_closed() {
        let now = at(1_700_000_000);
        let not_json = format!("aGVhZA.{}.sig", URL_SAFE_NO_PAD.encode("not json"));
        let array = token_with_claims(&json!([1, 2, 3]));
        let no_exp = token_with_claims(&json!({ "sub": "x" }));
        let text_exp = token_with_claims(&json!({ "exp": "tomorrow" }));
        for token in [
            "",
            "abc",
            "a.b",
            "a.b.c.d",
            "a.!!!.c",
            not_json.as_str(),
            array.as_str(),
            no_exp.as_str(),
            text_exp.as_str(),
        ] {
            assert!(!is_live(token, now), "token {:?} should be dead", token);
        }
    }

    #[test]
    fn test_decode_errors_name_the_cause() {
        assert_eq!(decode_expiry("a.b"), Err(TokenError::Shape(2)));
        assert!(matches!(
            decode_expiry("a.!!!.c"),
            Err(TokenError::Encoding(_))
        ));
        assert_eq!(
            decode_expiry(&token_with_claims(&json!({}))),
            Err(TokenError::MissingExpiry)
        );
    }

    #[test]
    fn test_padded_payload_and_float_exp() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"exp":1800000000.5}"#);
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_expiry(&token), Ok(1_800_000_000));
    }

    #[test]
    fn test_leeway_expires_early() {
        let now = at(1_700_000_000);
        let token = token_with_exp(1_700_000_030);
        assert!(is_live_with_leeway(&token, now, 0));
        assert!(is_live_with_leeway(&token, now, 29));
        assert!(!is_live_with_leeway(&token, now, 30));
        assert!(!is_live_with_leeway(&token, now, u64::MAX));
    }
}
