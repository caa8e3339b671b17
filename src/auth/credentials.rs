// Credential header parsing and formatting

use crate::config::{TokenType, TOKEN_PLACEHOLDER};
use crate::error::{AuthError, Result};
use crate::http_client::HttpResponse;

use super::types::TokenData;

/// Strip the token-type scheme from a header value.
///
/// The scheme match is case-insensitive; a value without the scheme is taken
/// as the bare credential. Empty values yield `None`.
pub fn extract_token(value: &str, token_type: TokenType) -> Option<String> {
    let value = value.trim();
    let scheme = token_type.scheme();

    let token = if scheme.is_empty() {
        value
    } else {
        match value.split_once(' ') {
            Some((prefix, rest)) if prefix.eq_ignore_ascii_case(scheme) => rest.trim(),
            _ => value,
        }
    };

    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Header value for `token`: `template` with `{auth_token}` replaced,
/// prefixed by the scheme unless the token type is empty
pub fn header_value(token_type: TokenType, template: &str, token: &str) -> String {
    let credential = template.replace(TOKEN_PLACEHOLDER, token);
    match token_type.scheme() {
        "" => credential,
        scheme => format!("{} {}", scheme, credential),
    }
}

/// Read the credential (required) and refresh credential (optional) from
/// response headers
pub fn token_data(
    response: &HttpResponse,
    token_header: &str,
    refresh_header: &str,
    token_type: TokenType,
) -> Result<TokenData> {
    let token = response
        .header(token_header)
        .and_then(|v| extract_token(v, token_type))
        .ok_or_else(|| {
            AuthError::InvalidResponse(format!("response has no {} header", token_header))
        })?;

    let refresh_token = response
        .header(refresh_header)
        .and_then(|v| extract_token(v, token_type));

    Ok(TokenData {
        token,
        refresh_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};
    use serde_json::Value;

    fn response(headers: &[(&'static str, &'static str)]) -> HttpResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_static(value));
        }
        HttpResponse {
            status: 200,
            headers: map,
            body: Value::Null,
        }
    }

    #[test]
    fn test_extract_token_strips_scheme() {
        assert_eq!(extract_token("Bearer T1", TokenType::Bearer), Some("T1".to_string()));
        assert_eq!(extract_token("bearer T1", TokenType::Bearer), Some("T1".to_string()));
        assert_eq!(extract_token("Basic abc=", TokenType::Basic), Some("abc=".to_string()));
        assert_eq!(extract_token("T1", TokenType::Bearer), Some("T1".to_string()));
        assert_eq!(extract_token("T1", TokenType::None), Some("T1".to_string()));
    }

    #[test]
    fn test_extract_token_empty() {
        assert_eq!(extract_token("", TokenType::Bearer), None);
        assert_eq!(extract_token("Bearer ", TokenType::Bearer), None);
    }

    #[test]
    fn test_header_value() {
        assert_eq!(header_value(TokenType::Bearer, "{auth_token}", "T1"), "Bearer T1");
        assert_eq!(header_value(TokenType::Basic, "{auth_token}", "T1"), "Basic T1");
        assert_eq!(header_value(TokenType::None, "{auth_token}", "T1"), "T1");
    }

    #[test]
    fn test_header_value_fills_template() {
        assert_eq!(
            header_value(TokenType::Bearer, "key={auth_token};v=2", "T1"),
            "Bearer key=T1;v=2"
        );
        assert_eq!(header_value(TokenType::None, "<{auth_token}>", "T1"), "<T1>");
    }

    #[test]
    fn test_token_data() {
        let resp = response(&[("authorization", "Bearer T1"), ("refreshtokenauth", "R1")]);
        let data = token_data(&resp, "Authorization", "RefreshTokenAuth", TokenType::Bearer).unwrap();
        assert_eq!(data.token, "T1");
        assert_eq!(data.refresh_token, Some("R1".to_string()));
    }

    #[test]
    fn test_token_data_missing_header() {
        let resp = response(&[("refreshtokenauth", "R1")]);
        let err = token_data(&resp, "Authorization", "RefreshTokenAuth", TokenType::Bearer)
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }
}
