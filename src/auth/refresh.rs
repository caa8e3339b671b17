// Credential refresh exchange

use crate::config::{AuthOptions, RefreshOptions};
use crate::error::{AuthError, Result};
use crate::http_client::{ApiRequest, AuthHttpClient};
use crate::store::StoreManager;

use super::credentials;
use super::types::TokenData;

/// Build the refresh request.
///
/// The refresh endpoint is skipped by the outbound interceptor, so the held
/// credential and refresh credential are attached here.
pub(super) fn refresh_request(
    refresh: &RefreshOptions,
    options: &AuthOptions,
    store: &StoreManager,
) -> ApiRequest {
    let mut request = ApiRequest::endpoint(refresh.method, &refresh.url);
    if let Some(token) = store.get_token() {
        request.set_header(&options.header_token, &options.credential_header(&token));
    }
    if let Some(refresh_token) = store.get_refresh_token() {
        request.set_header(
            &options.refresh_header_token,
            &options.refresh_credential_header(&refresh_token),
        );
    }
    request
}

/// Send the refresh request and read the new credentials from the response.
/// Nothing is written to the store.
pub(super) async fn exchange(
    http: &AuthHttpClient,
    options: &AuthOptions,
    store: &StoreManager,
) -> Result<TokenData> {
    let refresh = options
        .refresh
        .as_ref()
        .ok_or_else(|| AuthError::Config("refresh is not configured".to_string()))?;

    tracing::debug!(url = %refresh.url, "Refreshing credential...");

    let response = http.send(refresh_request(refresh, options, store)).await?;

    credentials::token_data(
        &response,
        response_token_header(options),
        &options.refresh_header_token,
        options.token_type,
    )
}

/// Header carrying the credential in login and refresh responses
pub(super) fn response_token_header(options: &AuthOptions) -> &str {
    options
        .login
        .as_ref()
        .map(|l| l.header_token.as_str())
        .unwrap_or(&options.header_token)
}
