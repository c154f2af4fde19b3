//! Context utilities for extracting client information from MCP requests

use mcprouter_core::branding::{PROFILE_HEADER, PROFILE_QUERY_PARAM};
use rmcp::{model::Extensions, service::RequestContext, RoleServer};
use serde_json::Value;

/// Profile requested by an HTTP client, if any
///
/// The `?profile=` query parameter wins over the `x-mcprouter-profile` header.
/// Outside of HTTP (stdio) there are no request parts and this is `None`.
pub fn requested_profile(extensions: &Extensions) -> Option<String> {
    let parts = extensions.get::<http::request::Parts>()?;

    parts.uri.query().and_then(profile_from_query).or_else(|| {
        parts
            .headers
            .get(PROFILE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn profile_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == PROFILE_QUERY_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The frontend request id as a stable string key
pub fn request_key(context: &RequestContext<RoleServer>) -> String {
    serde_json::to_string(&context.id).unwrap_or_else(|_| format!("{:?}", context.id))
}

/// The client's progress token, if it asked for progress
pub fn progress_token(context: &RequestContext<RoleServer>) -> Option<Value> {
    context
        .meta
        .get_progress_token()
        .and_then(|token| serde_json::to_value(token).ok())
}
