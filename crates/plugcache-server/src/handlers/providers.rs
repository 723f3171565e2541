//! Provider registry protocol handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use plugcache_core::{PackageKey, Platform, ProviderKey, RequestId};
use plugcache_registry::protocol::{DownloadResponse, VersionsResponse};
use plugcache_store::{CacheEntry, EntryState};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ApiError, ErrorReply, api_error};
use crate::state::AppState;

/// Status for a package whose fill is still running.
pub const STILL_POPULATING: StatusCode = StatusCode::LOCKED;

fn parse_request(state: &AppState, raw: &str) -> Result<RequestId, ApiError> {
    let id: RequestId = raw
        .parse()
        .map_err(|_| api_error(StatusCode::NOT_FOUND, "unknown cache request"))?;
    if !state.store.is_registered(id) {
        return Err(api_error(StatusCode::NOT_FOUND, "unknown cache request"));
    }
    Ok(id)
}

fn parse_provider(hostname: &str, namespace: &str, provider_type: &str) -> Result<ProviderKey, ApiError> {
    ProviderKey::new(hostname, namespace, provider_type)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))
}

fn parse_package(
    hostname: &str,
    namespace: &str,
    provider_type: &str,
    version: &str,
    platform: &str,
) -> Result<PackageKey, ApiError> {
    let platform: Platform = platform
        .parse()
        .map_err(|e: plugcache_core::Error| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let provider = parse_provider(hostname, namespace, provider_type)?;
    let version = provider
        .with_version(version)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(version.for_platform(platform))
}

pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path((request_id, hostname, namespace, provider_type)): Path<(String, String, String, String)>,
) -> Result<Json<VersionsResponse>, ErrorReply> {
    parse_request(&state, &request_id)?;
    let provider = parse_provider(&hostname, &namespace, &provider_type)?;

    if let Some(versions) = state.versions.get(&provider) {
        return Ok(Json(VersionsResponse {
            versions: versions.as_ref().clone(),
        }));
    }

    for method in state.methods.iter() {
        if !method.matches(&provider) {
            continue;
        }
        match method.list_versions(&provider).await? {
            Some(versions) => {
                debug!(provider = %provider, method = method.name(), count = versions.len(), "Versions listed");
                state.versions.insert(provider, Arc::new(versions.clone()));
                return Ok(Json(VersionsResponse { versions }));
            }
            None => continue,
        }
    }

    Err(api_error(
        StatusCode::NOT_FOUND,
        format!("no installation method knows provider {}", provider),
    )
    .into())
}

/// `.../{version}/download/{os}/{arch}`
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path((request_id, hostname, namespace, provider_type, version, os, arch)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> Result<Response, ErrorReply> {
    let request_id = parse_request(&state, &request_id)?;
    let key = parse_package(
        &hostname,
        &namespace,
        &provider_type,
        &version,
        &format!("{}_{}", os, arch),
    )?;
    package_response(&state, request_id, key)
}

/// `.../{version}/download/{os}_{arch}`
pub async fn download_platform(
    State(state): State<Arc<AppState>>,
    Path((request_id, hostname, namespace, provider_type, version, platform)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> Result<Response, ErrorReply> {
    let request_id = parse_request(&state, &request_id)?;
    let key = parse_package(&hostname, &namespace, &provider_type, &version, &platform)?;
    package_response(&state, request_id, key)
}

fn package_response(
    state: &AppState,
    request_id: RequestId,
    key: PackageKey,
) -> Result<Response, ErrorReply> {
    let entry = state.fetcher.ensure(request_id, &key)?;

    match entry.state {
        EntryState::Ready => Ok(Json(download_metadata(request_id, &entry)).into_response()),
        EntryState::Pending | EntryState::Fetching => Ok(api_error(
            STILL_POPULATING,
            format!("{} is still being cached, retry shortly", key),
        )
        .into_response()),
        EntryState::Failed => {
            let reason = entry
                .last_error
                .unwrap_or_else(|| "package fetch failed".to_string());
            warn!(package = %key, request_id = %request_id, %reason, "Serving recorded failure");
            Err(api_error(StatusCode::BAD_GATEWAY, reason).into())
        }
    }
}

fn download_metadata(request_id: RequestId, entry: &CacheEntry) -> DownloadResponse {
    let key = &entry.key;
    let provider = key.provider();
    DownloadResponse {
        protocols: Vec::new(),
        os: key.platform.os.clone(),
        arch: key.platform.arch.clone(),
        filename: key.package_filename(),
        download_url: format!(
            "/{}/archives/{}/{}/{}/{}/{}",
            request_id,
            provider.hostname(),
            provider.namespace(),
            provider.provider_type(),
            key.version(),
            key.platform
        ),
        shasums_url: String::new(),
        shasums_signature_url: String::new(),
        shasum: entry.checksum.clone().unwrap_or_default(),
        signing_keys: serde_json::json!({ "gpg_public_keys": [] }),
    }
}

/// Cached archive bytes, exactly as fetched.
pub async fn archive(
    State(state): State<Arc<AppState>>,
    Path((request_id, hostname, namespace, provider_type, version, platform)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> Result<Response, ErrorReply> {
    parse_request(&state, &request_id)?;
    let key = parse_package(&hostname, &namespace, &provider_type, &version, &platform)?;

    let Some(bytes) = state.store.read_archive(&key).await? else {
        return Err(api_error(StatusCode::NOT_FOUND, format!("{} is not cached", key)).into());
    };
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", key.package_filename()),
            ),
        ],
        bytes,
    )
        .into_response())
}
