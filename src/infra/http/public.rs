use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{ACCEPT_ENCODING, IF_MODIFIED_SINCE, IF_NONE_MATCH, USER_AGENT},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tracing::warn;

use crate::{
    application::{
        context::RequestContext,
        error::{ErrorReport, HttpError, ServeError},
        minify::MinifierRegistry,
        negotiate::ClientHeaders,
        resolve::{ResolvedSources, SourceResolver},
        serve::{AssetService, BufferedResponse, write_error_page},
    },
    cache::{CacheConfig, MemoryStore},
    config::{MinifySettings, Settings},
    domain::content_type::ContentType,
};

use super::middleware::{log_responses, set_request_id};

const SOURCE: &str = "infra::http::public";

#[derive(Clone)]
pub struct HttpState {
    pub service: AssetService,
    pub resolver: Arc<SourceResolver>,
    pub minify: Arc<MinifySettings>,
    pub minifiers: Arc<MinifierRegistry>,
}

impl HttpState {
    pub fn new(
        service: AssetService,
        resolver: SourceResolver,
        minify: MinifySettings,
        minifiers: MinifierRegistry,
    ) -> Self {
        Self {
            service,
            resolver: Arc::new(resolver),
            minify: Arc::new(minify),
            minifiers: Arc::new(minifiers),
        }
    }

    /// State wired from configuration: a memory store when caching is on, the
    /// asset root resolver and the configured minifiers.
    pub fn from_settings(settings: &Settings) -> Self {
        let service = if settings.cache.enabled {
            let config = CacheConfig::from(&settings.cache);
            AssetService::with_store(Arc::new(MemoryStore::new(&config)))
        } else {
            AssetService::uncached()
        };
        let resolver = SourceResolver::new(
            settings.assets.root.clone(),
            settings.assets.max_files,
            settings.assets.allowed_extensions.clone(),
            settings.assets.groups.clone(),
        );
        let minifiers = MinifierRegistry::from_settings(&settings.minify, &settings.html);
        Self::new(service, resolver, settings.minify.clone(), minifiers)
    }

    fn context(&self, content_type: ContentType) -> RequestContext {
        RequestContext::from_settings(content_type, &self.minify, (*self.minifiers).clone())
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/min", get(minify_files))
        .route("/g/{group}", get(minify_group))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_id))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MinQuery {
    /// Comma separated files relative to the asset root.
    f: Option<String>,
    /// Directory prefixed to every entry of `f`.
    b: Option<String>,
}

enum Resolution {
    Found(ResolvedSources),
    UnknownGroup(String),
}

async fn minify_files(
    State(state): State<HttpState>,
    Query(query): Query<MinQuery>,
    headers: HeaderMap,
) -> Response {
    let files = query.f.unwrap_or_default();
    respond(state, &headers, move |resolver| {
        resolver
            .resolve_files(query.b.as_deref(), &files)
            .map(Resolution::Found)
    })
    .await
}

async fn minify_group(
    State(state): State<HttpState>,
    Path(group): Path<String>,
    headers: HeaderMap,
) -> Response {
    respond(state, &headers, move |resolver| {
        Ok(match resolver.resolve_group(&group)? {
            Some(resolved) => Resolution::Found(resolved),
            None => Resolution::UnknownGroup(group),
        })
    })
    .await
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn respond<F>(state: HttpState, headers: &HeaderMap, resolve: F) -> Response
where
    F: FnOnce(&SourceResolver) -> Result<Resolution, ServeError> + Send + 'static,
{
    let client = client_headers(headers);
    let joined = tokio::task::spawn_blocking(move || {
        let mut sink = BufferedResponse::new();
        let result = match resolve(&state.resolver) {
            Ok(Resolution::Found(resolved)) => {
                let ctx = state.context(resolved.content_type);
                state
                    .service
                    .serve(&resolved.sources, &ctx, &client, &mut sink)
                    .map(|_| ())
            }
            Ok(Resolution::UnknownGroup(group)) => return Err(group),
            Err(err) => {
                write_error_page(&err, &state.minify.docs_url, &mut sink);
                Err(err)
            }
        };
        Ok((sink, result.err()))
    })
    .await;

    match joined {
        Ok(Ok((sink, error))) => into_response(sink, error),
        Ok(Err(group)) => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Unknown group",
            format!("group `{group}` is not configured"),
        )
        .into_response(),
        Err(err) => HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Asset pipeline failed",
            &err,
        )
        .into_response(),
    }
}

fn client_headers(headers: &HeaderMap) -> ClientHeaders {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    ClientHeaders {
        if_none_match: header(IF_NONE_MATCH),
        if_modified_since: header(IF_MODIFIED_SINCE),
        accept_encoding: header(ACCEPT_ENCODING),
        user_agent: header(USER_AGENT),
    }
}

fn into_response(sink: BufferedResponse, error: Option<ServeError>) -> Response {
    let status = StatusCode::from_u16(sink.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(sink.body));
    *response.status_mut() = status;

    let response_headers = response.headers_mut();
    for (name, value) in &sink.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response_headers.append(name, value);
            }
            _ => warn!(
                target = "tessera::http::public",
                op = "into_response",
                header = %name,
                "Dropping header that is not valid HTTP"
            ),
        }
    }

    if let Some(error) = error {
        ErrorReport::from_error(SOURCE, status, &error).attach(&mut response);
    }
    response
}
