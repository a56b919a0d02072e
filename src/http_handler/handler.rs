use std::path::PathBuf;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{stream, Stream, StreamExt, TryStreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::structs::{HttpError, HttpState, ServiceQuery};
use crate::pack::{PackService, RelayStream};

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `GET /<repo>.git/info/refs?service=<service>`
pub async fn info_refs(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    Query(query): Query<ServiceQuery>,
) -> Result<Response, HttpError> {
    let repo = path
        .strip_suffix("/info/refs")
        .ok_or(HttpError::NotFound)?;
    let service: PackService = query
        .service
        .ok_or_else(|| HttpError::BadRequest("missing service parameter".into()))?
        .parse()?;
    let repository = resolve(&state, repo).await?;

    debug!(service = %service, repository = %repository.display(), "advertising refs");
    let output = state.relay.relay(&repository, service, None)?;
    let body = output.map_err(HttpError::from).inspect_err(|err| {
        warn!(error = %err, "advertisement aborted");
    });

    Ok(pack_response(
        service.advertisement_content_type(),
        Body::from_stream(body),
    ))
}

/// `POST /<repo>.git/<service>` with the client's negotiation as the body.
///
/// The whole exchange must finish within the configured body timeout.
pub async fn exchange(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    body: Body,
) -> Result<Response, HttpError> {
    let deadline = Instant::now() + state.body_timeout;

    let (repo, service) = path.rsplit_once('/').ok_or(HttpError::NotFound)?;
    let service: PackService = service.parse().map_err(|_| HttpError::NotFound)?;
    let repository = resolve(&state, repo).await?;

    debug!(service = %service, repository = %repository.display(), "exchanging pack");
    let inbound = body
        .into_data_stream()
        .map_err(std::io::Error::other)
        .boxed();
    let mut output = state.relay.relay(&repository, service, Some(inbound))?;

    // Status and headers are only committed once the backend has produced output.
    let first = match timeout_at(deadline, output.next()).await {
        Err(_) => {
            warn!(repository = %repository.display(), "pack exchange timed out before output");
            return Err(HttpError::Timeout);
        }
        Ok(Some(Err(err))) => return Err(err.into()),
        Ok(Some(Ok(chunk))) => Some(chunk),
        Ok(None) => None,
    };

    let rest = with_deadline(output, deadline);
    let body = stream::iter(first.map(Ok)).chain(rest);

    Ok(pack_response(
        service.result_content_type(),
        Body::from_stream(body),
    ))
}

async fn resolve(state: &HttpState, repo: &str) -> Result<PathBuf, HttpError> {
    if !repo.ends_with(".git") {
        return Err(HttpError::NotFound);
    }
    state.repos.locate(repo).await.ok_or(HttpError::NotFound)
}

fn pack_response(content_type: String, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.as_str()),
            (header::CACHE_CONTROL, "no-store"),
            (header::EXPIRES, "0"),
        ],
        body,
    )
        .into_response()
}

/// Yields the rest of `output` until `deadline`, then ends with a timeout
/// error. The relay stream is dropped on any error, which stops the backend.
fn with_deadline(
    output: RelayStream,
    deadline: Instant,
) -> impl Stream<Item = Result<Bytes, HttpError>> + Send + 'static {
    stream::unfold(Some(output), move |output| async move {
        let mut output = output?;
        match timeout_at(deadline, output.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(output))),
            Ok(Some(Err(err))) => {
                warn!(error = %err, "pack exchange failed after output started");
                Some((Err(err.into()), None))
            }
            Ok(None) => None,
            Err(_) => {
                warn!("pack exchange timed out mid-stream");
                Some((Err(HttpError::Timeout), None))
            }
        }
    })
}
