//! HTTP request adapter — a thin layer over the core services.
//!
//! Every handler does the same three things: count the request, translate
//! the wire body to domain types (anything unparseable is a 400), and call
//! into the backend or the dispatcher.  Uploads are acknowledged at enqueue
//! time; only reads can surface storage errors to the client.
//!
//! Routing is a single exhaustive match on `(method, path)`.  Paths ending
//! in `.json` answer `application/json; charset=utf-8`; the rest are
//! `text/plain; charset=utf-8`.

use crate::api::{
    BlockJson, ConcatDataJson, DataArrayJson, ErrorJson, FileListJson, HashListJson, MetaMessage,
    VersionJson,
};
use crate::codec;
use crate::digest::Digest;
use crate::ingest::Dispatcher;
use crate::meta::{self, ListFilter};
use crate::stats::{Endpoint, ServerStats};
use crate::store::{Backend, StoreError};
use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, HeaderMap, Method, Request, Response, Server, StatusCode};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Long-lived services shared by every request.
pub struct ServerContext {
    pub backend: Arc<dyn Backend>,
    pub dispatcher: Dispatcher,
    pub stats: Arc<ServerStats>,
}

// ── Error envelope ───────────────────────────────────────────────────────────

struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<StoreError> for HttpError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Config(_) => StatusCode::NOT_IMPLEMENTED,
            StoreError::IoRead(_) | StoreError::IoWrite(_) | StoreError::Corrupt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

type HandlerResult = Result<Response<Body>, HttpError>;

// ── Entry point ──────────────────────────────────────────────────────────────

/// Serve until `shutdown` resolves.  Binding failures are startup failures
/// and propagate to the caller.
pub async fn serve(
    ctx: Arc<ServerContext>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()>,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let ctx = ctx.clone();
                async move { Ok::<_, Infallible>(handle(ctx, req).await) }
            }))
        }
    });
    Server::try_bind(&addr)?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
}

/// One request in, one response out — the service function behind [`serve`].
/// Public so embedders and tests can mount it on their own listener.
pub async fn handle(ctx: Arc<ServerContext>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let response = match route(&ctx, req).await {
        Ok(resp) => resp,
        Err(e) => {
            if e.status.is_server_error() {
                error!("{method} {path}: {}", e.message);
            }
            json_response(e.status, &ErrorJson::new(e.status.as_u16(), &e.message))
        }
    };
    debug!("{method} {path} -> {}", response.status());
    response
}

async fn route(ctx: &Arc<ServerContext>, req: Request<Body>) -> HandlerResult {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    match (&method, path.as_str()) {
        (&Method::GET, "/Version.json") => {
            ctx.stats.count_get(Endpoint::Version);
            Ok(json_response(StatusCode::OK, &VersionJson::current()))
        }
        (&Method::GET, "/Version") => {
            ctx.stats.count_get(Endpoint::Version);
            Ok(text_response(StatusCode::OK, VersionJson::current().banner()))
        }
        (&Method::GET, "/Stats.json") => {
            ctx.stats.count_get(Endpoint::Stats);
            Ok(json_response(StatusCode::OK, &ctx.stats.snapshot()))
        }
        (&Method::GET, "/File/List.json") => file_list(ctx, req.uri().query()),
        (&Method::GET, "/Data/Hash_Array.json") => hash_array_get(ctx, req.headers()),
        (&Method::GET, p) if p.starts_with("/Data/") && p.ends_with(".json") => {
            data_get(ctx, &path)
        }
        (&Method::POST, "/Meta.json") => meta_post(ctx, req).await,
        (&Method::POST, "/Hash_Array.json") => hash_array_post(ctx, req).await,
        (&Method::POST, "/Data.json") => data_post(ctx, req).await,
        (&Method::POST, "/Data_Array.json") => data_array_post(ctx, req).await,
        _ => {
            ctx.stats.count_unknown();
            Err(HttpError::not_found(format!("unknown URL {path}")))
        }
    }
}

// ── GET handlers ─────────────────────────────────────────────────────────────

fn file_list(ctx: &ServerContext, query: Option<&str>) -> HandlerResult {
    ctx.stats.count_get(Endpoint::FileList);
    let args: HashMap<String, String> = url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .into_owned()
        .collect();

    let host = args
        .get("hostname")
        .ok_or_else(|| HttpError::bad_request("missing hostname argument"))?;
    validate_hostname(host)?;

    let mut filter = ListFilter::default();
    if let Some(encoded) = args.get("filename") {
        let pattern = decode_b64_text(encoded, "filename")?;
        filter = filter
            .with_name_pattern(&pattern)
            .map_err(|e| HttpError::bad_request(format!("bad filename regex: {e}")))?;
    }
    if let Some(encoded) = args.get("date") {
        filter.date = Some(decode_b64_text(encoded, "date")?);
    }
    if let Some(arg) = args.get("afterdate") {
        filter.after = Some(
            meta::parse_time_bound(arg, false)
                .ok_or_else(|| HttpError::bad_request("unparseable afterdate"))?,
        );
    }
    if let Some(arg) = args.get("beforedate") {
        filter.before = Some(
            meta::parse_time_bound(arg, true)
                .ok_or_else(|| HttpError::bad_request("unparseable beforedate"))?,
        );
    }
    filter.latest_only = args.get("latest").map_or(false, |v| v == "True");
    filter.reduced = args.get("reduced").map_or(false, |v| v == "True");

    let file_list = ctx.backend.list_files(host, &filter)?;
    Ok(json_response(StatusCode::OK, &FileListJson { file_list }))
}

fn data_get(ctx: &ServerContext, path: &str) -> HandlerResult {
    ctx.stats.count_get(Endpoint::Data);
    let hex = path
        .strip_prefix("/Data/")
        .and_then(|p| p.strip_suffix(".json"))
        .unwrap_or("");
    let digest =
        Digest::from_hex(hex).map_err(|e| HttpError::bad_request(e.to_string()))?;
    let block = ctx.backend.get_block(&digest)?;
    Ok(json_response(StatusCode::OK, &BlockJson::from_record(&block)))
}

fn hash_array_get(ctx: &ServerContext, headers: &HeaderMap) -> HandlerResult {
    ctx.stats.count_get(Endpoint::HashArray);
    let value = headers
        .get("X-Get-Hash-Array")
        .ok_or_else(|| HttpError::bad_request("missing X-Get-Hash-Array header"))?
        .to_str()
        .map_err(|_| HttpError::bad_request("X-Get-Hash-Array is not ASCII"))?;

    let mut concatenated = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let digest = Digest::from_base64(item)
            .map_err(|e| HttpError::bad_request(format!("bad digest {item:?}: {e}")))?;
        let block = ctx.backend.get_block(&digest)?;
        let plain = codec::inflate(&block.descriptor, &block.payload)
            .map_err(|e| HttpError::internal(format!("block {digest} unreadable: {e}")))?;
        concatenated.extend_from_slice(&plain);
    }
    Ok(json_response(
        StatusCode::OK,
        &ConcatDataJson {
            size: concatenated.len() as u64,
            data: base64::encode(&concatenated),
        },
    ))
}

// ── POST handlers ────────────────────────────────────────────────────────────

async fn meta_post(ctx: &ServerContext, req: Request<Body>) -> HandlerResult {
    ctx.stats.count_post(Endpoint::Meta);
    let bytes = read_body(req).await?;
    let msg: MetaMessage = parse_json(&bytes)?;
    validate_hostname(&msg.hostname)?;

    // Answer from the store as it is now; the record itself becomes durable
    // asynchronously.
    let hash_list = ctx.backend.needed(&msg.meta.hash_list);
    ctx.dispatcher.submit_metadata(msg.hostname, msg.meta);
    Ok(json_response(StatusCode::OK, &HashListJson { hash_list }))
}

async fn hash_array_post(ctx: &ServerContext, req: Request<Body>) -> HandlerResult {
    ctx.stats.count_post(Endpoint::HashArray);
    let bytes = read_body(req).await?;
    let msg: HashListJson = parse_json(&bytes)?;
    let hash_list = ctx.backend.needed(&msg.hash_list);
    Ok(json_response(StatusCode::OK, &HashListJson { hash_list }))
}

async fn data_post(ctx: &ServerContext, req: Request<Body>) -> HandlerResult {
    ctx.stats.count_post(Endpoint::Data);
    let bytes = read_body(req).await?;
    let block: BlockJson = parse_json(&bytes)?;
    let record = block
        .into_record()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;
    ctx.dispatcher.submit_block(record);
    Ok(text_response(StatusCode::OK, "Ok!\n"))
}

async fn data_array_post(ctx: &ServerContext, req: Request<Body>) -> HandlerResult {
    ctx.stats.count_post(Endpoint::DataArray);
    let bytes = read_body(req).await?;
    let msg: DataArrayJson = parse_json(&bytes)?;
    // Validate the whole batch before enqueueing any of it.
    let records = msg
        .data_array
        .into_iter()
        .map(BlockJson::into_record)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;
    for record in records {
        ctx.dispatcher.submit_block(record);
    }
    Ok(text_response(StatusCode::OK, "Ok!\n"))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Host names become file names under `meta/`; only plain host-name
/// characters are allowed through.
fn validate_hostname(host: &str) -> Result<(), HttpError> {
    let ok = !host.is_empty()
        && host.len() <= 255
        && !host.starts_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err(HttpError::bad_request(format!("invalid hostname {host:?}")))
    }
}

fn decode_b64_text(encoded: &str, what: &str) -> Result<String, HttpError> {
    let bytes = base64::decode(encoded)
        .map_err(|_| HttpError::bad_request(format!("{what} is not base64")))?;
    String::from_utf8(bytes)
        .map_err(|_| HttpError::bad_request(format!("{what} is not UTF-8")))
}

async fn read_body(req: Request<Body>) -> Result<hyper::body::Bytes, HttpError> {
    hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| HttpError::bad_request(format!("unreadable body: {e}")))
}

fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, HttpError> {
    serde_json::from_slice(bytes)
        .map_err(|e| HttpError::bad_request(format!("malformed JSON body: {e}")))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_owned());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from(body))
        .expect("static response parts")
}

fn text_response(status: StatusCode, text: impl Into<String>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(text.into()))
        .expect("static response parts")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_validation() {
        assert!(validate_hostname("web-01.example.org").is_ok());
        assert!(validate_hostname("host_7").is_ok());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("../etc").is_err());
        assert!(validate_hostname("a/b").is_err());
        assert!(validate_hostname(".hidden").is_err());
    }
}
