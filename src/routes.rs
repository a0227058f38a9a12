// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! HTTP routes: ingestion at `POST /` plus the status and query API.

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full, LengthLimitError, Limited};
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error};

use crate::app::App;
use crate::error::IngestionError;

pub type ResponseBody = BoxBody<Bytes, Infallible>;

const ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// Largest accepted ingestion body.
pub const MAX_BODY_BYTES: usize = 100 * 1024;

/// Route a request to its handler.
pub async fn handle_request<B>(
    req: Request<B>,
    app: Arc<App>,
) -> Result<Response<ResponseBody>, Infallible>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(%method, %path, "request");

    let resp = match (&method, path.as_str()) {
        (&Method::POST, "/") => ingest(req, &app).await,
        (&Method::GET, "/endpoint") => json_response(StatusCode::OK, &json!(app.status())),
        (&Method::GET, "/requests") => requests(&app),
        (&Method::GET, "/newEndpoint") => {
            json_response(StatusCode::OK, &json!(app.rotate_and_status().await))
        }
        (&Method::OPTIONS, _) => preflight(),
        _ => json_response(StatusCode::NOT_FOUND, &json!({"Status": "Not Found"})),
    };

    Ok(resp)
}

async fn ingest<B>(req: Request<B>, app: &App) -> Response<ResponseBody>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match read_payload(req).await {
        Ok(payload) => {
            app.record(payload);
            json_response(StatusCode::OK, &json!({"Status": "Successful!"}))
        }
        Err(e) => {
            error!(error = %e, "failed to ingest request");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"Status": "Failed!"}),
            )
        }
    }
}

async fn read_payload<B>(req: Request<B>) -> Result<Value, IngestionError>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            return Err(IngestionError::TooLarge {
                limit: MAX_BODY_BYTES,
            });
        }
        Err(e) => return Err(IngestionError::Body(e.to_string())),
    };

    // an empty body counts as an empty object
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn requests(app: &App) -> Response<ResponseBody> {
    let current: Vec<Value> = app.history().iter().map(|e| e.to_keyed_json()).collect();
    json_response(StatusCode::OK, &json!({ "currentRequests": current }))
}

fn preflight() -> Response<ResponseBody> {
    let mut resp = Response::new(Full::new(Bytes::new()).boxed());
    *resp.status_mut() = StatusCode::NO_CONTENT;
    let headers = resp.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    resp
}

fn json_response(status: StatusCode, body: &Value) -> Response<ResponseBody> {
    let bytes = Bytes::from(body.to_string());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Full::new(bytes.clone()).boxed())
        .unwrap_or_else(|e| {
            error!("failed to build response: {}", e);
            Response::new(Full::new(bytes).boxed())
        })
}
