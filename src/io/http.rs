//! HTTP API - scan submission, identifier resolution, event stream
//!
//! Uses hyper for the HTTP server. Endpoints:
//! - `POST /api/scan` - validate a ticket code, synchronous outcome
//! - `POST /api/resolve` - resolve a login identifier to canonical form
//! - `GET /api/events?client=<id>` - long-lived SSE stream of domain events
//! - `GET /healthz` - liveness probe
//!
//! The SSE stream forwards broadcaster deliveries as `event:`/`data:`
//! frames with the per-subscriber sequence as the SSE id; heartbeat frames
//! become comment lines so intermediaries see periodic traffic.

use crate::domain::event::DomainEvent;
use crate::domain::identifier::{resolve, ChannelHint, DialingPlan};
use crate::domain::ticket::{ActorId, TicketCode};
use crate::io::egress_channel::EgressSender;
use crate::services::broadcaster::{Broadcaster, ClientId, Delivery};
use crate::services::validator::{ValidateError, ValidationEngine};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Shared handles the API needs to serve requests
pub struct ApiContext {
    pub engine: Arc<ValidationEngine>,
    pub bus: Arc<Broadcaster>,
    pub dialing_plan: DialingPlan,
    /// MQTT egress sender for subscriber lifecycle events (optional)
    pub egress: Option<EgressSender>,
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    code: String,
    actor: String,
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    identifier: String,
    #[serde(default)]
    hint: Option<ChannelHint>,
}

type ApiBody = BoxBody<Bytes, Infallible>;

/// Streaming body fed from an mpsc channel; ends when the sender drops
struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl hyper::body::Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn full_body(content: impl Into<Bytes>) -> ApiBody {
    Full::new(content.into()).boxed()
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<ApiBody> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full_body(value.to_string()))
        .unwrap_or_else(|_| Response::new(full_body("")))
}

fn bad_request(message: &str) -> Response<ApiBody> {
    json_response(StatusCode::BAD_REQUEST, serde_json::json!({ "error": message }))
}

fn not_found() -> Response<ApiBody> {
    json_response(StatusCode::NOT_FOUND, serde_json::json!({ "error": "not_found" }))
}

/// Extract a query parameter value from a raw query string
fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Render one broadcaster delivery as an SSE frame
fn sse_frame(delivery: &Delivery) -> String {
    match delivery.event.as_ref() {
        DomainEvent::Heartbeat { ts } => format!(": hb {ts}\n\n"),
        event => format!(
            "id: {}\nevent: {}\ndata: {}\n\n",
            delivery.seq,
            event.kind().as_str(),
            event.to_wire_json()
        ),
    }
}

async fn handle_scan(ctx: &ApiContext, body: Bytes) -> Response<ApiBody> {
    let request: ScanRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "scan_bad_request");
            return bad_request("invalid scan request");
        }
    };

    let code = TicketCode(request.code);
    let actor = ActorId(request.actor);

    match ctx.engine.validate(&code, &actor).await {
        Ok(scan) => {
            let mut response = serde_json::json!({ "outcome": scan.outcome.as_str() });
            if let Some(reason) = scan.outcome.reject_reason() {
                response["reason"] = serde_json::Value::String(reason.as_str().to_string());
            }
            if let Some(ticket) = &scan.ticket {
                response["ticket"] =
                    serde_json::to_value(ticket).unwrap_or(serde_json::Value::Null);
            }
            json_response(StatusCode::OK, response)
        }
        Err(ValidateError::StoreUnavailable(_)) => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({ "error": "store_unavailable" }),
        ),
    }
}

fn handle_resolve(ctx: &ApiContext, body: Bytes) -> Response<ApiBody> {
    let request: ResolveRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "resolve_bad_request");
            return bad_request("invalid resolve request");
        }
    };

    let resolved = resolve(&request.identifier, request.hint, &ctx.dialing_plan);
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "kind": resolved.kind.as_str(),
            "canonical": resolved.canonical,
        }),
    )
}

/// Open an SSE stream for a client id and forward its deliveries
fn handle_events(ctx: &ApiContext, query: Option<&str>) -> Response<ApiBody> {
    let Some(client) = query.and_then(|q| query_param(q, "client")).filter(|c| !c.is_empty())
    else {
        return bad_request("missing client parameter");
    };

    let client_id = ClientId::from(client);
    let mut subscription = ctx.bus.subscribe(client_id.clone());
    if let Some(egress) = &ctx.egress {
        egress.send_subscriber("connected", client_id.as_str());
    }

    let (tx, rx) = mpsc::channel::<Bytes>(8);
    let egress = ctx.egress.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                delivery = subscription.recv() => {
                    let Some(delivery) = delivery else { break };
                    let chunk = Bytes::from(sse_frame(&delivery));
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                // Client hung up; dropping the subscription unsubscribes
                _ = tx.closed() => {
                    debug!(client_id = %subscription.client_id(), "event_stream_client_gone");
                    break;
                }
            }
        }
        if let Some(egress) = &egress {
            egress.send_subscriber("disconnected", subscription.client_id().as_str());
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .body(ChannelBody { rx }.boxed())
        .unwrap_or_else(|_| Response::new(full_body("")))
}

async fn route(
    ctx: Arc<ApiContext>,
    req: Request<Incoming>,
) -> Result<Response<ApiBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/api/scan") => match req.into_body().collect().await {
            Ok(body) => handle_scan(&ctx, body.to_bytes()).await,
            Err(e) => {
                warn!(error = %e, "scan_body_read_failed");
                bad_request("unreadable body")
            }
        },
        (&Method::POST, "/api/resolve") => match req.into_body().collect().await {
            Ok(body) => handle_resolve(&ctx, body.to_bytes()),
            Err(e) => {
                warn!(error = %e, "resolve_body_read_failed");
                bad_request("unreadable body")
            }
        },
        (&Method::GET, "/api/events") => handle_events(&ctx, query.as_deref()),
        (&Method::GET, "/healthz") => json_response(
            StatusCode::OK,
            serde_json::json!({ "status": "ok", "build": env!("GIT_HASH") }),
        ),
        _ => not_found(),
    };

    Ok(response)
}

/// Serve the API on an already-bound listener until shutdown
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ApiContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "api_accept_failed");
                        continue;
                    }
                };

                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| route(ctx.clone(), req));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(remote = %remote, error = %e, "api_connection_ended");
                    }
                });
            }
        }
    }
}

/// Bind and run the HTTP API server
pub async fn start_api_server(
    bind_address: &str,
    port: u16,
    ctx: Arc<ApiContext>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{bind_address}:{port}")
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid API bind address: {e}"))?;

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "api_bind_failed");
            return Err(e.into());
        }
    };

    info!(addr = %addr, "api_server_started");
    serve(listener, ctx, shutdown).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::ValidationEvent;
    use crate::domain::ticket::ValidationOutcome;

    #[test]
    fn test_query_param() {
        assert_eq!(query_param("client=dash-1", "client"), Some("dash-1"));
        assert_eq!(query_param("a=1&client=dash-1&b=2", "client"), Some("dash-1"));
        assert_eq!(query_param("a=1&b=2", "client"), None);
        assert_eq!(query_param("", "client"), None);
    }

    #[test]
    fn test_sse_frame_for_validation() {
        let event = ValidationEvent::new(
            TicketCode::from("T-1001"),
            ValidationOutcome::Accepted,
            ActorId::from("scanner-7"),
            None,
        );
        let delivery = Delivery {
            seq: 3,
            event: Arc::new(DomainEvent::Validation(event)),
        };

        let frame = sse_frame(&delivery);
        assert!(frame.starts_with("id: 3\nevent: validation\ndata: "));
        assert!(frame.ends_with("\n\n"));

        let data_line = frame.lines().find(|l| l.starts_with("data: ")).unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(data_line.trim_start_matches("data: ")).unwrap();
        assert_eq!(payload["t"], "validation");
        assert_eq!(payload["p"]["code"], "T-1001");
    }

    #[test]
    fn test_sse_frame_for_heartbeat_is_comment() {
        let delivery = Delivery {
            seq: 9,
            event: Arc::new(DomainEvent::Heartbeat { ts: 1754560000000 }),
        };
        assert_eq!(sse_frame(&delivery), ": hb 1754560000000\n\n");
    }
}
