use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use stats_server::server::{unix_now, StatsServer};
use worker_stats::merge_statuses;

/// Cap on worker ids accepted by one /worker_status request.
const MAX_WORKER_IDS: usize = 100;

pub async fn run_http_server(address: String, server: Arc<StatsServer>) -> std::io::Result<()> {
    let listener = TcpListener::bind(&address).await?;
    info!("query API listening on http://{}", address);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let server = server.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let server = server.clone();
                async move { handle_request(req, server).await }
            });

            if let Err(err) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                error!("error serving connection: {:?}", err);
            }
        });
    }
}

async fn handle_request(
    req: Request<Incoming>,
    server: Arc<StatsServer>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    server.request_count.fetch_add(1, Ordering::Relaxed);

    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => serve_server_status(&server),
        (&Method::GET, "/worker_status") => {
            serve_worker_status(&server, req.uri().query().unwrap_or(""))
        }
        (&Method::GET, "/health") => serve_health(&server),
        _ => {
            let mut response = Response::new(Full::new(Bytes::from("Not Found")));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };

    Ok(response)
}

fn serve_server_status(server: &StatsServer) -> Response<Full<Bytes>> {
    let status = server.server_status(unix_now());
    let body = serde_json::to_string(&status).unwrap_or_else(|_| "{}".to_string());
    json_response(StatusCode::OK, server, body)
}

fn serve_worker_status(server: &StatsServer, query: &str) -> Response<Full<Bytes>> {
    let parsed = match parse_worker_query(query) {
        Ok(parsed) => parsed,
        Err(msg) => {
            let body = json!({ "error": msg }).to_string();
            return json_response(StatusCode::BAD_REQUEST, server, body);
        }
    };

    let now = unix_now();
    let statuses = server.worker_statuses(parsed.user_id, &parsed.worker_ids, now);

    let body = if parsed.is_merge {
        serde_json::to_string(&merge_statuses(&statuses))
    } else {
        let by_worker: serde_json::Map<String, serde_json::Value> = parsed
            .worker_ids
            .iter()
            .zip(&statuses)
            .map(|(worker_id, status)| {
                (
                    worker_id.to_string(),
                    serde_json::to_value(status).unwrap_or_default(),
                )
            })
            .collect();
        serde_json::to_string(&by_worker)
    }
    .unwrap_or_else(|_| "{}".to_string());

    json_response(StatusCode::OK, server, body)
}

fn serve_health(server: &StatsServer) -> Response<Full<Bytes>> {
    let running = server.is_running();
    let status_code = if running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({ "healthy": running }).to_string();
    json_response(status_code, server, body)
}

fn json_response(status: StatusCode, server: &StatsServer, body: String) -> Response<Full<Bytes>> {
    if status == StatusCode::OK {
        server
            .response_bytes
            .fetch_add(body.len() as u64, Ordering::Relaxed);
    }
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

#[derive(Debug, PartialEq)]
struct WorkerQuery {
    user_id: i32,
    worker_ids: Vec<i64>,
    is_merge: bool,
}

fn parse_worker_query(query: &str) -> Result<WorkerQuery, String> {
    let mut user_id = None;
    let mut worker_ids = Vec::new();
    let mut is_merge = false;

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        match name {
            "user_id" => {
                user_id = Some(
                    value
                        .parse::<i32>()
                        .map_err(|_| format!("invalid user_id: {value}"))?,
                );
            }
            "worker_id" => {
                for id in value.split(',').filter(|id| !id.is_empty()) {
                    worker_ids.push(
                        id.parse::<i64>()
                            .map_err(|_| format!("invalid worker_id: {id}"))?,
                    );
                }
            }
            "is_merge" => {
                is_merge = match value {
                    "1" => true,
                    "0" | "" => false,
                    other => return Err(format!("invalid is_merge: {other}")),
                };
            }
            _ => {}
        }
    }

    let user_id = user_id.ok_or_else(|| "missing user_id".to_string())?;
    if worker_ids.is_empty() {
        return Err("missing worker_id".to_string());
    }
    if worker_ids.len() > MAX_WORKER_IDS {
        return Err(format!("at most {MAX_WORKER_IDS} worker ids per request"));
    }

    Ok(WorkerQuery {
        user_id,
        worker_ids,
        is_merge,
    })
}
