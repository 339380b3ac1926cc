//! HTTP surface of the runner: `POST /run` feeds the worker pool,
//! `GET /challenge` serves challenge metadata.

use crate::app::App;

use arbiter_protocol::RunRequest;

use std::time::Duration;

use actix_web::{web, App as HttpApp, HttpResponse, HttpServer};
use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

/// Slack on top of the evaluation budget before an enqueued request is
/// abandoned with 408.
const ENQUEUE_GRACE_MS: u64 = 1000;

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/run").route(web::post().to(run)));
    cfg.service(web::resource("/challenge").route(web::get().to(challenge_meta)));
}

pub async fn run_server() -> Result<()> {
    let bind = App::get().config.bind.clone();

    let server = HttpServer::new(move || HttpApp::new().configure(register)).bind(bind.as_str())?;
    info!(%bind, "runner listening");
    server.run().await?;
    Ok(())
}

async fn run(body: web::Json<RunRequest>) -> HttpResponse {
    let app = App::get();
    let req = body.into_inner();

    // Oversized sources are rejected before they reach the queue.
    if req.code.len() > app.config.max_code_bytes {
        return HttpResponse::PayloadTooLarge().json(json!({ "error": "code too large" }));
    }

    let wait = Duration::from_millis(app.config.global_timeout_ms + ENQUEUE_GRACE_MS);
    let rx = match tokio::time::timeout(wait, app.pool.submit(req)).await {
        Ok(Some(rx)) => rx,
        Ok(None) => return HttpResponse::ServiceUnavailable().body("Runner not ready"),
        Err(_) => return HttpResponse::RequestTimeout().body("Request cancelled"),
    };

    match rx.await {
        Ok(resp) => HttpResponse::Ok().json(resp),
        Err(err) => {
            error!(%err, "worker dropped the reply channel");
            HttpResponse::InternalServerError().body("Internal Error")
        }
    }
}

#[derive(Debug, Deserialize)]
struct NameQuery {
    #[serde(default)]
    name: String,
}

async fn challenge_meta(query: web::Query<NameQuery>) -> HttpResponse {
    let name = query.name.trim();
    if name.is_empty() {
        return HttpResponse::BadRequest().body("Bad Request");
    }

    match App::get().store.challenge_meta(name).await {
        Ok(Some(meta)) => HttpResponse::Ok().json(meta),
        Ok(None) => HttpResponse::NotFound().body("Not Found"),
        Err(err) => {
            error!(%err, "failed to load challenge meta");
            HttpResponse::InternalServerError().body("Internal Error")
        }
    }
}
