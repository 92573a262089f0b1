use std::sync::Arc;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use vislabel_contracts::tasks::parse_task_value;
use vislabel_engine::InferenceBackend;

/// Serves the prediction routes an annotation host calls. Blocks until the
/// server stops.
pub fn run_ml_backend(backend: Arc<dyn InferenceBackend>, host: &str, port: u16) -> Result<()> {
    log::info!(
        "ML backend listening at http://{host}:{port} (model {})",
        backend.model_version()
    );
    let backend = web::Data::from(backend);
    let server_backend = backend.clone();
    let host = host.to_string();
    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                App::new()
                    .wrap(Logger::default())
                    .app_data(server_backend.clone())
                    .configure(configure_routes)
            })
            .bind((host.as_str(), port))?
            .run()
            .await
        })
        .context("ML backend server failed")?;
    // Last handle is released here, off the async workers, since the Ark
    // client owns a blocking runtime.
    drop(backend);
    Ok(())
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/setup").route(web::post().to(setup)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/").route(web::get().to(health)));
}

async fn predict(
    backend: web::Data<dyn InferenceBackend>,
    body: web::Json<Value>,
) -> actix_web::Result<HttpResponse> {
    let tasks = match parse_task_value(body.into_inner()) {
        Ok(tasks) => tasks,
        Err(err) => {
            log::warn!("Rejected predict request: {err:#}");
            return Ok(HttpResponse::BadRequest().json(json!({ "error": format!("{err:#}") })));
        }
    };
    log::info!("Predict request with {} tasks", tasks.len());

    let backend = backend.into_inner();
    let model_version = backend.model_version().to_string();
    let results = web::block(move || backend.predict(&tasks)).await?;
    Ok(HttpResponse::Ok().json(json!({
        "results": results,
        "model_version": model_version,
    })))
}

async fn setup(backend: web::Data<dyn InferenceBackend>) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "model_version": backend.model_version() }))
}

async fn health(backend: web::Data<dyn InferenceBackend>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "UP",
        "model_version": backend.model_version(),
    }))
}
