use std::path::{Path, PathBuf};

use actix_cors::Cors;
use actix_files::Files;
use actix_web::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context, Result};

/// Serves `root` read-only so the labeling UI can preview images whose task
/// references point at this server. Blocks until the server stops.
pub fn run_static_server(root: PathBuf, host: &str, port: u16) -> Result<()> {
    if !root.is_dir() {
        bail!("storage root {} is not a directory", root.display());
    }
    log::info!("Serving {} at http://{host}:{port}", root.display());

    let host = host.to_string();
    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                let root = root.clone();
                App::new()
                    .wrap(Logger::default())
                    .wrap(cors())
                    .wrap(allow_any_origin())
                    .configure(move |cfg| configure_static(cfg, &root))
            })
            .bind((host.as_str(), port))?
            .run()
            .await
        })
        .context("static file server failed")
}

pub fn configure_static(cfg: &mut web::ServiceConfig, root: &Path) {
    cfg.service(Files::new("/", root).show_files_listing());
}

fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .send_wildcard()
        .allowed_methods(vec!["GET", "HEAD", "OPTIONS"])
        .max_age(3600)
}

/// Plain responses carry the header too, not only CORS-negotiated ones.
fn allow_any_origin() -> DefaultHeaders {
    DefaultHeaders::new().add((ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
}
