mod api;
mod config;
mod history;
mod icecast;
mod listeners;
mod models;
mod openapi;
mod player;
mod poller;
mod state;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_files::{Files, NamedFile};
use actix_web::dev::{ServiceRequest, ServiceResponse, fn_service};
use actix_web::http::StatusCode;
use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::poller::{PollerConfig, PollerHandle, spawn_status_poller};
use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "radio-hub-server")]
struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:3000
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Static site directory
    #[arg(long)]
    http_dir: Option<PathBuf>,

    /// Server config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Work deferred to shutdown, run exactly once: stop the poller first,
/// then persist the livestream state, so a final tick cannot race the
/// snapshot.
struct ShutdownTasks {
    poller: PollerHandle,
    state: web::Data<AppState>,
    state_path: PathBuf,
}

fn run_shutdown(tasks: &Arc<Mutex<Option<ShutdownTasks>>>) {
    let taken = tasks.lock().ok().and_then(|mut t| t.take());
    let Some(tasks) = taken else {
        return;
    };
    tasks.poller.stop();
    let live = match tasks.state.live.lock() {
        Ok(live) => live.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    match history::save_state(&tasks.state_path, &live) {
        Ok(()) => tracing::info!(path = %tasks.state_path.display(), "livestream state saved"),
        Err(e) => tracing::error!(error = %e, "failed to save livestream state"),
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,radio_hub_server=info")
        }))
        .init();

    let cfg = match args.config.as_ref() {
        Some(path) => config::ServerConfig::load(path)?,
        None => {
            let auto_path = std::env::current_exe()
                .ok()
                .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
            match auto_path {
                Some(path) if path.exists() => config::ServerConfig::load(&path)?,
                _ => {
                    return Err(anyhow::anyhow!("config file is required; use --config"));
                }
            }
        }
    };

    let bind = match args.bind {
        Some(addr) => addr,
        None => config::bind_from_config(&cfg)?.unwrap_or_else(|| {
            std::net::SocketAddr::from((std::net::Ipv4Addr::UNSPECIFIED, 3000))
        }),
    };
    let http_dir = match args.http_dir {
        Some(dir) => {
            if !dir.is_dir() {
                return Err(anyhow::anyhow!("http_dir {:?} is not a directory", dir));
            }
            dir
        }
        None => config::http_dir_from_config(&cfg)?,
    };
    let channels = config::channels_from_config(&cfg)?;
    let status_url = config::icecast_status_url_from_config(&cfg)?;
    let livestream = config::livestream_from_config(&cfg, &channels)?;
    let state_path = config::state_path_from_config(&cfg)?;

    tracing::info!(
        bind = %bind,
        http_dir = %http_dir.display(),
        channels = ?channels.iter().map(|ch| ch.id.clone()).collect::<Vec<_>>(),
        live_channel = %livestream.channel,
        "starting radio-hub-server"
    );

    let live = history::load_state(&state_path, &livestream);
    let state = web::Data::new(AppState::new(
        channels,
        live,
        livestream,
        http_dir.clone(),
    ));

    let poller = spawn_status_poller(
        state.clone(),
        PollerConfig {
            status_url,
            influxdb: cfg.influxdb.clone(),
            interval: POLL_INTERVAL,
        },
    );

    let shutdown = Arc::new(Mutex::new(Some(ShutdownTasks {
        poller,
        state: state.clone(),
        state_path,
    })));
    let ctrlc_shutdown = shutdown.clone();
    let _ = ctrlc::set_handler(move || {
        run_shutdown(&ctrlc_shutdown);
        std::process::exit(0);
    });

    let app_state = state.clone();
    HttpServer::new(move || {
        let not_found_page = app_state.http_dir.join("404.html");
        let files = Files::new("/", app_state.http_dir.clone())
            .index_file("index.html")
            .default_handler(fn_service(move |req: ServiceRequest| {
                let page = not_found_page.clone();
                async move {
                    let (req, _) = req.into_parts();
                    let mut res = match NamedFile::open_async(&page).await {
                        Ok(file) => file.into_response(&req),
                        Err(_) => actix_web::HttpResponse::NotFound().body("not found"),
                    };
                    *res.status_mut() = StatusCode::NOT_FOUND;
                    Ok::<_, actix_web::Error>(ServiceResponse::new(req, res))
                }
            }));
        App::new()
            .app_data(app_state.clone())
            .wrap(
                Logger::default()
                    .exclude("/health")
                    .exclude("/metrics")
                    .exclude_regex("^/playlist/"),
            )
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::channel_playlist)
            .service(api::dj_start)
            .service(api::dj_stop)
            .service(api::listener_metrics)
            .service(api::health::health)
            .service(files)
    })
    .bind(bind)?
    .run()
    .await?;

    run_shutdown(&shutdown);
    Ok(())
}
