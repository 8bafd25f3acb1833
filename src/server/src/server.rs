//! Assembles the `actix-web` application -- the REST job command shell,
//! the `/events` WebSocket upgrade, and a health check -- on top of a
//! running [`flowline_pipeline::Pipeline`].

use crate::state::AppState;
use crate::{config, handlers, ws};
use actix_web::{web, App, HttpServer};
use flowline_core::Processor;
use flowline_pipeline::{Pipeline, PipelineConfig};
use std::error::Error;
use std::path::PathBuf;
use std::{env, sync::Arc};

fn shell_command_factory() -> Box<dyn Processor> {
    Box::new(flowline_processor_shell_command::ShellCommand {
        command: "true".to_owned(),
        arguments: None,
        stdin: None,
        cwd: None,
        paths: None,
    })
}

fn http_request_factory() -> Box<dyn Processor> {
    Box::new(flowline_processor_http_request::HttpRequest {
        url: String::new(),
        method: flowline_processor_http_request::Method::Get,
        headers: Vec::new(),
        body: None,
        assert_status: Vec::new(),
    })
}

fn frontmatter_update_factory() -> Box<dyn Processor> {
    Box::new(flowline_processor_frontmatter_update::FrontmatterUpdate {
        path: None,
        updates: serde_json::Map::new(),
    })
}

/// The running server: a bound socket driving a [`Pipeline`].
pub(crate) struct Server {
    state: AppState,
    bind: String,
}

impl Server {
    /// Build a [`Pipeline`] and its serving configuration from environment
    /// variables: `DATABASE_URL`, `PLUGIN_DIR`, `WATCH_CONFIG` (optional),
    /// `SERVER_BIND` (defaults to `0.0.0.0:8000`).
    pub(crate) async fn from_environment() -> Result<Self, Box<dyn Error>> {
        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "flowline.db".to_owned());
        let plugin_dir = env::var("PLUGIN_DIR").unwrap_or_else(|_| "plugins".to_owned());
        let bind = env::var("SERVER_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_owned());

        let mut pipeline_config = PipelineConfig::new(database_url, PathBuf::from(plugin_dir))
            .with_factory("shell-command", shell_command_factory)
            .with_factory("http-request", http_request_factory)
            .with_factory("frontmatter-update", frontmatter_update_factory);

        if let Ok(watch_config_path) = env::var("WATCH_CONFIG") {
            for watch in config::load_watch_config(&PathBuf::from(watch_config_path))? {
                pipeline_config = pipeline_config.with_watch(watch);
            }
        }

        let pipeline = Pipeline::start(pipeline_config).await?;

        Ok(Self {
            state: Arc::new(pipeline),
            bind,
        })
    }

    /// Serve until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if `bind` could not be bound.
    pub(crate) async fn run_to_completion(self) -> std::io::Result<()> {
        let data = web::Data::new(self.state);

        HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .route("/health", web::get().to(handlers::health))
                .route("/events", web::get().to(ws::events))
                .service(
                    web::scope("/jobs")
                        .route("", web::post().to(handlers::create_job))
                        .route("", web::get().to(handlers::list_jobs))
                        .route("/{id}", web::get().to(handlers::get_job))
                        .route("/{id}", web::delete().to(handlers::delete_job))
                        .route("/{id}/resume", web::post().to(handlers::resume_job))
                        .route("/{id}/cancel", web::post().to(handlers::cancel_job))
                        .route("/{id}/revert", web::post().to(handlers::revert_job)),
                )
        })
        .bind(self.bind)?
        .run()
        .await
    }
}
