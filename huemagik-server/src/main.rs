//! HTTP backend for HueMagik: extracts dominant color palettes from uploaded images.

#![deny(unsafe_code, unsafe_op_in_unsafe_fn)]
#![warn(
    clippy::pedantic,
    clippy::cargo,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::unwrap_in_result,
    clippy::unneeded_field_pattern,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::unnecessary_self_imports,
    clippy::str_to_string,
    clippy::string_to_string,
    missing_docs,
    clippy::missing_docs_in_private_items,
    rustdoc::all
)]
#![allow(clippy::module_name_repetitions)]

mod cli;
mod http;
mod multipart;
mod routes;

use clap::Parser;
use cli::Options;
use routes::App;
use std::{process::ExitCode, sync::Arc};
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = Options::parse();

    log::info!("Starting HueMagik backend...");

    let app = Arc::new(App {
        allowed_origins: options.origins(),
        max_body_size: options.max_body_size,
        seed: options.seed,
    });

    let listener = match TcpListener::bind((options.host.as_str(), options.port)).await {
        Ok(listener) => listener,
        Err(error) => {
            log::error!("Failed to bind {}:{}: {error}", options.host, options.port);
            return ExitCode::FAILURE;
        }
    };

    match listener.local_addr() {
        Ok(address) => log::info!("Listening on http://{address}"),
        Err(error) => log::warn!("Listening, but the local address is unavailable: {error}"),
    }

    if let Err(error) = serve(listener, app).await {
        log::error!("Server error: {error}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Accept connections until ctrl-c, handling each one in its own task
async fn serve(listener: TcpListener, app: Arc<App>) -> std::io::Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let app = Arc::clone(&app);
                tokio::spawn(async move {
                    handle_connection(stream, &app).await;
                });
            }
        }
    }
}

/// Read one request off the connection, dispatch it, and write the response.
///
/// Connections are not kept alive; every response carries `Connection: close`.
async fn handle_connection(mut stream: TcpStream, app: &App) {
    let response = match http::read_request(&mut stream, app.max_body_size).await {
        Ok(request) => routes::dispatch(app, &request).await,
        Err(error) => match error.into_response() {
            Some(response) => response,
            None => return,
        },
    };

    if let Err(error) = response.write_to(&mut stream).await {
        log::debug!("Failed to write response: {error}");
    }
}
