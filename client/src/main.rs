mod app;
mod capture;
mod dispatch;
mod presentation;
mod session;

use app::App;
use capture::CaptureController;
use dispatch::Dispatcher;
use face_gate_common::config::Config;
use presentation::Presenter;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    // Logs go to stderr; stdout belongs to the status display.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        service = config.service.base_url,
        camera = config.camera.url,
        mode = ?config.camera.mode,
        reset_delay_ms = config.session.reset_delay_ms,
        verify_frames = config.session.verify_frames,
        "starting face-gate client"
    );

    let dispatcher = match Dispatcher::new(&config.service) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to set up recognition service client");
            std::process::exit(1);
        }
    };

    let stdout = std::io::stdout();
    let color = config.ui.color && stdout.is_terminal();
    let mut app = App::new(&config.session, dispatcher, Presenter::new(stdout, color));

    let started = async {
        app.render()?;
        let camera = CaptureController::acquire(&config.camera).await;
        app.attach_camera(camera)?;
        app::spawn_input_reader(app.sender())
    };
    if let Err(e) = started.await {
        error!(error = %e, "failed to start the terminal session");
        std::process::exit(1);
    }

    if let Err(e) = app.run().await {
        error!(error = %e, "terminal output failed");
        std::process::exit(1);
    }
}
