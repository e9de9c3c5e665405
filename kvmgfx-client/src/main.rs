//! KVMGFX client — entry point.
//!
//! ```text
//! kvmgfx-client                        Run with defaults
//! kvmgfx-client --config <path>        Use custom config TOML
//! kvmgfx-client --shm <socket>         Override the ivshmem socket
//! kvmgfx-client --remote <host:port>   Override the remote-display server
//! kvmgfx-client --gen-config           Dump default config and exit
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use kvmgfx_core::remote::wait_until_ready;
use kvmgfx_core::{
    ChannelInput, DisplayBackend, InputHandle, IvshmemClient, KvmError, Pipeline, RemoteClient, SoftwareDisplay,
};

use kvmgfx_client::config::ClientConfig;
use kvmgfx_client::logging;
use kvmgfx_client::viewer::{Viewer, WindowInput};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "kvmgfx-client", about = "Host-side receiver for VGA passthrough frames")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "kvmgfx-client.toml")]
    config: PathBuf,

    /// ivshmem-server socket (overrides config).
    #[arg(long)]
    shm: Option<String>,

    /// Remote-display server (overrides config). Example: 127.0.0.1:5900
    #[arg(short, long)]
    remote: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.gen_config {
        return match ClientConfig::default_toml() {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to render default config: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(path) = cli.shm {
        config.shm.socket_path = path;
    }
    if let Some(addr) = cli.remote {
        if let Err(e) = config.set_remote(&addr) {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("failed to open log file {}: {e}", config.logging.file);
        return ExitCode::FAILURE;
    }

    info!("kvmgfx-client v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ClientConfig) -> Result<(), KvmError> {
    // ── 1. Create the window ────────────────────────────────────

    let mut display = SoftwareDisplay::new(&config.display.title, config.display.width, config.display.height);
    if config.display.hide_cursor {
        display.hide_cursor()?;
    }
    let stats = display.stats_receiver();
    let frames = display.frame_receiver();

    let (events, input) = ChannelInput::new();
    let (viewer, window) = Viewer::open(&config.display, frames.clone(), input.clone()).await?;
    spawn_quit_on_ctrl_c(input);

    // ── 2. Connect the shared-memory transport ──────────────────

    let transport = {
        let path = config.shm.socket_path.clone();
        let timeout = config.shm.wait_timeout();
        tokio::task::spawn_blocking(move || IvshmemClient::connect(path, timeout))
            .await
            .map_err(|e| KvmError::Other(format!("ivshmem connect task failed: {e}")))?
            .map_err(|e| KvmError::Transport(format!("failed to connect to the ivshmem server: {e}")))?
    };
    let pipeline = Pipeline::new(Arc::new(transport)).with_poll_interval(config.input.poll_interval());
    let running = pipeline.stop_handle();

    // ── 3. Connect the remote-display session ───────────────────

    let remote = &config.remote;
    let (sender, mut session) =
        RemoteClient::connect(&remote.host, remote.port, &remote.password, remote.connect_timeout())
            .await
            .map_err(|e| KvmError::Other(format!("failed to connect to the remote display: {e}")))?;
    wait_until_ready(&mut session, &running).await?;

    // ── 4. Local input ──────────────────────────────────────────

    let source = WindowInput::new(events, window, frames, !config.display.hide_cursor);

    // ── 5. Run until stopped ────────────────────────────────────

    let render = pipeline
        .render_loop(display, config.shm.vector)
        .with_invalid_backoff(config.shm.invalid_backoff());
    let forwarder = pipeline
        .forwarder(source, sender)
        .with_toggle_key(config.input.toggle_key);

    let stats_task = tokio::spawn(async move {
        let mut stats = stats;
        while stats.changed().await.is_ok() {
            let s = stats.borrow_and_update().clone();
            if s.total_frames % 600 == 0 {
                info!("{}x{} @ {:.1} fps, {} frames", s.width, s.height, s.fps, s.total_frames);
            }
        }
    });

    let display = pipeline.run(render, forwarder, session).await?;

    // ── 6. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    drop(display);
    viewer.close();
    if let Err(e) = stats_task.await {
        warn!("stats task failed: {e}");
    }
    Ok(())
}

/// Route Ctrl-C into the input stream as a quit event.
fn spawn_quit_on_ctrl_c(input: InputHandle) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            return;
        }
        if let Err(e) = input.quit() {
            warn!("failed to deliver quit: {e}");
        }
    });
}
