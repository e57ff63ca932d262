use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::thread;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};

use racket_motion_rs::{
    notification_channel, pipeline, Channel, Listener, ModelKind, Notification, NotificationStream,
    ServerConfig, ServerStatus, SharedStatus,
};

#[derive(Parser, Debug)]
#[command(name = "racket_motion_server")]
#[command(about = "Racket sensor UDP server with windowed Gaussian smoothing", long_about = None)]
struct Args {
    /// Duration in seconds (0 = run until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON config file; command-line options override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// UDP port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Fit window length (packets)
    #[arg(long)]
    window: Option<usize>,

    /// Raw buffer capacity (packets)
    #[arg(long)]
    capacity: Option<usize>,

    /// Device sends the Edisson '@' format instead of tagged CSV
    #[arg(long)]
    edisson: bool,

    /// Fit model (g1b, g2b)
    #[arg(long)]
    model: Option<ModelKind>,

    /// Levenberg-Marquardt iteration cap
    #[arg(long)]
    max_iter: Option<usize>,

    /// Write live status JSON here every 2 seconds
    #[arg(long)]
    status_file: Option<PathBuf>,
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(window) = args.window {
        config.window_len = window;
    }
    if let Some(capacity) = args.capacity {
        config.buffer_capacity = capacity;
    }
    if args.edisson {
        config.is_edisson = true;
    }
    if let Some(model) = args.model {
        config.fit.model = model;
    }
    if let Some(max_iter) = args.max_iter {
        config.fit.max_iterations = max_iter;
    }
    config.validate()?;
    Ok(config)
}

/// Stand-in for the plotting front end: logs what it would draw
fn consume_notifications(stream: NotificationStream) {
    let mut data_events = 0u64;
    while let Some(notification) = stream.next_blocking() {
        match notification {
            Notification::State(event) => println!("[{}] {}", ts_now(), event.text),
            Notification::Data(event) => {
                data_events += 1;
                if data_events % 100 != 0 {
                    continue;
                }
                if let (Some(raw), Some(fit)) = (event.raw.last(), event.fitted.last()) {
                    let deltas: Vec<String> = Channel::ALL
                        .iter()
                        .map(|c| format!("{}={:+.3}", c, raw.channel(*c) - fit.channel(*c)))
                        .collect();
                    log::info!(
                        "Window {} pts @ {:.3}s, latest raw-fit: {}",
                        event.raw.len(),
                        raw.timestamp,
                        deltas.join(" ")
                    );
                }
            }
        }
    }
}

async fn report_status(status: SharedStatus, path: Option<PathBuf>) {
    let mut ticker = interval(Duration::from_secs(2));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snapshot = match status.lock() {
            Ok(mut s) => {
                s.timestamp = racket_motion_rs::status::current_timestamp();
                s.clone()
            }
            Err(_) => continue,
        };
        log::info!("{}", snapshot.summary());
        if let Some(path) = path.as_ref() {
            if let Err(e) = snapshot.save(path) {
                log::warn!("Failed to write status file {}: {}", path.display(), e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = build_config(&args)?;

    println!("[{}] Racket Motion Server starting", ts_now());
    println!("  Port: {}", config.port);
    println!("  Grammar: {:?}", config.grammar());
    println!("  Window: {} packets", config.window_len);
    println!("  Buffer: {} packets", config.buffer_capacity);
    println!("  Model: {} (max {} iterations)", config.fit.model, config.fit.max_iterations);

    let (sink, stream) = notification_channel(config.notification_capacity);
    let status = ServerStatus::shared();
    let (ingest, worker) = pipeline(&config, sink.clone(), status.clone());
    let (mut listener, handle) = Listener::new(&config, ingest, sink, status.clone());

    let consumer = thread::Builder::new()
        .name("notifications".into())
        .spawn(move || consume_notifications(stream))?;

    // A failed initial bind is reported and the server keeps waiting for a rebind
    if let Err(e) = listener.bind(config.port).await {
        log::error!("{}", e);
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker_task = tokio::spawn(worker.run(stop_rx));
    let listener_task = tokio::spawn(listener.run());
    let status_task = tokio::spawn(report_status(status.clone(), args.status_file.clone()));

    if args.duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {
                println!("[{}] Duration reached, stopping...", ts_now());
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
        println!("[{}] Interrupted, stopping...", ts_now());
    }

    handle.shutdown().await;
    let _ = listener_task.await;
    let _ = stop_tx.send(true);
    let _ = worker_task.await;
    status_task.abort();

    // Listener and worker owned the last sinks; the consumer sees the channel close
    let _ = consumer.join();

    let final_status = match status.lock() {
        Ok(s) => s.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    if let Some(path) = args.status_file.as_ref() {
        let _ = final_status.save(path);
    }

    println!("\n=== Final Stats ===");
    println!("Datagrams received: {}", final_status.datagrams_received);
    println!("Packets accepted: {}", final_status.packets_accepted);
    println!(
        "Decode/parse failures: {}/{}",
        final_status.decode_failures, final_status.parse_failures
    );
    println!("Fit cycles: {}", final_status.fit_cycles);
    println!("Uptime: {:.1} s", final_status.uptime_seconds());

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
