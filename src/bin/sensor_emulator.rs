//! Synthetic racket sensor: streams swing-like packets to a server over UDP

use std::f64::consts::PI;
use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use racket_motion_rs::parser::{format_edisson, format_tagged, TaggedGroups};
use racket_motion_rs::{SensorPacket, Vector3};

#[derive(Parser, Debug)]
#[command(name = "sensor_emulator")]
#[command(about = "Send synthetic racket sensor datagrams", long_about = None)]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:5554")]
    target: String,

    /// Packets per second
    #[arg(long, default_value = "100")]
    rate: f64,

    /// Packets to send (0 = forever)
    #[arg(long, default_value = "1000")]
    count: u64,

    /// Emit the Edisson '@' format instead of tagged CSV
    #[arg(long)]
    edisson: bool,

    /// Omit the gyro and mag groups on every Nth tagged packet (0 = never)
    #[arg(long, default_value = "0")]
    drop_groups: u64,
}

/// Swing at 1.5 Hz: a Gaussian burst on acc.x per period over a slow sway
fn synthetic_packet(seq: u64, rate: f64) -> SensorPacket {
    let t = seq as f64 / rate;
    let phase = (t * 1.5).fract() - 0.5;
    let burst = (-(phase * phase) / (2.0 * 0.08 * 0.08)).exp();

    SensorPacket {
        timestamp: 90_000.0 + t,
        acc: Vector3::new(
            burst * 12.0 + (t * 2.0 * PI).sin() * 0.2,
            (t * PI).cos() * 0.3,
            9.81 + (t * 0.5 * PI).sin() * 0.1,
        ),
        gyro: Vector3::new(
            (t * 0.5).sin() * 0.05,
            burst * 4.0,
            (t * 1.0).sin() * 0.1,
        ),
        mag: Vector3::new(
            16.0 + (t * 0.1).sin(),
            12.6,
            -34.5 + (t * 0.2).cos() * 0.5,
        ),
    }
}

fn render(packet: &SensorPacket, seq: u64, args: &Args) -> String {
    if args.edisson {
        return format_edisson(packet);
    }
    let groups = if args.drop_groups > 0 && seq % args.drop_groups == args.drop_groups - 1 {
        TaggedGroups {
            acc: true,
            gyro: false,
            mag: false,
        }
    } else {
        TaggedGroups::ALL
    };
    format_tagged(packet, groups)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    anyhow::ensure!(args.rate > 0.0, "--rate must be positive");

    let socket = UdpSocket::bind("0.0.0.0:0").context("binding local socket")?;
    socket
        .connect(&args.target)
        .with_context(|| format!("resolving {}", args.target))?;
    let period = Duration::from_secs_f64(1.0 / args.rate);

    log::info!(
        "Sending {} packets to {} at {} Hz ({})",
        if args.count == 0 { "unbounded".to_string() } else { args.count.to_string() },
        args.target,
        args.rate,
        if args.edisson { "edisson" } else { "tagged" }
    );

    let mut seq = 0u64;
    let mut send_errors = 0u64;
    while args.count == 0 || seq < args.count {
        let packet = synthetic_packet(seq, args.rate);
        let text = render(&packet, seq, &args);
        if let Err(e) = socket.send(text.as_bytes()) {
            // Nobody listening yet shows up as ConnectionRefused on the next send
            send_errors += 1;
            log::debug!("send failed: {}", e);
        }
        seq += 1;
        if seq % 500 == 0 {
            log::info!("Sent {} packets ({} send errors)", seq, send_errors);
        }
        thread::sleep(period);
    }

    log::info!("Done: {} packets, {} send errors", seq, send_errors);
    Ok(())
}
