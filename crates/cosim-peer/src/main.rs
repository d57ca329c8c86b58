use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use cosim_bridge::logging::init_tracing;
use cosim_bridge::{
    BridgeConfig, BridgeError, Channel, CouplingSession, LogSink, Role, TcpConnector, TcpPort,
    TimeWindow, TracingSink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Listen,
    Connect,
}

#[derive(Debug)]
struct Options {
    side: Side,
    path: PathBuf,
    role: Role,
    bind: String,
    advertise: Option<String>,
    frames: u32,
    width: usize,
    dt: f64,
}

const USAGE: &str =
    "Usage: cosim-peer <listen|connect> --path <descriptor> --mode <send|receive> [options]";

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            eprintln!();
            eprintln!("Arguments:");
            eprintln!("  listen            Open a TCP port and publish it at --path");
            eprintln!("  connect           Wait for a port published at --path and connect");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --path <file>     Descriptor file shared with the peer");
            eprintln!("  --mode <mode>     send or receive");
            eprintln!("  --bind <addr>     Listen address [default: 127.0.0.1:0]");
            eprintln!("  --advertise <h>   Host name to publish instead of the bound IP");
            eprintln!("  --frames <n>      Frames to send [default: 10]");
            eprintln!("  --width <k>       Values per frame [default: 4]");
            eprintln!("  --dt <secs>       Coupling interval [default: 0.1]");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(options).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut side: Option<Side> = None;
    let mut path: Option<PathBuf> = None;
    let mut role: Option<Role> = None;
    let mut bind = "127.0.0.1:0".to_string();
    let mut advertise = None;
    let mut frames = 10;
    let mut width = 4;
    let mut dt = 0.1;

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--path" => {
                i += 1;
                path = Some(PathBuf::from(args.get(i).ok_or("--path requires a value")?));
            }
            "--mode" => {
                i += 1;
                role = Some(match args.get(i).map(String::as_str) {
                    Some("send") => Role::Sender,
                    Some("receive") => Role::Receiver,
                    Some(other) => {
                        return Err(format!(
                            "invalid mode '{other}', expected 'send' or 'receive'"
                        ));
                    }
                    None => return Err("--mode requires a value".to_string()),
                });
            }
            "--bind" => {
                i += 1;
                bind = args.get(i).ok_or("--bind requires a value")?.clone();
            }
            "--advertise" => {
                i += 1;
                advertise = Some(args.get(i).ok_or("--advertise requires a value")?.clone());
            }
            "--frames" => {
                i += 1;
                frames = parse_value(args.get(i), "--frames")?;
            }
            "--width" => {
                i += 1;
                width = parse_value(args.get(i), "--width")?;
            }
            "--dt" => {
                i += 1;
                dt = parse_value(args.get(i), "--dt")?;
                if !(dt > 0.0) {
                    return Err(format!("--dt must be positive, got {dt}"));
                }
            }
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            "listen" | "connect" if side.is_some() => {
                return Err(format!("unexpected argument: {}", args[i]));
            }
            "listen" => side = Some(Side::Listen),
            "connect" => side = Some(Side::Connect),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(Options {
        side: side.ok_or("missing required argument: <listen|connect>")?,
        path: path.ok_or("missing required option: --path")?,
        role: role.ok_or("missing required option: --mode")?,
        bind,
        advertise,
        frames,
        width,
        dt,
    })
}

fn parse_value<T: std::str::FromStr>(value: Option<&String>, flag: &str) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .map_err(|_| format!("invalid value '{value}' for {flag}"))
}

async fn run(options: Options) -> anyhow::Result<()> {
    let config = BridgeConfig::from_env();
    let log: Arc<dyn LogSink> = Arc::new(TracingSink);

    let session = match options.side {
        Side::Listen => {
            let mut port = TcpPort::bind(&options.bind)
                .await
                .with_context(|| format!("failed to bind {}", options.bind))?;
            if let Some(host) = &options.advertise {
                port = port.with_advertised_host(host)?;
            }
            CouplingSession::accept(port, &options.path, options.role, config, log).await
        }
        Side::Connect => {
            CouplingSession::connect(TcpConnector, &options.path, options.role, config, log).await
        }
    }
    .with_context(|| format!("failed to open session at {}", options.path.display()))?;

    tracing::info!(
        session = %session.id(),
        role = %session.role(),
        address = %session.channel().address(),
        "Session open"
    );

    match options.role {
        Role::Sender => send_frames(session, &options).await,
        Role::Receiver => receive_frames(session).await,
    }
}

async fn send_frames<C: Channel>(
    mut session: CouplingSession<C>,
    options: &Options,
) -> anyhow::Result<()> {
    for step in 0..options.frames {
        let start = f64::from(step) * options.dt;
        let window = TimeWindow::new(start, start + options.dt);
        let payload: Vec<f64> = (0..options.width)
            .map(|k| (start + k as f64).sin())
            .collect();
        match session.send_frame(window, &payload).await {
            Ok(()) => {}
            Err(BridgeError::StreamEnded) => {
                tracing::info!(sent = step, "Receiver ended the stream early");
                break;
            }
            Err(e) => return Err(e).context("send failed"),
        }
    }
    let summary = session.terminate().await.context("termination failed")?;
    println!("sent {} frames in session {}", summary.frames, summary.id);
    Ok(())
}

async fn receive_frames<C: Channel>(mut session: CouplingSession<C>) -> anyhow::Result<()> {
    while let Some(frame) = session.receive_frame().await.context("receive failed")? {
        let sum: f64 = frame.payload.iter().sum();
        println!("{} n={} sum={sum:.6}", frame.window, frame.len());
    }
    let summary = session.terminate().await.context("termination failed")?;
    println!("received {} frames in session {}", summary.frames, summary.id);
    Ok(())
}
