use std::process::ExitCode;

use clap::{Parser, Subcommand};

use claude_watch_relay::api::ApiServerBuilder;
use claude_watch_relay::bridge::pairing_state::PairingState;
use claude_watch_relay::bridge::relay_client::RelayClient;
use claude_watch_relay::bridge::{Bridge, TerminalLocalFallback};
use claude_watch_relay::config::Config;
use claude_watch_relay::discovery::MdnsAdvertiser;
use claude_watch_relay::kv::MemoryKv;
use claude_watch_relay::push::{HttpPushProvider, PushDispatcher};
use claude_watch_relay::telemetry;

/// Claude Watch relay, bridge, and operator utilities.
#[derive(Parser)]
#[command(name = "claude-watch", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the cloud relay's HTTP surface.
    Relay {
        #[command(subcommand)]
        command: RelayCommand,
    },
    /// Wrap an AI coding tool and bridge its permission protocol to the relay.
    Bridge {
        #[command(subcommand)]
        command: BridgeCommand,
    },
    /// Pairing utilities for operators.
    Pair {
        #[command(subcommand)]
        command: PairCommand,
    },
}

#[derive(Subcommand)]
enum RelayCommand {
    /// Start the relay and block until interrupted.
    Serve {
        /// Port to listen on (overrides config/env).
        #[arg(long)]
        port: Option<u16>,
        /// Advertise this relay on the local network via mDNS.
        #[arg(long)]
        mdns: bool,
    },
}

#[derive(Subcommand)]
enum BridgeCommand {
    /// Spawn the wrapped tool and mediate its permission requests.
    Run {
        /// Relay base URL (overrides config/env).
        #[arg(long)]
        relay_url: Option<String>,
        /// Pairing id this bridge speaks for. Falls back to the id
        /// persisted by a prior successful `bridge run` when omitted.
        #[arg(long, env = "CLAUDE_WATCH_PAIRING_ID")]
        pairing_id: Option<String>,
        /// Fall back to a local terminal prompt when the relay is unreachable.
        #[arg(long)]
        local_fallback: bool,
        /// The wrapped tool and its arguments, after `--`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        tool: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PairCommand {
    /// Print a watch's current pairing status.
    Status {
        /// Relay base URL (overrides config/env).
        #[arg(long)]
        relay_url: Option<String>,
        /// The watch id returned from `/pair/initiate`.
        watch_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "fatal");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Relay { command: RelayCommand::Serve { port, mdns } } => {
            relay_serve(port, mdns).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Bridge {
            command: BridgeCommand::Run { relay_url, pairing_id, local_fallback, tool },
        } => bridge_run(relay_url, pairing_id, local_fallback, tool).await,
        Command::Pair { command: PairCommand::Status { relay_url, watch_id } } => {
            pair_status(relay_url, &watch_id).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn relay_serve(port_override: Option<u16>, mdns: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    let port = port_override.unwrap_or(config.relay.port);

    let mut builder = ApiServerBuilder::new(MemoryKv::new(), port)
        .rate_limit_per_minute(config.relay.rate_limit_per_minute);

    if let (Some(endpoint), Some(key_path)) =
        (&config.push.provider_endpoint, &config.push.signing_key_path)
    {
        let pem = std::fs::read(key_path)?;
        let dispatcher =
            PushDispatcher::new(&pem, config.push.issuer.clone(), HttpPushProvider::new(endpoint.clone()))?;
        builder = builder.push(std::sync::Arc::new(dispatcher));
    } else {
        tracing::info!("push dispatcher not configured; clients must poll");
    }

    let advertiser = if mdns {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let advertiser = MdnsAdvertiser::new()?;
        advertiser.start(&instance_id, port).await?;
        Some(advertiser)
    } else {
        None
    };

    tracing::info!(port, "claude-watch relay ready");
    let server = builder.build();

    let result = tokio::select! {
        res = server.run() => res.map_err(anyhow::Error::from),
        () = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
    };

    if let Some(advertiser) = advertiser {
        advertiser.stop().await;
    }

    result
}

async fn bridge_run(
    relay_url: Option<String>,
    pairing_id: Option<String>,
    local_fallback: bool,
    tool: Vec<String>,
) -> anyhow::Result<ExitCode> {
    let config = Config::load()?;
    let relay_url = relay_url.unwrap_or(config.bridge.relay_url);

    let state_path = PairingState::default_path();
    let pairing_id = match pairing_id {
        Some(id) => id,
        None => PairingState::load(&state_path)?
            .map(|state| state.pairing_id)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no --pairing-id given and no persisted pairing state at {}",
                    state_path.display()
                )
            })?,
    };

    let Some((program, args)) = tool.split_first() else {
        anyhow::bail!("no wrapped tool given; usage: claude-watch bridge run --pairing-id <id> -- <tool> [args..]");
    };

    PairingState::new(pairing_id.clone(), relay_url.clone(), Some(program.clone())).save(&state_path)?;

    let mut command = tokio::process::Command::new(program);
    command.args(args);
    command.envs(std::env::vars());
    command.env("CLAUDE_WATCH_SESSION_ACTIVE", "1");

    let use_local_fallback = local_fallback || config.bridge.local_fallback;
    let status = if use_local_fallback {
        let relay = RelayClient::new(relay_url);
        let bridge = Bridge::with_local_fallback(relay, pairing_id, TerminalLocalFallback);
        bridge.run(command).await?
    } else {
        let relay = RelayClient::new(relay_url);
        let bridge = Bridge::new(relay, pairing_id);
        bridge.run(command).await?
    };

    Ok(exit_code_from(status))
}

#[cfg(unix)]
fn exit_code_from(status: std::process::ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        ExitCode::from((code & 0xff) as u8)
    } else if let Some(signal) = status.signal() {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        ExitCode::from((128 + signal) as u8)
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(not(unix))]
fn exit_code_from(status: std::process::ExitStatus) -> ExitCode {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    status.code().map_or(ExitCode::FAILURE, |c| ExitCode::from((c & 0xff) as u8))
}

async fn pair_status(relay_url: Option<String>, watch_id: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let relay_url = relay_url.unwrap_or(config.bridge.relay_url);

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{relay_url}/pair/status/{watch_id}"))
        .send()
        .await?;

    if response.status().as_u16() == 404 {
        println!("invalid or expired code");
        return Ok(());
    }

    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
