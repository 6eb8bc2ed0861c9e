// MIT License - Copyright (c) 2026 Peter Wright
// Operator CLI

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use satel_integra::{AlarmState, ArmMode, PanelConfig, PanelEvent, SatelPanel};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "satel-monitor")]
#[command(about = "Monitor and control a Satel Integra alarm panel")]
struct Cli {
    #[command(flatten)]
    panel: PanelArgs,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args)]
struct PanelArgs {
    /// ETHM module host name or IP address
    #[arg(long, env = "SATEL_HOST")]
    host: String,

    /// ETHM integration port
    #[arg(long, env = "SATEL_PORT", default_value_t = 7094)]
    port: u16,

    /// Integration key configured in the ETHM module
    #[arg(long, env = "SATEL_INTEGRATION_KEY", default_value = "")]
    integration_key: String,

    /// Partition numbers to track (comma separated)
    #[arg(long, value_delimiter = ',', default_value = "1")]
    partitions: Vec<u32>,

    /// Zone numbers to track
    #[arg(long, value_delimiter = ',')]
    zones: Vec<u32>,

    /// Output numbers to track
    #[arg(long, value_delimiter = ',')]
    outputs: Vec<u32>,

    /// Zones with a temperature sensor
    #[arg(long, value_delimiter = ',')]
    sensors: Vec<u32>,

    /// Arming mode used by arm-home (1-3)
    #[arg(long, default_value_t = 1)]
    arm_home_mode: u8,

    /// Time to wait for the initial status pushes before acting
    #[arg(long, default_value_t = 1000)]
    settle_ms: u64,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print state changes until interrupted
    Watch {
        /// Emit one JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Arm partitions (full/away)
    Arm(CodeArgs),
    /// Arm partitions in the home mode
    ArmHome(CodeArgs),
    /// Disarm partitions, clearing the alarm if one is active
    Disarm(CodeArgs),
    /// Clear alarm memory
    ClearAlarm(CodeArgs),
    /// Switch an output
    Output {
        #[arg(long, env = "SATEL_CODE", hide_env_values = true)]
        code: String,
        /// Output number
        output: u32,
        /// "on" or "off"
        state: String,
    },
    /// Read all configured temperature sensors
    Temps {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct CodeArgs {
    /// User code
    #[arg(long, env = "SATEL_CODE", hide_env_values = true)]
    code: String,

    /// Target partitions (defaults to all tracked partitions)
    #[arg(long, value_delimiter = ',')]
    target: Vec<u32>,
}

impl PanelArgs {
    fn to_config(&self) -> Result<PanelConfig> {
        let arm_home_mode = ArmMode::from_u8(self.arm_home_mode)
            .filter(|m| *m != ArmMode::Mode0)
            .context("arm-home mode must be 1, 2 or 3")?;
        let config = PanelConfig::builder()
            .host(self.host.clone())
            .port(self.port)
            .integration_key(self.integration_key.clone())
            .partitions(self.partitions.iter().copied())
            .zones(self.zones.iter().copied())
            .outputs(self.outputs.iter().copied())
            .temperature_sensors(self.sensors.iter().copied())
            .arm_home_mode(arm_home_mode)
            .build();
        config.validate().context("Invalid panel configuration")?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Output formats
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Snapshot {
    now: i64,
    op: String,
    connected: bool,
    partitions: Vec<PartitionJson>,
    #[serde(rename = "zonesViolated")]
    zones_violated: Vec<u32>,
    #[serde(rename = "outputsActive")]
    outputs_active: Vec<u32>,
}

#[derive(Serialize)]
struct PartitionJson {
    id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'static str>,
    kinds: Vec<&'static str>,
}

#[derive(Serialize)]
struct TemperatureJson {
    now: i64,
    sensor: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    celsius: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn build_snapshot(panel: &SatelPanel, op: &str) -> Snapshot {
    let states = panel.partition_states().await;
    let mut partitions = Vec::new();
    for &id in &panel.config().partitions {
        let kinds = states
            .iter()
            .filter(|(_, ids)| ids.contains(&id))
            .map(|(kind, _)| kind.as_str())
            .collect();
        partitions.push(PartitionJson {
            id,
            state: panel.alarm_state(id).await.map(|s| s.as_str()),
            kinds,
        });
    }
    Snapshot {
        now: Utc::now().timestamp_millis(),
        op: op.to_string(),
        connected: panel.is_connected(),
        partitions,
        zones_violated: panel.violated_zones().await.into_iter().collect(),
        outputs_active: panel.active_outputs().await.into_iter().collect(),
    }
}

fn print_snapshot(snapshot: &Snapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }
    println!(
        "[{}] {} connected={}",
        Utc::now().format("%H:%M:%S"),
        snapshot.op,
        snapshot.connected
    );
    for p in &snapshot.partitions {
        println!(
            "  partition {:>2}: {:<10} {}",
            p.id,
            p.state.unwrap_or("unknown"),
            p.kinds.join(",")
        );
    }
    if !snapshot.zones_violated.is_empty() {
        println!("  zones violated: {:?}", snapshot.zones_violated);
    }
    if !snapshot.outputs_active.is_empty() {
        println!("  outputs active: {:?}", snapshot.outputs_active);
    }
    Ok(())
}

fn event_op(event: &PanelEvent) -> String {
    match event {
        PanelEvent::Connected => "CONNECTED".to_string(),
        PanelEvent::Disconnected => "DISCONNECTED".to_string(),
        PanelEvent::StateChanged { kind: Some(kind) } => {
            format!("STATE_CHANGED:{}", kind.description())
        }
        PanelEvent::StateChanged { kind: None } => "STATE_CHANGED".to_string(),
        PanelEvent::TemperatureRead { sensor, .. } => format!("TEMPERATURE:{}", sensor),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn watch(panel: &SatelPanel, json: bool) -> Result<()> {
    let mut events = panel.subscribe();
    print_snapshot(&build_snapshot(panel, "SNAPSHOT").await, json)?;

    let mut sigterm = signal(SignalKind::terminate())?;
    info!("Watching panel. Send SIGINT/SIGTERM to stop.");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_snapshot(&build_snapshot(panel, &event_op(&event)).await, json)?;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} events", n);
                    print_snapshot(&build_snapshot(panel, "SNAPSHOT").await, json)?;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
        }
    }
    Ok(())
}

/// Disarm, then clear alarm memory one second later on partitions that
/// were in alarm.
async fn disarm(panel: &SatelPanel, code: &str, targets: &[u32]) -> Result<()> {
    let mut in_alarm = Vec::new();
    for &id in targets {
        if panel.alarm_state(id).await == Some(AlarmState::Triggered) {
            in_alarm.push(id);
        }
    }

    panel.disarm(code, targets).await.context("Disarm failed")?;
    println!("Disarmed partitions {:?}", targets);

    if !in_alarm.is_empty() {
        sleep(Duration::from_secs(1)).await;
        panel
            .clear_alarm(code, &in_alarm)
            .await
            .context("Clearing alarm failed")?;
        println!("Cleared alarm on partitions {:?}", in_alarm);
    }
    Ok(())
}

async fn temps(panel: &SatelPanel, json: bool) -> Result<()> {
    if panel.config().temperature_sensors.is_empty() {
        bail!("No temperature sensors configured (use --sensors)");
    }
    let readings: BTreeMap<u32, _> = panel.read_all_temperatures().await;
    for (sensor, reading) in readings {
        if json {
            let line = TemperatureJson {
                now: Utc::now().timestamp_millis(),
                sensor,
                celsius: reading.as_ref().ok().copied(),
                error: reading.as_ref().err().map(|e| e.to_string()),
            };
            println!("{}", serde_json::to_string(&line)?);
        } else {
            match reading {
                Ok(celsius) => println!("sensor {:>3}: {:.1} °C", sensor, celsius),
                Err(e) => println!("sensor {:>3}: {}", sensor, e),
            }
        }
    }
    Ok(())
}

fn targets(args: &CodeArgs, config: &PanelConfig) -> Vec<u32> {
    if args.target.is_empty() {
        config.partitions.clone()
    } else {
        args.target.clone()
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=satel_integra=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt()
            .without_time()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let cli = Cli::parse();
    let config = cli.panel.to_config()?;

    let panel = SatelPanel::connect(config.clone())
        .await
        .with_context(|| format!("Failed to connect to panel at {}", config.address()))?;

    // Let the monitoring subscription deliver the current state
    sleep(Duration::from_millis(cli.panel.settle_ms)).await;

    let outcome = match &cli.command {
        Cmd::Watch { json } => watch(&panel, *json).await,
        Cmd::Arm(args) => panel
            .arm(&args.code, &targets(args, &config), None)
            .await
            .context("Arm failed"),
        Cmd::ArmHome(args) => panel
            .arm_home(&args.code, &targets(args, &config))
            .await
            .context("Arm home failed"),
        Cmd::Disarm(args) => disarm(&panel, &args.code, &targets(args, &config)).await,
        Cmd::ClearAlarm(args) => panel
            .clear_alarm(&args.code, &targets(args, &config))
            .await
            .context("Clear alarm failed"),
        Cmd::Output {
            code,
            output,
            state,
        } => {
            let on = match state.as_str() {
                "on" => true,
                "off" => false,
                other => bail!("Output state must be 'on' or 'off', got '{}'", other),
            };
            panel
                .set_output(code, *output, on)
                .await
                .context("Output switch failed")
        }
        Cmd::Temps { json } => temps(&panel, *json).await,
    };

    if outcome.is_ok()
        && let Cmd::Arm(_) | Cmd::ArmHome(_) | Cmd::ClearAlarm(_) | Cmd::Output { .. } =
            &cli.command
    {
        println!("OK");
    }

    panel.disconnect().await;
    info!("Shutdown complete");
    outcome
}
