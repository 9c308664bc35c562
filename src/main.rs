use std::{env, path::PathBuf, sync::Arc};

use anyhow::Context;
use futures::future::{select_all, FutureExt};
use log::{info, LevelFilter};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::broadcast,
};
use ue_traffic::{
    config::{SimConfig, DEFAULT_CONFIG_PATH},
    error::RunError,
    probe::check_connectivity,
    recorder::Recorder,
    sender::{raw::check_raw_permission, PacketType, RawKind, RawSocket, DEFAULT_PROBE_TIMEOUT},
    sim::Simulation,
    telemetry::oltp::init_meter,
};

struct Args {
    config: PathBuf,
    check: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut check = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let v = args.next().context("--config requires a value")?;
                config = PathBuf::from(v);
            }
            "--check" => check = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(anyhow::anyhow!("unknown arg: {other}")),
        }
    }
    Ok(Args { config, check })
}

fn print_help() {
    println!("ue-traffic options:");
    println!("  --config <path>   (default {DEFAULT_CONFIG_PATH})");
    println!("  --check           probe every unit with one ICMP echo and exit");
    println!();
    println!("notes:");
    println!("  tcp and ping traffic use raw sockets and need CAP_NET_RAW");
}

fn init_logger(level: LevelFilter) {
    #[cfg(debug_assertions)]
    let level = level.max(LevelFilter::Debug);
    let mut builder = env_logger::Builder::from_default_env();
    if dotenvy::var("RUST_LOG").is_err() {
        builder.filter_level(level);
    }
    builder.init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = parse_args()?;

    let config = SimConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    init_logger(config.log_level()?);

    let providers = if dotenvy::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        Some(init_meter()?)
    } else {
        None
    };

    let result = run(config, args.check).await;

    if let Some(providers) = providers {
        if let Err(err) = providers.shutdown() {
            log::warn!("meter provider shutdown failed: {err}");
        }
    }
    result
}

async fn run(config: SimConfig, check: bool) -> anyhow::Result<()> {
    let plan = config.plan().map_err(RunError::Config)?;

    let raw_kind = match plan.sender.packet_type {
        _ if check => Some(RawKind::Icmp),
        PacketType::Udp => None,
        PacketType::Tcp => Some(RawKind::Tcp),
        PacketType::Ping => Some(RawKind::Icmp),
    };
    if let Some(kind) = raw_kind {
        check_raw_permission(kind).map_err(RunError::Preflight)?;
    }

    if check {
        let target = plan.sender.probe_address;
        let sender = &plan.sender;
        let outcomes = check_connectivity(
            &plan.profiles,
            target,
            |unit| RawSocket::open(RawKind::Icmp, sender.interface(unit.id).as_deref()),
            DEFAULT_PROBE_TIMEOUT,
        )
        .await;
        let reachable = outcomes.iter().filter(|o| o.reachable()).count();
        info!("{reachable}/{} units reached {target}", outcomes.len());
        return Ok(());
    }

    let recorder = Arc::new(Recorder::new(plan.record_packet_details));
    let simulation = Simulation::new(plan.distributor, plan.profiles, recorder, plan.run);
    let sender = plan.sender;

    let (stop, _) = broadcast::channel(1);
    let running = simulation.start(move |unit| sender.build(unit), &stop)?;
    let mut task = tokio::spawn(running.finish());

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = select_all([sigint.recv().boxed(), sigterm.recv().boxed()]) => {
            info!("Received signal, stopping...");
            let _ = stop.send(());
            task.await
        }
    };

    let summary = joined.context("simulation task panicked")??;
    info!("Summary: {summary}");
    Ok(())
}
