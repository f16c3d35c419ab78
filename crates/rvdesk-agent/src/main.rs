#![forbid(unsafe_code)]

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use rvdesk_agent::channel::{
    pump_responses, ChannelResolver, RemoteToolBridge, ToolBridgeChannel, ToolRequest,
};
use rvdesk_agent::{Config, GoldenPathOrchestrator, GoldenPathReport};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    let config = Config::load()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log filter `{}`", config.log_level))?;
    // stdout carries the bridge protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(run(config));
    // The stdin reader sits in a blocking read that cannot be cancelled.
    runtime.shutdown_background();
    result
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let (bridge, mut requests) = RemoteToolBridge::new(config.bridge_timeout);
    let bridge = Arc::new(bridge);

    tokio::spawn(async move {
        if let Err(err) = forward_requests(&mut requests).await {
            tracing::error!("bridge output failed: {err:#}");
        }
    });

    tokio::spawn({
        let bridge = bridge.clone();
        async move {
            match pump_responses(BufReader::new(tokio::io::stdin()), &bridge).await {
                Ok(delivered) => tracing::debug!(delivered, "bridge input closed"),
                Err(err) => tracing::error!("bridge input failed: {err}"),
            }
        }
    });

    let resolver = ChannelResolver::new().with_channel(Arc::new(ToolBridgeChannel::new(bridge)));
    tracing::info!(?resolver, "starting golden path");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let orchestrator =
        GoldenPathOrchestrator::new(Arc::new(resolver), config.golden).with_cancellation(cancel);
    let report = orchestrator.run().await;
    write_report(&report, config.report.as_deref())?;

    Ok(if report.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Writes each outbound tool request to stdout as one JSON line.
async fn forward_requests(requests: &mut UnboundedReceiver<ToolRequest>) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(request) = requests.recv().await {
        let mut line = serde_json::to_vec(&request).context("failed to encode tool request")?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn write_report(report: &GoldenPathReport, path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => report
            .write_json(path)
            .with_context(|| format!("failed to write report to {}", path.display())),
        None => {
            let json = report.to_json_pretty().context("failed to encode report")?;
            eprintln!("{json}");
            Ok(())
        }
    }
}
