use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use deadline_watch::{render_status, Args, Command, StartRequest, Watch};
use escalation::StartOutcome;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deadline_watch=info,escalation=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.resolve_config()?;
    info!(
        timezone = %config.timezone,
        quiet_start = config.quiet_start_hour,
        quiet_end = config.quiet_end_hour,
        validity_hours = config.validity_hours,
        "Configuration loaded"
    );
    let watch = Watch::open(&args.paths(), config)?;

    match args.command {
        Command::Start {
            source_id,
            subject,
            link,
            received_at,
            test,
        } => {
            let request = StartRequest {
                source_id,
                subject,
                link,
                received_at,
                test,
            };
            match watch.start(request, Utc::now()).await? {
                StartOutcome::Started {
                    chain_id,
                    blocks,
                    event_id,
                } => println!(
                    "started chain {} with {} blocks (first event {})",
                    chain_id, blocks, event_id
                ),
                StartOutcome::AlreadyActive { chain_id } => {
                    println!("chain {} already active", chain_id)
                }
                StartOutcome::NoSignals => println!("nothing to escalate outside quiet hours"),
            }
        }
        Command::Tick => match watch.tick(Utc::now()).await? {
            Some(report) => {
                for chain in &report.chains {
                    println!("{} {}", chain.fingerprint, chain.outcome);
                }
                if report.trigger_disarmed {
                    println!("no chains left, trigger disarmed");
                }
            }
            None => println!("skipped: another invocation is running"),
        },
        Command::Status { json } => {
            let rows = watch.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print!("{}", render_status(&rows, &watch.quiet_window()?, Utc::now()));
            }
        }
        Command::Run { poll_seconds } => {
            watch.run(Duration::from_secs(poll_seconds)).await?;
        }
    }

    Ok(())
}
