//! Example: start a transfer, walk away, and watch it time out

use std::time::Duration;

use clap::Parser;
use ftr_receiver::{Collaborators, ReceiverConfig, TransferReceiver};
use tracing::info;

/// Abandoned transfer CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Idle seconds before the transfer is timed out
    #[arg(long, default_value_t = 3)]
    lock_timeout: u64,

    /// Lease duration handed to the lock provider, in seconds
    #[arg(long, default_value_t = 2)]
    lock_refresh: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("ftr_receiver=debug"))
        .init();

    let args = Args::parse();
    let work_dir = tempfile::tempdir()?;
    let config = ReceiverConfig {
        lock_timeout: Duration::from_secs(args.lock_timeout),
        lock_refresh_time: Duration::from_secs(args.lock_refresh),
        ..ReceiverConfig::new(work_dir.path().join("staging"))
    };
    let collab = Collaborators::in_memory(&config, work_dir.path().join("target"));
    let receiver = TransferReceiver::new(config, collab);

    let version = receiver.get_version();
    let transfer_id = receiver.start("demo-source", false, &version).await?;
    receiver
        .save_content(&transfer_id, "part-1", &mut &b"some content"[..])
        .await?;
    info!(%transfer_id, "transfer started, client going away");

    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let progress = receiver.get_status(&transfer_id)?;
        info!(status = %progress.status, "polled");
        if progress.status.is_terminal() {
            info!(error = ?progress.error, "transfer finished");
            break;
        }
    }

    for entry in receiver.get_transfer_report(&transfer_id)?.entries {
        println!("{}", entry);
    }
    Ok(())
}
