//! Watch a path and print the events it produces.
//!
//! Usage: cargo run -p file-monitor --example watch -- [PATH]

use std::path::PathBuf;

use anyhow::Result;
use file_monitor::{FileMonitor, MonitorConfig, WatchMode};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let path: PathBuf = std::env::args()
        .nth(1)
        .map(Into::into)
        .unwrap_or_else(|| PathBuf::from("."));

    let monitor = FileMonitor::new(MonitorConfig::default())?;
    let handle = monitor.subscribe(
        &path,
        WatchMode::Directory,
        Box::new(|handle, event| {
            println!(
                "{handle:?}: {:?} {} at {}",
                event.kind,
                event.path.display(),
                event.timestamp
            );
        }),
    )?;

    println!("watching {} (ctrl-c to stop)", path.display());
    tokio::signal::ctrl_c().await?;
    monitor.cancel(handle);

    Ok(())
}
