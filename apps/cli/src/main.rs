//! Modpack CLI - Command-line interface
//!
//! Lists the packs of a catalog and installs one of them into a mods
//! directory, opening manual downloads in the system browser.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use modpack_installer::downloader::core::progress::format_percent;
use modpack_installer::install::WAITING_MESSAGE;
use modpack_installer::{
    Catalog, DownloadConfig, InstallRequest, InstallTarget, Installer, ManualCoordinator,
    Notice, ProgressSink, SharedSink, SystemBrowserLauncher,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "modpack", about = "Install modpacks from a pack catalog")]
struct Cli {
    /// Base URL of the pack catalog; falls back to INSTALLER_CATALOG_URL
    #[arg(long, global = true)]
    catalog: Option<String>,
    /// Log at DEBUG level
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the packs in the catalog
    List,
    /// Install a pack into a mods directory
    Install {
        /// Pack id as listed by `list`
        #[arg(long)]
        pack: String,
        /// `client` or `server`
        #[arg(long, default_value = "client")]
        target: InstallTarget,
        /// Mods directory to install into
        #[arg(long)]
        dest: PathBuf,
        /// Concurrent download slots
        #[arg(long)]
        slots: Option<usize>,
        /// Print manual download links instead of opening them
        #[arg(long)]
        no_browser: bool,
    },
}

/// Prints progress lines to stdout; slots are prefixed with their number
struct ConsoleSink {
    prefix: String,
    next_child: AtomicUsize,
}

impl ConsoleSink {
    fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
            next_child: AtomicUsize::new(0),
        }
    }
}

impl ProgressSink for ConsoleSink {
    fn set_message(&self, message: &str) {
        println!("{}{}", self.prefix, message);
    }

    fn set_percent(&self, _percent: Option<f64>) {}

    fn add_child(&self) -> SharedSink {
        let slot = self.next_child.fetch_add(1, Ordering::Relaxed) + 1;
        Arc::new(ConsoleSink::new(format!("  [slot {}] ", slot)))
    }

    fn remove_child(&self, _child: &SharedSink) {}

    fn notify(&self, notice: Notice) {
        eprintln!("! {}", notice.message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok(); // Ignore error if .env not present
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_target(false)
        .init();

    let mut config = DownloadConfig::from_env().context("Invalid INSTALLER_* environment")?;
    if let Some(catalog) = cli.catalog {
        config = config.with_catalog_url(catalog);
    }

    match cli.command {
        Command::List => list(&config).await,
        Command::Install {
            pack,
            target,
            dest,
            slots,
            no_browser,
        } => {
            if let Some(slots) = slots {
                config = config.with_slots(slots);
            }
            install(config, &pack, target, &dest, no_browser).await
        }
    }
}

async fn list(config: &DownloadConfig) -> Result<()> {
    let catalog = Catalog::new(config)?;
    let packs = catalog
        .fetch_all()
        .await
        .with_context(|| format!("Could not load the catalog at {}", catalog.base_url()))?;

    for pack in packs {
        println!(
            "{:<16} {} (Minecraft {}, {} mods)",
            pack.id,
            pack.name,
            pack.version.minecraft,
            pack.mods.len()
        );
        if !pack.description.is_empty() {
            println!("{:<16} {}", "", pack.description);
        }
    }
    Ok(())
}

async fn install(config: DownloadConfig, pack_id: &str, target: InstallTarget, dest: &Path, no_browser: bool) -> Result<()> {
    let catalog = Catalog::new(&config)?;
    let pack = catalog
        .fetch_pack(pack_id)
        .await
        .with_context(|| format!("Could not load pack '{}'", pack_id))?;
    println!(
        "Installing {} ({}) for Minecraft {} into {}",
        pack.name,
        target,
        pack.version.minecraft,
        dest.display()
    );

    let installer = Installer::from_config(config)?;
    let request = InstallRequest::new(pack.manifest()?, target, dest);
    let report = installer.install(request, Arc::new(ConsoleSink::new(""))).await?;

    let metrics = installer.metrics().snapshot();
    println!(
        "{} downloaded, {} already installed, {} failed ({} bytes, {} success)",
        metrics.successful_downloads,
        metrics.skipped_duplicates,
        metrics.failed_downloads,
        metrics.total_bytes,
        format_percent(Some(metrics.success_rate()))
    );
    if let Some(reconciled) = &report.reconcile {
        for file in &reconciled.deleted {
            println!("Removed {}", file);
        }
    }

    if report.message == WAITING_MESSAGE {
        wait_for_manual(&report.pending_manual, dest, no_browser).await?;
    }

    let failed: Vec<_> = report.schedule.failed().collect();
    if !failed.is_empty() {
        for job in &failed {
            eprintln!("{}: {}", job.item().name, job.error().unwrap_or("unknown error"));
        }
        bail!("{} mods failed to download", failed.len());
    }
    Ok(())
}

async fn wait_for_manual(
    pending: &[modpack_installer::ItemDescriptor],
    dest: &Path,
    no_browser: bool,
) -> Result<()> {
    if no_browser {
        println!("Download these mods into {}:", dest.display());
        for item in pending {
            println!("  {}: {}", item.name, item.url);
        }
        return Ok(());
    }

    let coordinator = ManualCoordinator::new(Arc::new(SystemBrowserLauncher));
    for item in pending {
        let mut status = coordinator.request(item, dest).await?;
        let name = item.name.clone();
        println!("{}: {}", name, status.borrow().label());
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let label = status.borrow_and_update().label();
                println!("{}: {}", name, label);
            }
        });
    }

    coordinator
        .watch_directory(dest, pending, Duration::from_secs(2))
        .await
        .context("Stopped watching for manual downloads")?;
    println!("All manual downloads complete");
    Ok(())
}
