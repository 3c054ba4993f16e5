//! Command handlers: each CLI subcommand maps to one function here, wiring
//! the catalog, the Glacier client and the pipeline together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::info;

use crate::cli::{Cli, Command, CreateArgs, CuratorArgs, DeleteArgs, GetArgs, ListArgs, ShowArgs};
use crate::cloud::client::{GlacierVaultService, VaultConfig};
use crate::cloud::VaultService;
use crate::constants::{DEFAULT_DATABASE_DIR, DEFAULT_DATABASE_FILE, MAX_PART_SIZE_MIB};
use crate::crypto::validate_passphrase;
use crate::db::model::BackupRecord;
use crate::db::Catalog;
use crate::models::BackupRequest;
use crate::pipeline::{run_backup, run_restore};

/// Dispatch one parsed invocation.
pub async fn run(cli: Cli) -> Result<()> {
    let catalog = Catalog::open(&database_path(cli.database)?)?;
    let config = VaultConfig {
        region: cli.region,
        profile: cli.profile,
    };

    match cli.command {
        Command::Create(args) => create(&catalog, &config, args).await,
        Command::Get(args) => get(&catalog, &config, args).await,
        Command::List(args) => list(&catalog, args),
        Command::Show(args) => show(&catalog, args),
        Command::Delete(args) => delete(&catalog, &config, args).await,
        Command::Curator(args) => curator(&catalog, &config, args).await,
    }
}

async fn create(catalog: &Catalog, config: &VaultConfig, args: CreateArgs) -> Result<()> {
    validate_passphrase(&args.passphrase)?;
    let part_size = part_size_bytes(args.part_size)?;

    let request = BackupRequest {
        roots: args.files,
        exclude_patterns: args.excludes,
        include_patterns: args.includes,
        vault: args.vault,
        description: args.description,
        passphrase: args.passphrase,
        part_size,
    };

    let stored_passphrase = args.save_passphrase.then_some(request.passphrase.as_str());
    let backup_id =
        catalog.save_intent(&request.vault, &request.description, stored_passphrase)?;
    let service: Arc<dyn VaultService> = Arc::new(GlacierVaultService::new(config)?);

    let result = run_backup(service, &request, |event| {
        catalog.append_content(backup_id, &event)
    })
    .await;

    // the outcome is recorded even for failed runs, with the session id
    // for manual reconciliation
    let error_text = result.error.as_ref().map(|e| format!("{:#}", e));
    catalog.update_outcome(
        backup_id,
        result.upload_id.as_deref(),
        &result.outcome,
        error_text.as_deref(),
    )?;

    match result.error {
        None => {
            println!(
                "Backup {} completed: {} bytes into vault '{}'",
                backup_id, result.outcome.total_size, result.vault
            );
            Ok(())
        }
        Some(e) => Err(e.context(format!("backup {} failed", backup_id))),
    }
}

async fn get(catalog: &Catalog, config: &VaultConfig, args: GetArgs) -> Result<()> {
    let record = catalog
        .get(args.backup_id)?
        .ok_or_else(|| anyhow!("there is no backup with id {}", args.backup_id))?;
    let archive_id = record.archive_id.as_deref().ok_or_else(|| {
        anyhow!(
            "backup {} has no stored archive, its upload never completed",
            record.id
        )
    })?;
    let passphrase = args
        .passphrase
        .as_deref()
        .or(record.passphrase.as_deref())
        .ok_or_else(|| {
            anyhow!(
                "backup {} has no stored passphrase, pass --passphrase",
                record.id
            )
        })?;
    validate_passphrase(passphrase)?;

    let service: Arc<dyn VaultService> = Arc::new(GlacierVaultService::new(config)?);
    let written = run_restore(
        service,
        &record.vault,
        archive_id,
        args.tier.as_str(),
        Duration::from_secs(args.poll_interval),
        passphrase,
        &args.target,
    )
    .await?;

    println!(
        "Restored backup {} to '{}' ({} bytes)",
        record.id,
        args.target.display(),
        written
    );
    Ok(())
}

fn list(catalog: &Catalog, args: ListArgs) -> Result<()> {
    let records = catalog.enumerate(args.vault.as_deref())?;
    println!(
        "{:>6}  {:<19}  {:<16}  {:>12}  {:<7}  DESCRIPTION",
        "ID", "CREATED", "VAULT", "BYTES", "STATE"
    );
    for record in &records {
        let size = if args.human {
            format_size(record.length)
        } else {
            record.length.to_string()
        };
        println!(
            "{:>6}  {:<19}  {:<16}  {:>12}  {:<7}  {}",
            record.id,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.vault,
            size,
            state(record),
            record.description
        );
    }
    Ok(())
}

fn show(catalog: &Catalog, args: ShowArgs) -> Result<()> {
    let record = catalog
        .get(args.backup_id)?
        .ok_or_else(|| anyhow!("there is no backup with id {}", args.backup_id))?;

    println!("Backup {} ({})", record.id, state(&record));
    println!("  created:     {}", record.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  vault:       {}", record.vault);
    println!("  description: {}", record.description);
    println!("  size:        {} bytes", record.length);
    if let Some(archive_id) = &record.archive_id {
        println!("  archive:     {}", archive_id);
    }
    if let Some(checksum) = &record.checksum {
        println!("  checksum:    {}", checksum);
    }
    if let Some(upload_id) = &record.upload_id {
        println!("  upload:      {}", upload_id);
    }
    if let Some(error) = &record.error {
        println!("  error:       {}", error);
    }
    if record.passphrase.is_some() {
        println!("  passphrase:  stored");
    }

    let contents = catalog.contents(record.id)?;
    println!("  files:       {}", contents.len());
    for content in &contents {
        println!("    {:>12}  {}", content.length, content.archive_path);
    }
    Ok(())
}

async fn delete(catalog: &Catalog, config: &VaultConfig, args: DeleteArgs) -> Result<()> {
    let record = catalog
        .get(args.backup_id)?
        .ok_or_else(|| anyhow!("there is no backup with id {}", args.backup_id))?;

    let service = GlacierVaultService::new(config)?;
    delete_backup(catalog, &service, &record).await?;
    println!("Deleted backup {}", record.id);
    Ok(())
}

async fn curator(catalog: &Catalog, config: &VaultConfig, args: CuratorArgs) -> Result<()> {
    let expired = match (args.older_than_days, args.keep_n) {
        (Some(days), None) => {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            catalog.older_than(&args.vault, cutoff)?
        }
        (None, Some(keep)) => catalog.beyond_newest(&args.vault, keep)?,
        _ => bail!("pass exactly one of --older-than-days and --keep-n"),
    };
    if expired.is_empty() {
        println!("Nothing to curate in vault '{}'", args.vault);
        return Ok(());
    }

    if args.dry_run {
        for record in &expired {
            println!(
                "Would delete backup {} from {} ({})",
                record.id,
                record.created_at.format("%Y-%m-%d"),
                record.description
            );
        }
        return Ok(());
    }

    let service = GlacierVaultService::new(config)?;
    for record in &expired {
        delete_backup(catalog, &service, record).await?;
        info!(
            "Deleted backup {} from {}",
            record.id,
            record.created_at.format("%Y-%m-%d")
        );
    }
    println!(
        "Deleted {} backup(s) from vault '{}'",
        expired.len(),
        args.vault
    );
    Ok(())
}

/// Remove one backup from the service (when an archive exists) and from the
/// catalog.
async fn delete_backup(
    catalog: &Catalog,
    service: &dyn VaultService,
    record: &BackupRecord,
) -> Result<()> {
    if let Some(archive_id) = &record.archive_id {
        service
            .delete_archive(&record.vault, archive_id)
            .await
            .with_context(|| format!("could not delete the archive of backup {}", record.id))?;
    }
    catalog.delete(record.id)
}

fn state(record: &BackupRecord) -> &'static str {
    if record.succeeded() {
        "ok"
    } else if record.error.is_some() {
        "failed"
    } else {
        "pending"
    }
}

fn database_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("could not determine the home directory, pass --database"))?;
    Ok(home.join(DEFAULT_DATABASE_DIR).join(DEFAULT_DATABASE_FILE))
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Convert and validate a part size given in MiB. The service only accepts
/// power-of-two sizes up to 4 GiB.
fn part_size_bytes(mib: u64) -> Result<usize> {
    if mib == 0 || mib > MAX_PART_SIZE_MIB || !mib.is_power_of_two() {
        bail!(
            "the part size must be a power of two between 1 and {} MiB",
            MAX_PART_SIZE_MIB
        );
    }
    Ok((mib * 1024 * 1024) as usize)
}
