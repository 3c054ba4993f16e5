use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::constants::{DEFAULT_PART_SIZE_MIB, DEFAULT_POLL_INTERVAL_SECS};

/// Command-line arguments for the coldvault tool.
///
/// Global options cover the catalog database and the AWS connection; each
/// subcommand carries the options of one operation.
#[derive(Parser, Debug)]
#[clap(name = "coldvault", about = "Encrypted, chunked backups to cold storage", version)]
pub struct Cli {
    /// Path of the local catalog database (default: ~/.coldvault/catalog.db)
    #[clap(long, global = true, env = "COLDVAULT_DATABASE")]
    pub database: Option<PathBuf>,

    /// AWS region of the vault
    #[clap(long, global = true, env = "AWS_REGION")]
    pub region: Option<String>,

    /// AWS credentials profile
    #[clap(long, global = true, env = "AWS_PROFILE")]
    pub profile: Option<String>,

    /// Verbose logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Package, encrypt and upload files into a vault
    Create(CreateArgs),
    /// Retrieve and decrypt a stored backup
    Get(GetArgs),
    /// List the backups recorded in the catalog
    List(ListArgs),
    /// Show one backup including its packaged files
    Show(ShowArgs),
    /// Delete one backup, remotely and from the catalog
    Delete(DeleteArgs),
    /// Delete every backup in a vault older than a cutoff
    Curator(CuratorArgs),
}

#[derive(ClapArgs, Debug)]
pub struct CreateArgs {
    /// Files or directories to back up
    #[clap(required = true)]
    pub files: Vec<PathBuf>,

    /// Name of the target vault
    #[clap(short = 'a', long, env = "COLDVAULT_VAULT")]
    pub vault: String,

    /// Human description stored with the backup
    #[clap(short, long, default_value = "")]
    pub description: String,

    /// Regular expression for files to exclude (repeatable)
    #[clap(short, long = "exclude")]
    pub excludes: Vec<String>,

    /// Regular expression that re-includes an excluded file (repeatable)
    #[clap(short, long = "include")]
    pub includes: Vec<String>,

    /// Upload part size in MiB; must be a power of two up to 4096
    #[clap(long, default_value_t = DEFAULT_PART_SIZE_MIB)]
    pub part_size: u64,

    /// Passphrase the backup is encrypted with
    #[clap(short, long, env = "COLDVAULT_PASSPHRASE", hide_env_values = true)]
    pub passphrase: String,

    /// Store the passphrase in plaintext in the local catalog, so `get`
    /// works without re-entering it
    #[clap(long)]
    pub save_passphrase: bool,
}

#[derive(ClapArgs, Debug)]
pub struct GetArgs {
    /// Catalog id of the backup to retrieve
    pub backup_id: i64,

    /// File the decrypted package is written to
    #[clap(short, long)]
    pub target: PathBuf,

    /// Retrieval tier of the service
    #[clap(long, value_enum, default_value = "standard")]
    pub tier: Tier,

    /// Seconds between retrieval job status polls
    #[clap(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS)]
    pub poll_interval: u64,

    /// Passphrase the backup was encrypted with; falls back to the one
    /// stored at create time
    #[clap(short, long, env = "COLDVAULT_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ListArgs {
    /// Only list backups of this vault
    #[clap(short = 'a', long)]
    pub vault: Option<String>,

    /// Print sizes in KiB/MiB/GiB instead of bytes
    #[clap(long)]
    pub human: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ShowArgs {
    /// Catalog id of the backup to show
    pub backup_id: i64,
}

#[derive(ClapArgs, Debug)]
pub struct DeleteArgs {
    /// Catalog id of the backup to delete
    pub backup_id: i64,
}

#[derive(ClapArgs, Debug)]
#[clap(group(clap::ArgGroup::new("retention").required(true)))]
pub struct CuratorArgs {
    /// Vault to curate
    #[clap(short = 'a', long, env = "COLDVAULT_VAULT")]
    pub vault: String,

    /// Delete backups older than this many days
    #[clap(long, group = "retention")]
    pub older_than_days: Option<u32>,

    /// Keep only the newest N backups and delete the rest
    #[clap(long, group = "retention")]
    pub keep_n: Option<usize>,

    /// Only print what would be deleted
    #[clap(long)]
    pub dry_run: bool,
}

/// Service tier of a retrieval job; colder tiers are cheaper and slower.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Expedited,
    Standard,
    Bulk,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Expedited => "Expedited",
            Tier::Standard => "Standard",
            Tier::Bulk => "Bulk",
        }
    }
}
