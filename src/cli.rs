//! Embeddable migration CLI.
//!
//! Scripts are registered statically in the host binary, so the CLI ships as
//! a library entry point rather than a standalone tool: the host builds its
//! [`Registry`] and hands it to [`run`].
//!
//! ```rust,no_run
//! use tidemark::{cli, Registry};
//!
//! fn main() {
//!     let registry = Registry::new(vec![/* Box::new(CreateUsers), ... */])
//!         .unwrap_or_else(|e| {
//!             eprintln!("error: {e}");
//!             std::process::exit(1);
//!         });
//!     cli::run(&registry);
//! }
//! ```

use crate::config::MigratorConfig;
use crate::connection::connect;
use crate::executor::MayPostgresExecutor;
use crate::migration::{ApplyOptions, MigrationError, Migrator, Registry, RevertOptions};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "migrate")]
#[command(about = "Schema migration management", version)]
struct Cli {
    /// Database connection URL (falls back to TIDEMARK_DATABASE_URL,
    /// DATABASE_URL, then config/config.toml)
    #[arg(long)]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show migration status (applied vs pending)
    Status,

    /// Apply pending migrations
    Up {
        /// Number of migrations to apply (default: all pending)
        #[arg(long)]
        count: Option<usize>,

        /// Abort if more than this many migrations are pending
        #[arg(long)]
        max: Option<usize>,
    },

    /// Revert applied migrations
    Down {
        /// Number of migrations to revert (default: 1)
        #[arg(long)]
        count: Option<usize>,

        /// Revert the whole most recent batch
        #[arg(long, conflicts_with = "count")]
        batch: bool,
    },

    /// Generate a new migration source file
    Generate {
        /// Migration name (e.g. "create-users")
        name: String,

        /// Directory to place the generated file in
        #[arg(long, default_value = "migrations")]
        dir: PathBuf,
    },
}

/// Parse arguments, run the requested command against `registry`, and exit.
///
/// Exit code 0 on success; 1 on any integrity violation or execution
/// failure, with the failing identifier and error kind printed to stderr.
pub fn run(registry: &Registry) -> ! {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    // Generate needs no database connection.
    if let Commands::Generate { name, dir } = &cli.command {
        match generate(dir, name) {
            Ok(path) => {
                println!("generated migration: {}", path.display());
                println!("edit the file and register the script in your Registry");
                process::exit(0);
            }
            Err(e) => {
                eprintln!("{} {e}", "error:".red());
                process::exit(1);
            }
        }
    }

    let config = MigratorConfig::load().unwrap_or_else(|e| {
        log::warn!("configuration unavailable, using defaults: {e}");
        MigratorConfig::default()
    });

    let database_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("TIDEMARK_DATABASE_URL").ok())
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| config.url.clone());

    let client = match connect(&database_url) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{} failed to connect to database: {e}", "error:".red());
            process::exit(1);
        }
    };

    let executor = MayPostgresExecutor::new(client);
    let migrator = Migrator::new(registry, &executor);

    let result = match cli.command {
        Commands::Status => status(&migrator),
        Commands::Up { count, max } => up(&migrator, count, max.or(config.max_migrations)),
        Commands::Down { count, batch } => down(&migrator, count, batch),
        Commands::Generate { .. } => unreachable!("handled above"),
    };

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            process::exit(1);
        }
    }
}

fn status(migrator: &Migrator<'_>) -> Result<(), MigrationError> {
    let status = migrator.status()?;

    for entry in &status.entries {
        if let Some(applied_at) = entry.applied_at {
            let batch = entry
                .batch
                .map_or_else(|| "-".to_string(), |b| b.to_string());
            println!(
                "{} {} (applied {}, batch {})",
                "applied".green(),
                entry.identifier,
                applied_at.format("%Y-%m-%d %H:%M:%S"),
                batch
            );
        } else {
            println!("{} {}", "pending".yellow(), entry.identifier);
        }
    }

    println!(
        "\n{} applied, {} pending",
        status.applied_count, status.pending_count
    );
    Ok(())
}

fn up(
    migrator: &Migrator<'_>,
    count: Option<usize>,
    max: Option<usize>,
) -> Result<(), MigrationError> {
    let applied = migrator.apply_pending(ApplyOptions { count, max })?;

    if applied.is_empty() {
        println!("no pending migrations");
    } else {
        for identifier in &applied {
            println!("{} {identifier}", "applied".green());
        }
        println!("applied {} migration(s)", applied.len());
    }
    Ok(())
}

fn down(
    migrator: &Migrator<'_>,
    count: Option<usize>,
    batch: bool,
) -> Result<(), MigrationError> {
    let reverted = migrator.revert(RevertOptions { count, batch })?;

    if reverted.is_empty() {
        println!("no applied migrations to revert");
    } else {
        for identifier in &reverted {
            println!("{} {identifier}", "reverted".green());
        }
        println!("reverted {} migration(s)", reverted.len());
    }
    Ok(())
}

/// Write a timestamped script template and return its path.
fn generate(dir: &PathBuf, name: &str) -> Result<PathBuf, std::io::Error> {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    let timestamp = Utc::now().timestamp();
    let identifier = format!("{timestamp}-{slug}");

    std::fs::create_dir_all(dir)?;

    let filename = format!("m{timestamp}_{}.rs", slug.replace('-', "_"));
    let path = dir.join(filename);

    let template = format!(
        r#"use tidemark::{{DbError, Migration, SchemaManager}};

pub struct {struct_name};

impl Migration for {struct_name} {{
    fn identifier(&self) -> &str {{
        "{identifier}"
    }}

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {{
        manager.execute("-- forward DDL here", &[])
    }}

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {{
        manager.execute("-- inverse DDL here", &[])
    }}
}}
"#,
        struct_name = to_pascal_case(&slug),
    );

    std::fs::write(&path, template)?;
    Ok(path)
}

fn to_pascal_case(slug: &str) -> String {
    slug.split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
