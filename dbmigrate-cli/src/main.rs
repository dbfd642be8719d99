//! dbmigrate command-line tool
//!
//! Applies, reverts and inspects file-based SQL migrations. Settings come from
//! `config/dbmigrate.toml`, `DBMIGRATE__*` environment variables (a `.env` file
//! is loaded first) and finally the command-line options below.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use crossbeam_channel::{select, unbounded, Receiver};
use dbmigrate::migration::{Direction, EventSinks, MigrateError, Migration, Migrator, Version};
use dbmigrate::{provider, Settings};
use std::process;
use std::thread;

#[derive(Parser)]
#[command(name = "dbmigrate")]
#[command(about = "Versioned SQL schema migrations")]
#[command(version)]
struct Cli {
    /// Database engine (sqlite, postgres, mysql)
    #[arg(long)]
    engine: Option<String>,

    /// Database name; a file path for sqlite
    #[arg(long)]
    database: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Migrations directory name, looked up from the current directory upwards
    #[arg(long)]
    migrations_dir: Option<String>,

    /// Migrations table name
    #[arg(long)]
    migrations_table: Option<String>,

    /// Roll back versions without a down migration by removing them from the ledger only
    #[arg(long)]
    allow_missing_downs: bool,

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
    /// Apply pending migrations
    Migrate {
        /// Number of migrations to apply (default: all pending)
        #[arg(long, default_value_t = 0)]
        steps: usize,
    },

    /// Roll back applied migrations
    Rollback {
        /// Number of migrations to roll back (default: the last batch)
        #[arg(long, default_value_t = 0)]
        steps: usize,
    },

    /// Roll back and re-apply migrations
    Redo {
        /// Number of migrations to redo (default: the last batch)
        #[arg(long, default_value_t = 0)]
        steps: usize,
    },

    /// Show migration status (applied vs pending)
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate an empty up/down migration pair
    Generate {
        /// Migration description (e.g. "create users table")
        #[arg(required = true)]
        description: Vec<String>,

        /// Restrict the migration to one engine
        #[arg(long)]
        engine: Option<String>,
    },

    /// Show migrator and ledger information
    Info {
        /// Show information for a specific migration version (YYYYMMDDHHMMSS)
        #[arg(long)]
        version: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    dotenv::dotenv().ok();

    if let Err(e) = run(cli) {
        eprintln!("{} {e:#}", "❌ Error:".red().bold());
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = settings(&cli)?;
    let quiet = cli.quiet;

    let (applied_tx, applied_rx) = unbounded();
    let (errors_tx, errors_rx) = unbounded();
    let events = EventSinks::new().with_applied(applied_tx).with_errors(errors_tx);

    let cwd = std::env::current_dir().context("can't get working directory")?;
    let mut migrator = Migrator::open_with_events(settings, &cwd, events)?;
    let printer = thread::spawn(move || print_events(&applied_rx, &errors_rx));

    let result = match cli.command {
        Commands::Migrate { steps } => handle_migrate(&mut migrator, steps, quiet),
        Commands::Rollback { steps } => handle_rollback(&mut migrator, steps, quiet),
        Commands::Redo { steps } => handle_redo(&mut migrator, steps, quiet),
        Commands::Status { json } => handle_status(&migrator, json),
        Commands::Generate { description, engine } => {
            handle_generate(&migrator, &description.join(" "), engine.as_deref())
        }
        Commands::Info { version } => handle_info(&migrator, version.as_deref()),
    };

    // Dropping the migrator drops the event senders, which ends the printer
    let closed = migrator.close();
    drop(migrator);
    if printer.join().is_err() {
        log::warn!("event printer thread panicked");
    }

    result?;
    closed.context("error shutting down migrator")
}

fn settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load().context("can't load settings")?;
    if let Some(engine) = &cli.engine {
        settings.engine = engine.clone();
    }
    if let Some(database) = &cli.database {
        settings.database = database.clone();
    }
    if cli.host.is_some() {
        settings.host = cli.host.clone();
    }
    if cli.port.is_some() {
        settings.port = cli.port;
    }
    if cli.user.is_some() {
        settings.user = cli.user.clone();
    }
    if cli.password.is_some() {
        settings.password = cli.password.clone();
    }
    if let Some(dir) = &cli.migrations_dir {
        settings.migrations_dir = dir.clone();
    }
    if let Some(table) = &cli.migrations_table {
        settings.migrations_table = table.clone();
    }
    settings.allow_missing_downs |= cli.allow_missing_downs;
    Ok(settings)
}

/// Print one line per event until the migrator drops its senders
fn print_events(applied: &Receiver<Migration>, errors: &Receiver<MigrateError>) {
    let mut errors_open = true;
    loop {
        let done = if errors_open {
            select! {
                recv(applied) -> msg => match msg {
                    Ok(m) => {
                        print_applied(&m);
                        false
                    }
                    Err(_) => true,
                },
                recv(errors) -> msg => {
                    match msg {
                        Ok(e) => print_skipped(&e),
                        Err(_) => errors_open = false,
                    }
                    false
                },
            }
        } else {
            match applied.recv() {
                Ok(m) => {
                    print_applied(&m);
                    false
                }
                Err(_) => true,
            }
        };
        if done {
            break;
        }
    }
    for e in errors.try_iter() {
        print_skipped(&e);
    }
}

fn print_applied(migration: &Migration) {
    let action = match migration.direction {
        Direction::Up => "applied",
        Direction::Down => "rolled back",
    };
    println!("  ✓ migration {} has been successfully {action}", migration.file_name().bold());
}

fn print_skipped(err: &MigrateError) {
    eprintln!("  {} {err}", "⚠".yellow());
}

/// Tell the user how far a run got before it failed
fn partial(err: MigrateError, action: &str) -> anyhow::Error {
    if err.completed() > 0 {
        eprintln!("{} migration(s) {action} before the failure", err.completed());
    }
    err.into()
}

fn handle_migrate(migrator: &mut Migrator, steps: usize, quiet: bool) -> anyhow::Result<()> {
    let applied = migrator.migrate(steps).map_err(|e| partial(e, "applied"))?;
    if !quiet {
        if applied > 0 {
            println!("{} Successfully applied {applied} migration(s)", "✅".green());
        } else {
            println!("{} No migrations to apply", "✅".green());
        }
    }
    Ok(())
}

fn handle_rollback(migrator: &mut Migrator, steps: usize, quiet: bool) -> anyhow::Result<()> {
    let rolled_back = migrator.rollback(steps).map_err(|e| partial(e, "rolled back"))?;
    if !quiet {
        if rolled_back > 0 {
            println!("{} Successfully rolled back {rolled_back} migration(s)", "✅".green());
        } else {
            println!("{} No migrations to roll back", "✅".green());
        }
    }
    Ok(())
}

fn handle_redo(migrator: &mut Migrator, steps: usize, quiet: bool) -> anyhow::Result<()> {
    let redone = migrator.redo(steps).map_err(|e| partial(e, "re-applied"))?;
    if !quiet {
        if redone > 0 {
            println!("{} Successfully redone {redone} migration(s)", "✅".green());
        } else {
            println!("{} Nothing to redo", "✅".green());
        }
    }
    Ok(())
}

fn handle_status(migrator: &Migrator, json: bool) -> anyhow::Result<()> {
    let status = migrator.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("\n📊 Migration Status\n");
    if status.total() == 0 {
        println!("No migrations found in {}", migrator.migrations_dir().display());
    }
    for m in status.migrations() {
        match m.applied_at {
            Some(at) => println!(
                "  {} {} {}",
                "✓".green(),
                m.file_name(),
                format!("(applied {})", at.format("%Y-%m-%d %H:%M:%S")).dimmed()
            ),
            None => println!("  {} {} {}", "⏳".yellow(), m.file_name(), "(pending)".dimmed()),
        }
    }
    println!(
        "\n📈 Summary: {} applied, {} pending",
        status.applied_count(),
        status.pending_count()
    );
    Ok(())
}

fn handle_generate(migrator: &Migrator, description: &str, engine: Option<&str>) -> anyhow::Result<()> {
    let paths = migrator.generate_migration(description, engine)?;
    for path in paths {
        println!("{} Generated migration: {}", "✅".green(), path.display());
    }
    Ok(())
}

fn handle_info(migrator: &Migrator, version: Option<&str>) -> anyhow::Result<()> {
    let status = migrator.status()?;

    if let Some(version) = version {
        let version: Version = version.parse()?;
        let migration = migrator.get_migration(version, Direction::Up)?;
        let applied_at = status
            .migrations()
            .iter()
            .find(|m| m.version == version)
            .and_then(|m| m.applied_at);

        println!("\n📋 Migration Information\n");
        println!("Version: {}", migration.version);
        println!("Name: {}", migration.name);
        println!("File: {}", migrator.migrations_dir().join(migration.file_name()).display());
        if let Some(engine) = &migration.engine {
            println!("Engine: {engine}");
        }
        match applied_at {
            Some(at) => println!("Applied At: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("Status: Pending"),
        }
        return Ok(());
    }

    let settings = migrator.settings();
    let driver = provider::provider(migrator.engine()).map_or("unknown", |p| p.driver_name());

    println!("\n📋 Migrator Information\n");
    println!("Engine: {} (driver {driver})", migrator.engine());
    println!("Project Dir: {}", migrator.project_dir().display());
    println!("Migrations Dir: {}", migrator.migrations_dir().display());
    println!("Migrations Table: {}", settings.migrations_table);
    println!("Allow Missing Downs: {}", settings.allow_missing_downs);
    println!("Total Migrations: {}", status.total());
    println!("Applied: {}", status.applied_count());
    println!("Pending: {}", status.pending_count());

    if let Some(latest) = migrator.latest_version_migration()? {
        println!("Latest Applied Version: {latest}");
    }
    if let Some(last) = migrator.last_applied_migration()? {
        println!("Last Applied Migration: {last}");
    }
    if let Some(next) = status.next_pending_version() {
        println!("Next Pending Version: {next}");
    }
    Ok(())
}
