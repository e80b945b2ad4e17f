use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlx::SqlitePool;

use quartermaster_lib::engine::{self, AssignOptions, ReturnOptions};
use quartermaster_lib::health::{run_health_checks, DbHealthReport, DbHealthStatus};
use quartermaster_lib::reconcile::{run_reconciliation, DriftKind, ReconcileMode};
use quartermaster_lib::{db, migrate, AppError, EquipmentStatus};

const DB_UNHEALTHY_EXIT_CODE: i32 = 2;
const DRIFT_EXIT_CODE: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "quartermaster", about = "Equipment custody tracker", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance and inspection commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Detect and optionally repair status/custody drift.
    Reconcile(ReconcileArgs),
    /// Assign equipment to a holder.
    Assign(AssignArgs),
    /// Return equipment from its current holder.
    Return(ReturnArgs),
    /// Force an operational status (maintenance, retired, damaged, lost, available).
    SetStatus(SetStatusArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Run the SQLite health checks and report their status.
    Status {
        /// Emit the raw JSON health report instead of the table view.
        #[arg(long)]
        json: bool,
    },
    /// Run VACUUM to compact the database when it is healthy.
    Vacuum,
}

#[derive(Debug, Args)]
struct ReconcileArgs {
    /// Repair orphans instead of only reporting them.
    #[arg(long)]
    apply: bool,
    /// Emit the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct AssignArgs {
    equipment_id: String,
    holder_id: String,
    /// Acting user id, recorded in the audit trail.
    #[arg(long)]
    actor: Option<String>,
    /// Expected return time, epoch milliseconds.
    #[arg(long)]
    expected_return: Option<i64>,
    #[arg(long)]
    condition: Option<String>,
    #[arg(long)]
    note: Option<String>,
}

#[derive(Debug, Args)]
struct ReturnArgs {
    equipment_id: String,
    #[arg(long)]
    actor: Option<String>,
    /// Condition on return; copied onto the equipment record.
    #[arg(long)]
    condition: Option<String>,
    #[arg(long)]
    note: Option<String>,
}

#[derive(Debug, Args)]
struct SetStatusArgs {
    equipment_id: String,
    status: EquipmentStatus,
    #[arg(long)]
    actor: Option<String>,
    #[arg(long)]
    reason: Option<String>,
}

#[tokio::main]
async fn main() {
    quartermaster_lib::init_logging();

    let cli = Cli::parse();
    match handle_cli(cli.command).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn open_pool() -> Result<SqlitePool> {
    let db_path = db::default_db_path().context("determine database path")?;
    db::open_sqlite_pool(&db_path).await
}

async fn open_migrated_pool() -> Result<SqlitePool> {
    let pool = open_pool().await?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply schema migrations")?;
    Ok(pool)
}

async fn handle_cli(command: Commands) -> Result<i32> {
    match command {
        Commands::Db(db) => handle_db_command(db).await,
        Commands::Reconcile(args) => handle_reconcile(args).await,
        Commands::Assign(args) => handle_assign(args).await,
        Commands::Return(args) => handle_return(args).await,
        Commands::SetStatus(args) => handle_set_status(args).await,
    }
}

async fn handle_db_command(command: DbCommand) -> Result<i32> {
    match command {
        DbCommand::Status { json } => {
            let pool = open_pool().await?;
            let report = run_health_checks(&pool)
                .await
                .context("run database health checks")?;
            pool.close().await;

            if json {
                let serialized =
                    serde_json::to_string_pretty(&report).context("serialize health report")?;
                println!("{serialized}");
            } else {
                print_report_table(&report);
            }

            Ok(match report.status {
                DbHealthStatus::Ok => 0,
                DbHealthStatus::Error => 1,
            })
        }
        DbCommand::Vacuum => {
            let pool = open_pool().await?;
            let report = run_health_checks(&pool)
                .await
                .context("run database health checks")?;
            if !matches!(report.status, DbHealthStatus::Ok) {
                eprintln!("Error: database is unhealthy; run `quartermaster db status` first.");
                pool.close().await;
                return Ok(DB_UNHEALTHY_EXIT_CODE);
            }
            let result = sqlx::query("VACUUM;")
                .execute(&pool)
                .await
                .context("vacuum database");
            pool.close().await;
            result?;
            println!("Database vacuum completed.");
            Ok(0)
        }
    }
}

async fn handle_reconcile(args: ReconcileArgs) -> Result<i32> {
    let mode = if args.apply {
        ReconcileMode::Apply
    } else {
        ReconcileMode::DryRun
    };

    let pool = open_migrated_pool().await?;
    let summary = run_reconciliation(&pool, mode).await.map_err(|err| {
        anyhow::Error::from(err).context("run reconciliation")
    })?;
    pool.close().await;

    if args.json {
        let serialized =
            serde_json::to_string_pretty(&summary).context("serialize reconcile summary")?;
        println!("{serialized}");
    } else {
        println!("Reconciliation ({})", if args.apply { "apply" } else { "dry-run" });
        println!("Scanned ASSIGNED equipment : {}", summary.scanned);
        println!("Valid                      : {}", summary.valid);
        println!("Orphans                    : {}", summary.orphans);
        println!("Overlaps                   : {}", summary.overlaps);
        println!("Repaired                   : {}", summary.repaired);
        for finding in &summary.findings {
            let kind = match finding.kind {
                DriftKind::Orphan => "orphan",
                DriftKind::Overlap => "overlap",
            };
            println!(
                "  {:<8} {} ({} active custody record(s)){}",
                kind,
                finding.inventory_no,
                finding.active_custody_count,
                if finding.repaired { " [repaired]" } else { "" }
            );
        }
    }

    let unresolved = summary.overlaps + summary.orphans - summary.repaired;
    Ok(if unresolved > 0 { DRIFT_EXIT_CODE } else { 0 })
}

async fn handle_assign(args: AssignArgs) -> Result<i32> {
    let pool = open_migrated_pool().await?;
    let result = engine::assign_equipment(
        &pool,
        &args.equipment_id,
        &args.holder_id,
        args.actor.as_deref(),
        AssignOptions {
            expected_return_at: args.expected_return,
            condition_on_assign: args.condition,
            note: args.note,
        },
    )
    .await;
    pool.close().await;

    match result {
        Ok(record) => {
            let serialized =
                serde_json::to_string_pretty(&record).context("serialize custody record")?;
            println!("{serialized}");
            Ok(0)
        }
        Err(err) => print_engine_error(err),
    }
}

async fn handle_return(args: ReturnArgs) -> Result<i32> {
    let pool = open_migrated_pool().await?;
    let result = engine::return_equipment(
        &pool,
        &args.equipment_id,
        args.actor.as_deref(),
        ReturnOptions {
            condition_on_return: args.condition,
            note: args.note,
        },
    )
    .await;
    pool.close().await;

    match result {
        Ok(record) => {
            let serialized =
                serde_json::to_string_pretty(&record).context("serialize custody record")?;
            println!("{serialized}");
            Ok(0)
        }
        Err(err) => print_engine_error(err),
    }
}

async fn handle_set_status(args: SetStatusArgs) -> Result<i32> {
    let pool = open_migrated_pool().await?;
    let result = engine::force_status_change(
        &pool,
        &args.equipment_id,
        args.status,
        args.actor.as_deref(),
        args.reason.as_deref(),
    )
    .await;
    pool.close().await;

    match result {
        Ok(updated) => {
            let serialized =
                serde_json::to_string_pretty(&updated).context("serialize equipment")?;
            println!("{serialized}");
            Ok(0)
        }
        Err(err) => print_engine_error(err),
    }
}

fn print_engine_error(err: quartermaster_lib::EngineError) -> Result<i32> {
    let app: AppError = err.into();
    eprintln!("Error: {app}");
    Ok(1)
}

fn print_report_table(report: &DbHealthReport) {
    println!("Database health report");
    println!("Status       : {}", status_label(&report.status));
    println!("Schema hash  : {}", report.schema_hash);
    println!("App version  : {}", report.app_version);
    println!("Generated at : {}", report.generated_at);

    println!("\nChecks:");
    println!(
        "{:<20} {:<7} {:>13}  Details",
        "Check", "Passed", "Duration (ms)"
    );
    for check in &report.checks {
        let passed = if check.passed { "yes" } else { "no" };
        let details = check
            .details
            .as_deref()
            .map(|value| value.replace('\n', " "))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<7} {:>13}  {}",
            check.name, passed, check.duration_ms, details
        );
    }

    if report.offenders.is_empty() {
        println!("\nOffenders: none");
    } else {
        println!("\nOffenders:");
        println!("{:<20} {:>10}  Message", "Table", "RowID");
        for offender in &report.offenders {
            println!(
                "{:<20} {:>10}  {}",
                offender.table,
                offender.rowid,
                offender.message.replace('\n', " ")
            );
        }
    }
}

fn status_label(status: &DbHealthStatus) -> &'static str {
    match status {
        DbHealthStatus::Ok => "ok",
        DbHealthStatus::Error => "error",
    }
}
