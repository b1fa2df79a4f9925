use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use pos_daemon::state::AppState;
use pos_eod::{CancelFlag, EodOutcome};
use pos_reconcile::{reconcile, ReconPosition, ReconcileThresholds};

#[derive(Parser)]
#[command(name = "pos")]
#[command(about = "Position loader back-office CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// End-of-day operations
    Eod {
        #[command(subcommand)]
        cmd: EodCmd,
    },

    /// Day-over-day reconciliation for one account
    Recon {
        #[arg(long)]
        account: String,
        #[arg(long)]
        date: NaiveDate,
    },

    /// Replay a dead-letter topic back onto its origin
    Replay {
        #[arg(long)]
        topic: String,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum EodCmd {
    /// Run EOD for one account
    Run {
        #[arg(long)]
        account: String,
        #[arg(long)]
        date: NaiveDate,
        /// Use the late-EOD window checks
        #[arg(long, default_value_t = false)]
        late: bool,
    },

    /// Run EOD for every known account (or an explicit list)
    RunAll {
        #[arg(long)]
        date: NaiveDate,
        /// Comma-separated account ids; all known accounts when omitted
        #[arg(long)]
        accounts: Option<String>,
    },

    /// Roll an account back to its prior batch
    Rollback {
        #[arg(long)]
        account: String,
        #[arg(long)]
        date: NaiveDate,
    },

    /// Clear EOD status + content hash for a rerun
    Reset {
        #[arg(long)]
        account: String,
        #[arg(long)]
        date: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = pos_store::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = pos_store::status(&pool).await?;
                    println!("db_ok={} has_batches_table={}", s.ok, s.has_batches_table);
                }
                DbCmd::Migrate => {
                    pos_store::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = pos_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Eod { cmd } => {
            let state = build_state().await?;
            match cmd {
                EodCmd::Run { account, date, late } => {
                    let cancel = CancelFlag::new();
                    let outcome = if late {
                        state.engine.process_late_eod(&account, date, &cancel).await
                    } else {
                        state.engine.process_eod(&account, date, &cancel).await
                    };
                    match outcome {
                        Ok(EodOutcome::Completed { position_count }) => {
                            println!("outcome=COMPLETED position_count={position_count}");
                        }
                        Ok(EodOutcome::AlreadyCompleted) => println!("outcome=ALREADY_COMPLETED"),
                        Ok(EodOutcome::Skipped(reason)) => {
                            println!("outcome=SKIPPED reason={}", reason.as_str());
                        }
                        Err(e) => {
                            println!("outcome=FAILED code={} error={e}", e.code());
                            std::process::exit(1);
                        }
                    }
                }

                EodCmd::RunAll { date, accounts } => {
                    let account_ids: Vec<String> = match accounts {
                        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
                        None => pos_store::list_accounts(&state.pool)
                            .await?
                            .into_iter()
                            .map(|(a, _)| a)
                            .collect(),
                    };
                    let result = state.orchestrator.process_all(account_ids, date).await;
                    println!(
                        "total={} completed={} skipped={} failed={} not_started={} timed_out={} elapsed_secs={}",
                        result.total,
                        result.completed,
                        result.skipped,
                        result.failed,
                        result.not_started,
                        result.timed_out,
                        result.elapsed.as_secs()
                    );
                    for (account, error) in &result.failures {
                        println!("failed account={account} error={error}");
                    }
                    if result.failed > 0 || result.timed_out {
                        std::process::exit(1);
                    }
                }

                EodCmd::Rollback { account, date } => {
                    let rolled = state.engine.rollback_eod(&account, date).await?;
                    println!("rolled_back={rolled}");
                }

                EodCmd::Reset { account, date } => {
                    state.engine.reset_eod(&account, date).await?;
                    println!("reset=true");
                }
            }
        }

        Commands::Recon { account, date } => {
            let state = build_state().await?;
            let current = pos_store::get_positions_by_date(&state.pool, &account, date).await?;
            let prev_date = state.calendar.previous_business_day(date);
            let previous =
                pos_store::get_positions_by_date(&state.pool, &account, prev_date).await?;
            let report = reconcile(
                &account,
                date,
                &current.iter().map(ReconPosition::from).collect::<Vec<_>>(),
                &previous.iter().map(ReconPosition::from).collect::<Vec<_>>(),
                &ReconcileThresholds::default(),
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Replay { topic } => {
            let state = build_state().await?;
            let replayed = pos_events::replay(state.bus.as_ref(), &topic).await?;
            println!("topic={topic} replayed={replayed}");
        }
    }

    Ok(())
}

/// Same composition root as the daemon: config from POS_CONFIG, Postgres
/// from POS_DATABASE_URL, holiday set loaded eagerly.
async fn build_state() -> Result<std::sync::Arc<AppState>> {
    let (config, config_hash) = match std::env::var("POS_CONFIG") {
        Ok(paths) => {
            let parts: Vec<&str> = paths.split(',').map(str::trim).collect();
            let loaded = pos_config::load_layered_yaml(&parts)?;
            (loaded.typed()?, loaded.config_hash)
        }
        Err(_) => (pos_config::LoaderConfig::default(), "default".to_string()),
    };

    let pool = pos_store::connect_from_env().await?;
    let state = AppState::build(pool.clone(), config, config_hash)?;
    state
        .calendar
        .replace_holidays(pos_store::load_holidays(&pool).await?);
    Ok(state)
}
