// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The `apero` command line.

pub mod inspect;
pub mod reset;
pub mod run;
mod workspace;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::engine::EXIT_OK;
use crate::observability::init_logging;
use inspect::{GetRequest, RejectAction};
use run::RunOptions;

pub use workspace::Workspace;

#[derive(Debug, Parser)]
#[command(
    name = "apero",
    version,
    about = "Orchestrates the reduction of nightly spectrograph data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Profile file (YAML or TOML); defaults to $APERO_PROFILE
    #[arg(long, global = true)]
    pub profile: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG wins when set
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Worker pool flags.
#[derive(Debug, Clone, Args)]
pub struct PoolArgs {
    /// Concurrent invocations; defaults to the profile's scheduler.pool_size
    #[arg(long)]
    pub pool_size: Option<usize>,
    /// Run recipes on threads of this process instead of child processes
    #[arg(long)]
    pub in_process: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Plan a run table and execute it
    Process {
        /// Run table (YAML)
        run_table: PathBuf,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Plan a run table and report what it would need, without running it
    Precheck {
        run_table: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one recipe by hand: <recipe> [obs_dir] [files...] [--flag ...]
    Recipe {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        tokens: Vec<String>,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Watch the raw tree and process nights once they are complete
    Trigger {
        /// Run table; defaults to trigger.run_table of the profile
        #[arg(long)]
        run_table: Option<PathBuf>,
        /// Scan and submit once, then exit
        #[arg(long)]
        once: bool,
        #[command(flatten)]
        pool: PoolArgs,
    },
    /// Index the raw tree once
    Index {
        /// Only this night
        night: Option<String>,
    },
    /// Clear products, databases and scratch; raw data is kept
    Reset {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Print the file index per night
    Listing {
        #[arg(long)]
        night: Option<String>,
        /// raw, preprocessed, reduced, calibration or telluric
        #[arg(long)]
        kind: Option<String>,
    },
    /// Copy indexed files matching filters into a directory
    Get {
        /// Destination directory
        outdir: PathBuf,
        #[arg(long)]
        night: Option<String>,
        /// Repeatable
        #[arg(long = "dprtype")]
        dprtypes: Vec<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        object: Option<String>,
        /// Only print what would be copied
        #[arg(long)]
        dry_run: bool,
    },
    /// Maintain the list of raw files the planner must never use
    Reject {
        #[command(subcommand)]
        action: RejectCommand,
    },
    /// Dump a database table
    Explorer {
        /// calib, tellu, file_index, runlog or reject
        table: String,
        /// column=value, repeatable
        #[arg(long = "where")]
        conditions: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Execute one worker spec; started by the supervisor
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        spec: PathBuf,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum RejectCommand {
    Add {
        night: String,
        filename: String,
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    Remove {
        night: String,
        filename: String,
    },
    List {
        #[arg(long)]
        night: Option<String>,
    },
}

impl From<RejectCommand> for RejectAction {
    fn from(command: RejectCommand) -> Self {
        match command {
            RejectCommand::Add {
                night,
                filename,
                reason,
            } => RejectAction::Add {
                night,
                filename,
                reason,
            },
            RejectCommand::Remove { night, filename } => RejectAction::Remove { night, filename },
            RejectCommand::List { night } => RejectAction::List { night },
        }
    }
}

impl Cli {
    fn run_options(&self, pool: &PoolArgs) -> RunOptions {
        RunOptions {
            pool_size: pool.pool_size,
            in_process: pool.in_process,
            log_level: self.log_level.clone(),
        }
    }
}

/// Run a parsed command line and return the process exit code.
pub async fn dispatch(cli: Cli) -> Result<i32> {
    // Workers log into their invocation file, set up by the worker itself.
    if let Commands::Worker { spec } = &cli.command {
        return run::worker(spec).await;
    }
    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    let ws = Workspace::discover(cli.profile.as_deref())?;
    match &cli.command {
        Commands::Process { run_table, pool } => {
            run::process(&ws, run_table, &cli.run_options(pool)).await
        }
        Commands::Precheck { run_table, json } => run::precheck_plan(&ws, run_table, *json),
        Commands::Recipe { name, tokens, pool } => {
            run::recipe(&ws, name, tokens, &cli.run_options(pool)).await
        }
        Commands::Trigger {
            run_table,
            once,
            pool,
        } => run::trigger(&ws, run_table.as_deref(), *once, &cli.run_options(pool)).await,
        Commands::Index { night } => inspect::index(&ws, night.as_deref()).map(|_| EXIT_OK),
        Commands::Reset { yes } => {
            if !yes {
                return Ok(run::arg_error("reset removes all products; pass --yes to confirm"));
            }
            let report = reset::reset(&ws)?;
            println!(
                "removed {} entries, {} calibration(s), {} telluric(s), {} indexed product(s), {} run(s)",
                report.entries_removed,
                report.calibrations,
                report.tellurics,
                report.products_indexed,
                report.runs
            );
            Ok(EXIT_OK)
        }
        Commands::Listing { night, kind } => {
            inspect::listing(&ws, night.as_deref(), kind.as_deref()).map(|_| EXIT_OK)
        }
        Commands::Get {
            outdir,
            night,
            dprtypes,
            kind,
            object,
            dry_run,
        } => {
            let request = GetRequest {
                night: night.clone(),
                dprtypes: dprtypes.clone(),
                kind: kind.clone(),
                object: object.clone(),
                outdir: outdir.clone(),
                dry_run: *dry_run,
            };
            inspect::get(&ws, &request).map(|_| EXIT_OK)
        }
        Commands::Reject { action } => {
            inspect::reject(&ws, &RejectAction::from(action.clone())).map(|_| EXIT_OK)
        }
        Commands::Explorer {
            table,
            conditions,
            limit,
        } => inspect::explorer(&ws, table, conditions, *limit).map(|_| EXIT_OK),
        Commands::Worker { .. } => Ok(EXIT_OK),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_tokens_keep_their_flags() {
        let cli = Cli::try_parse_from([
            "apero",
            "recipe",
            "apero_dark",
            "2021-07-01",
            "a001d.fits",
            "--combine",
        ])
        .unwrap();
        match cli.command {
            Commands::Recipe { name, tokens, .. } => {
                assert_eq!(name, "apero_dark");
                assert_eq!(tokens, vec!["2021-07-01", "a001d.fits", "--combine"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_options_after_the_command() {
        let cli = Cli::try_parse_from([
            "apero",
            "process",
            "run.yaml",
            "--pool-size",
            "3",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match &cli.command {
            Commands::Process { run_table, pool } => {
                assert_eq!(run_table, &PathBuf::from("run.yaml"));
                assert_eq!(pool.pool_size, Some(3));
                assert!(!pool.in_process);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_reject_subcommands() {
        let cli = Cli::try_parse_from(["apero", "reject", "add", "2021-07-01", "a001d.fits"]).unwrap();
        let Commands::Reject { action } = cli.command else {
            panic!("expected reject");
        };
        match RejectAction::from(action) {
            RejectAction::Add { reason, .. } => assert_eq!(reason, "manual"),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_worker_is_hidden_but_parses() {
        let cli = Cli::try_parse_from(["apero", "worker", "--spec", "/tmp/spec.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Worker { .. }));
    }
}
