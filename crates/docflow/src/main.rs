//! Docflow command line.
//!
//! Drives the case lifecycle against a JSON snapshot store.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use docflow::{CaseWorkflow, DocflowConfig, Params, RegisterChange, TransitionOutcome};
use docflow_ids::{CaseId, RegisterId};
use docflow_logging::{init_logging, LogConfig};
use docflow_store::{Attributes, CaseRecord, CaseStore, FileStore, RegisterStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "docflow", about = "Case lifecycle engine", version)]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: $DOCFLOW_HOME/config.toml)
    #[arg(long, global = true, env = "DOCFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Store snapshot, overrides `store_path` from the config
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a new case and put it into its initial state
    Create {
        case_id: String,

        /// Case kind (default: the configured kind)
        #[arg(long)]
        kind: Option<String>,

        /// Initial attribute, repeatable
        #[arg(short = 'a', long = "attr", value_parser = parse_key_value)]
        attrs: Vec<(String, String)>,
    },

    /// Move a case to another state
    ChangeState {
        case_id: String,
        state: String,

        /// Transition parameter, repeatable (e.g. operator_id=op1)
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Export a register and advance its cases
    Export {
        register_id: String,

        /// Export parameter, repeatable (e.g. exporter_id=exp1)
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Print a case's attributes
    Show { case_id: String },

    /// List registers
    Registers,

    /// Run the expiry sweep once
    Sweep,

    /// Run the expiry sweep on its schedule until Ctrl-C
    Schedule,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn to_params(pairs: Vec<(String, String)>) -> Params {
    pairs.into_iter().collect()
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "docflow",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {err:#}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(docflow::config::default_config_path);
    let mut config = DocflowConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    if let Some(store_path) = cli.store.clone() {
        config.store_path = store_path;
    }

    let store = Arc::new(
        FileStore::open(&config.store_path)
            .with_context(|| format!("Failed to open store {}", config.store_path.display()))?,
    );
    let workflow = CaseWorkflow::new(store.clone(), &config);

    match cli.command {
        Commands::Create {
            case_id,
            kind,
            attrs,
        } => {
            let case_id = CaseId::parse(&case_id)?;
            let kind = kind.unwrap_or_else(|| config.case_kind.clone());
            let attributes: Attributes = attrs
                .into_iter()
                .map(|(name, value)| (name, Some(value)))
                .collect();
            store
                .insert_case(&case_id, kind.as_str(), attributes)
                .context("Failed to create case")?;
            let outcome = workflow.on_case_created(&CaseRecord::new(case_id, kind))?;
            print_outcome(&outcome, cli.json);
        }
        Commands::ChangeState {
            case_id,
            state,
            params,
        } => {
            let case = load_case(&store, &case_id)?;
            let outcome = workflow.change_state(&case, &state, &to_params(params))?;
            print_outcome(&outcome, cli.json);
        }
        Commands::Export {
            register_id,
            params,
        } => {
            let register_id = RegisterId::parse(&register_id)?;
            let summary = workflow.export_register(&register_id, &to_params(params))?;
            if cli.json {
                let cases: Vec<_> = summary
                    .cases
                    .iter()
                    .map(|(id, state)| serde_json::json!({ "case_id": id, "state": state }))
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "register_id": summary.register_id,
                        "exported_at": summary.exported_at,
                        "exporter_id": summary.exporter_id,
                        "cases": cases,
                    })
                );
            } else {
                println!(
                    "Exported register {} at {}",
                    summary.register_id, summary.exported_at
                );
                for (id, state) in &summary.cases {
                    println!("  {id} -> {state}");
                }
            }
        }
        Commands::Show { case_id } => {
            let case = load_case(&store, &case_id)?;
            let attributes = store.get_attributes(&case.id, None)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&attributes)?);
            } else {
                println!("Case {} ({})", case.id, case.kind);
                for (name, value) in attributes.iter() {
                    println!("  {name} = {}", value.unwrap_or("<null>"));
                }
            }
        }
        Commands::Registers => {
            let registers = store.list_registers()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&registers)?);
            } else {
                for register in registers {
                    let members = store.count_links(&register.id)?;
                    println!(
                        "{} {} institution={} office={} back_office={} cases={} {}",
                        register.id,
                        register.key.register_type,
                        register.key.institution_rguid.as_deref().unwrap_or("-"),
                        register.key.office_id.as_deref().unwrap_or("-"),
                        register.key.back_office_id.as_deref().unwrap_or("-"),
                        members,
                        if register.exported { "exported" } else { "open" }
                    );
                }
            }
        }
        Commands::Sweep => {
            let report = workflow.run_sweep()?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "rejected": report.rejected,
                        "rejected_at": report.rejected_at,
                    })
                );
            } else {
                println!("Moved {} cases to rejecting", report.rejected.len());
            }
        }
        Commands::Schedule => {
            if !config.sweep.enabled {
                bail!("Expiry sweep is disabled in {}", config_path.display());
            }
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            runtime.block_on(async {
                workflow.start_scheduler()?;
                info!("Scheduler running, press Ctrl-C to stop");
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for Ctrl-C")?;
                workflow.stop_scheduler()?;
                Ok::<(), anyhow::Error>(())
            })?;
        }
    }

    Ok(())
}

fn load_case(store: &FileStore, raw_id: &str) -> Result<CaseRecord> {
    let case_id = CaseId::parse(raw_id)?;
    match store.case_kind(&case_id)? {
        Some(kind) => Ok(CaseRecord::new(case_id, kind)),
        None => bail!("Case not found: {case_id}"),
    }
}

fn print_outcome(outcome: &TransitionOutcome, json: bool) {
    let register = outcome.register.as_ref().map(|change| match change {
        RegisterChange::Attached { register_id, .. } => {
            format!("attached to register {register_id}")
        }
        RegisterChange::Detached { register, .. } => {
            format!("detached from register {}", register.id)
        }
    });

    if json {
        println!(
            "{}",
            serde_json::json!({
                "case_id": outcome.case_id,
                "from": outcome.from,
                "to": outcome.to,
                "written": outcome.written,
                "register": register,
            })
        );
        return;
    }

    let from = outcome
        .from
        .map(|state| state.to_string())
        .unwrap_or_else(|| "<none>".to_string());
    println!("Case {}: {} -> {}", outcome.case_id, from, outcome.to);
    if let Some(register) = register {
        println!("  {register}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("operator_id=op1").unwrap(),
            ("operator_id".to_string(), "op1".to_string())
        );
        assert_eq!(
            parse_key_value("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_parses_change_state() {
        let cli = Cli::try_parse_from([
            "docflow",
            "change-state",
            "42",
            "processing",
            "-p",
            "operator_id=op1",
        ])
        .unwrap();
        match cli.command {
            Commands::ChangeState {
                case_id,
                state,
                params,
            } => {
                assert_eq!(case_id, "42");
                assert_eq!(state, "processing");
                assert_eq!(params, vec![("operator_id".to_string(), "op1".to_string())]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
