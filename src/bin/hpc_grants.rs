use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hpc_grants::config::{self, AppConfig};
use hpc_grants::events::EventLog;
use hpc_grants::registry::{BursarBackend, GrantRegistryClient};
use hpc_grants::reports::{
    quota_drift, render_drift, render_grants, render_record, render_report, JsonOut,
};
use hpc_grants::{ReconciliationEngine, ReportModel, Scope};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "hpc-grants", version, about = "Grant and project storage status")]
struct Cli {
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    json: bool,
    #[arg(long, global = true, help = "Show additional info on stderr")]
    verbose: bool,
    #[arg(long, global = true, help = "Config file (defaults to the workspace config.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Grants with derived storage status, one row per project.
    List {
        #[arg(long, conflicts_with = "user")]
        pi: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },
    /// Reconciled record of a single project.
    Show { project: String },
    /// Grants with allocations and consumed resources.
    Grants {
        #[arg(long)]
        user: Option<String>,
    },
    /// Projects whose quota differs from their awarded storage.
    Drift,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_from(path)?,
        None => config::load_or_default()?,
    };
    debug(
        cli.verbose,
        &format!(
            "bursar: {}, storage backend: {:?}",
            config.bursar.url, config.storage.backend
        ),
    );

    match cli.command {
        Commands::List { ref pi, ref user } => {
            let scope = match (pi, user) {
                (Some(pi), _) => Scope::Pi(pi.clone()),
                (None, Some(user)) => Scope::User(user.clone()),
                (None, None) => Scope::All,
            };
            let report = reconcile(&cli, &config, &scope)?;
            print_out(cli.json, &report, render_report)?;
        }
        Commands::Show { ref project } => {
            let report = reconcile(&cli, &config, &Scope::Project(project.clone()))?;
            let record = report
                .record(project)
                .with_context(|| format!("project {project} missing from report"))?;
            print_out(cli.json, record, render_record)?;
            for issue in report.issues() {
                eprintln!("warning: {}", issue.message);
            }
        }
        Commands::Grants { ref user } => {
            let scope = Scope::User(user.clone().unwrap_or_else(|| config.bursar.user.clone()));
            let registry = GrantRegistryClient::new(Arc::new(BursarBackend::from_config(&config)?));
            let grants = registry.fetch(&scope)?;
            debug(cli.verbose, &format!("fetched {} grant(s)", grants.len()));
            print_out(cli.json, &grants, |g| render_grants(g))?;
        }
        Commands::Drift => {
            let report = reconcile(&cli, &config, &Scope::All)?;
            let drift = quota_drift(&report);
            print_out(cli.json, &drift, |d| render_drift(d))?;
        }
    }
    Ok(())
}

fn reconcile(cli: &Cli, config: &AppConfig, scope: &Scope) -> Result<ReportModel> {
    let mut engine = ReconciliationEngine::from_config(config)?;
    if config.logging.events_enabled {
        let log = EventLog::in_workspace()?;
        debug(cli.verbose, &format!("events: {}", log.path().display()));
        engine = engine.with_event_log(log);
    }
    debug(cli.verbose, &format!("reconciling scope {scope}"));
    let report = engine.reconcile(scope)?;
    debug(
        cli.verbose,
        &format!(
            "{} record(s), {} partial error(s)",
            report.records().len(),
            report.error_count()
        ),
    );
    Ok(report)
}

fn print_out<T, F>(json: bool, data: &T, text: F) -> Result<()>
where
    T: Serialize + ?Sized,
    F: Fn(&T) -> String,
{
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&JsonOut { ok: true, data })?
        );
    } else {
        print!("{}", text(data));
    }
    Ok(())
}

fn debug(verbose: bool, text: &str) {
    if verbose {
        eprintln!("{text}");
    }
}
