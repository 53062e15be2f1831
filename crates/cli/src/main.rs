use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use plinth_apply::{Reconciler, Tuning};
use plinth_core::{ChangeSet, DeclaredConfig, DeclaredProject, ProjectState};
use plinth_ops::TokioClock;
use plinth_persist::{SqliteStore, StateStore};
use tracing::{info, warn};

mod render;

#[derive(Parser, Debug)]
#[command(name = "plinthctl", version, about = "Converge declared cloud projects onto the remote control plane")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// State database (default: ~/.plinth/plinth.db)
    #[arg(long = "db", global = true, env = "PLINTH_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the project, or bring an existing one in line with the file
    Apply {
        /// Declared project (YAML or JSON)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Allow delete+create when the project id or app runtime changed
        #[arg(long = "replace", action = ArgAction::SetTrue)]
        replace: bool,
    },
    /// Re-read a tracked project from the remote
    Refresh { project_id: String },
    /// Start tracking an existing project
    Import { project_id: String },
    /// Delete a tracked project (or just forget it when skip_delete is set)
    Destroy { project_id: String },
    /// Print the tracked state of a project
    Show {
        project_id: String,
        /// Include previous snapshots
        #[arg(long = "history", action = ArgAction::SetTrue)]
        history: bool,
    },
    /// List tracked projects
    Ls,
}

fn init_tracing() {
    let env = std::env::var("PLINTH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PLINTH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid PLINTH_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_store(db: Option<&str>) -> Result<SqliteStore> {
    match db {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::open_default(),
    }
}

fn build_reconciler() -> Result<Reconciler> {
    let hub = plinth_hub::GcpHub::from_env()?;
    Ok(plinth_apply::reconciler(hub.clients(), Arc::new(TokioClock), Tuning::from_env()))
}

pub(crate) fn load_declared(path: &Path) -> Result<DeclaredProject> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: DeclaredConfig =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(DeclaredProject::try_from(config)?)
}

fn tracked(store: &SqliteStore, project_id: &str) -> Result<ProjectState> {
    match store.get(project_id)? {
        Some(snap) if snap.state.is_tracked() => Ok(snap.state),
        _ => bail!("project {:?} is not tracked; use `plinthctl import {}` first", project_id, project_id),
    }
}

/// Save whatever the reconciler left in `state`, then surface its result.
fn settle<T>(store: &SqliteStore, state: &ProjectState, res: plinth_core::ReconcileResult<T>) -> Result<T> {
    store.put(state).context("saving project state")?;
    Ok(res?)
}

async fn apply(cli: &Cli, store: &SqliteStore, file: &Path, replace: bool) -> Result<()> {
    let declared = load_declared(file)?;
    let r = build_reconciler()?;
    let mut state = store.get(&declared.project_id)?.map(|s| s.state).unwrap_or_default();

    if state.is_tracked() {
        let res = r.read(&mut state).await;
        settle(store, &state, res)?;
    }
    if state.is_tracked() {
        let changes = ChangeSet::between(&state, &declared);
        if changes.is_empty() {
            render::up_to_date(cli.output, &state)?;
            return Ok(());
        }
        if !changes.requires_replacement() {
            let res = r.update(&declared, &changes, &mut state).await;
            let report = settle(store, &state, res)?;
            render::update_report(cli.output, &state, &report)?;
            if !report.is_success() {
                bail!("update of {:?} partially failed", declared.project_id);
            }
            return Ok(());
        }
        if !replace {
            bail!(
                "changes to {:?} cannot be applied in place ({:?}); rerun with --replace to delete and recreate it",
                declared.project_id,
                changes.fields()
            );
        }
        info!(project = %declared.project_id, changes = ?changes.fields(), "replacing project");
        let res = r.delete(&mut state).await;
        settle(store, &state, res)?;
    }

    let res = r.create(&declared, &mut state).await;
    settle(store, &state, res)?;
    render::state(cli.output, &state)
}

async fn run(cli: Cli) -> Result<()> {
    let store = open_store(cli.db.as_deref())?;
    match &cli.command {
        Commands::Apply { file, replace } => apply(&cli, &store, file, *replace).await,
        Commands::Refresh { project_id } => {
            let r = build_reconciler()?;
            let mut state = tracked(&store, project_id)?;
            let res = r.read(&mut state).await;
            settle(&store, &state, res)?;
            if !state.is_tracked() {
                warn!(project = %project_id, "project no longer exists remotely; it is no longer tracked");
            }
            render::state(cli.output, &state)
        }
        Commands::Import { project_id } => {
            let r = build_reconciler()?;
            let state = r.import(project_id).await?;
            store.put(&state).context("saving project state")?;
            render::state(cli.output, &state)
        }
        Commands::Destroy { project_id } => {
            let r = build_reconciler()?;
            let mut state = tracked(&store, project_id)?;
            let res = r.delete(&mut state).await;
            settle(&store, &state, res)?;
            store.remove(project_id)?;
            render::destroyed(cli.output, project_id, state.skip_delete)
        }
        Commands::Show { project_id, history } => {
            let limit = if *history { 10 } else { 1 };
            let snaps = store.history(project_id, limit)?;
            if snaps.is_empty() {
                bail!("no stored state for {:?}", project_id);
            }
            render::snapshots(cli.output, &snaps)
        }
        Commands::Ls => render::listing(cli.output, &store.list()?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_apply_with_replace() {
        let cli = Cli::try_parse_from(["plinthctl", "-o", "json", "apply", "-f", "p.yaml", "--replace"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Apply { file, replace } => {
                assert_eq!(file, PathBuf::from("p.yaml"));
                assert!(replace);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn declared_file_uses_yaml_and_validates() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("plinth-cli-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "project_id: demo-project\nname: Demo\nfolder_id: folders/42\nbilling_account: AB-12\n\
             app_engine:\n  - location_id: us-central\n    feature_settings:\n      - split_health_checks: true\n",
        )
        .unwrap();
        let d = load_declared(&path).unwrap();
        assert_eq!(d.display_name, "Demo");
        assert_eq!(d.parent, plinth_core::Parent::Folder("42".into()));
        assert_eq!(d.billing_account_id, "AB-12");
        assert!(d.auto_create_network);
        assert!(d.app_runtime[0].feature_settings[0].split_health_checks);

        std::fs::write(&path, "project_id: demo-project\norg_id: '1'\nfolder_id: '2'\n").unwrap();
        let err = load_declared(&path).unwrap_err();
        assert!(err.to_string().contains("cannot be both set"), "{}", err);
        let _ = std::fs::remove_file(&path);
    }
}
