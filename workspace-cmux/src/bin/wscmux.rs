// wscmux: bind logical workspaces to cmux sessions, save and restore their state
//
// Commands:
//   wscmux open <workspace-id>... [--title <title>] [--multi] [--concurrency <n>]
//   wscmux list [--prune]
//   wscmux status <workspace-id>
//   wscmux switch [<workspace-id>] [--handle <handle>] [--non-interactive]
//   wscmux save <workspace-id> [--label <label>] [--no-browser] [--lines <n>]
//   wscmux resume <workspace-id> [--session <id>] [--skip-browser] [--strict]
//   wscmux sessions <workspace-id>
//   wscmux delete-session <workspace-id> <session-id>
//
// Every command accepts --json.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use workspace_cmux::clock::SystemClock;
use workspace_cmux::cmux::client::CancelToken;
use workspace_cmux::cmux::mapping::{JsonMappingStore, MappingStore, RuntimeEntry};
use workspace_cmux::cmux::open::{OpenCoordinator, OpenOptions, OpenTarget};
use workspace_cmux::cmux::reconcile::{mapping_rows, MappingRow, ReconciliationEngine};
use workspace_cmux::cmux::switch::{Selector, SwitchRequest, SwitchService, WorkspaceCandidate};
use workspace_cmux::cmux::CmuxCli;
use workspace_cmux::config::Config;
use workspace_cmux::errors::{CmuxError, CmuxResult, ErrorCode};
use workspace_cmux::sessions::{
    JsonSessionStore, ResumeRequest, SaveRequest, SessionCaptureEngine, SessionResumeEngine,
    SessionStore,
};
use workspace_cmux::workspace_paths::{require_active, validate_workspace_id, DirectoryLocator};

#[derive(Parser)]
#[command(name = "wscmux", version, about = "Bind logical workspaces to cmux sessions")]
struct Cli {
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Attach to (or create) cmux workspaces for logical workspaces
    Open {
        #[arg(required = true)]
        workspace_ids: Vec<String>,
        /// Title folded into the cmux title (single workspace only)
        #[arg(long)]
        title: Option<String>,
        /// Open all targets in parallel, isolating failures
        #[arg(long)]
        multi: bool,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Show mapped cmux workspaces
    List {
        /// Drop entries the runtime no longer knows
        #[arg(long)]
        prune: bool,
    },
    /// Show the mapping of one workspace
    Status { workspace_id: String },
    /// Switch to a mapped cmux workspace
    Switch {
        workspace_id: Option<String>,
        /// Runtime id or `workspace:<ordinal>`
        #[arg(long)]
        handle: Option<String>,
        #[arg(long)]
        non_interactive: bool,
    },
    /// Capture panes, screens and browser state
    Save {
        workspace_id: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        no_browser: bool,
        /// Screen lines captured per surface
        #[arg(long)]
        lines: Option<u32>,
    },
    /// Restore a captured session (newest when --session is omitted)
    Resume {
        workspace_id: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        skip_browser: bool,
        /// Report any restore warning as session_restore_partial
        #[arg(long)]
        strict: bool,
    },
    /// List captured sessions of a workspace
    Sessions { workspace_id: String },
    /// Delete a captured session
    DeleteSession {
        workspace_id: String,
        session_id: String,
    },
}

/// Numbered prompt on stderr, answer read from stdin
struct PromptSelector;

impl PromptSelector {
    fn ask(&self, options: &[String]) -> Result<Option<usize>> {
        let mut stderr = io::stderr();
        for (i, option) in options.iter().enumerate() {
            writeln!(stderr, "  {}) {option}", i + 1)?;
        }
        write!(stderr, "select [1-{}], empty to cancel: ", options.len())?;
        stderr.flush()?;

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed to read selection")?;
        let answer = line.trim();
        if answer.is_empty() {
            return Ok(None);
        }
        let n: usize = answer
            .parse()
            .map_err(|_| anyhow!("not a number: {answer}"))?;
        if n == 0 || n > options.len() {
            return Err(anyhow!("selection out of range: {n}"));
        }
        Ok(Some(n - 1))
    }
}

impl Selector for PromptSelector {
    fn select_workspace(&self, candidates: &[WorkspaceCandidate]) -> Result<Option<String>> {
        let options: Vec<String> = candidates
            .iter()
            .map(|c| format!("{} [{}] {}", c.workspace_id, c.entry_count, c.title))
            .collect();
        Ok(self
            .ask(&options)?
            .map(|i| candidates[i].workspace_id.clone()))
    }

    fn select_entry(&self, workspace_id: &str, entries: &[RuntimeEntry]) -> Result<Option<usize>> {
        eprintln!("{workspace_id}:");
        let options: Vec<String> = entries
            .iter()
            .map(|e| format!("{} {} ({})", e.handle(), e.title_snapshot, e.runtime_id))
            .collect();
        self.ask(&options)
    }
}

struct App {
    config: Config,
    json: bool,
    ctx: CancelToken,
}

impl App {
    fn locator(&self) -> DirectoryLocator {
        DirectoryLocator::from_config(&self.config)
    }

    fn mapping_store(&self) -> JsonMappingStore {
        JsonMappingStore::new(self.config.mapping_file())
    }

    fn session_store(&self) -> JsonSessionStore {
        JsonSessionStore::from_config(&self.config)
    }

    fn client(&self) -> CmuxCli {
        CmuxCli::new(&self.config.cmux_bin)
    }

    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> CmuxResult<()> {
        if self.json {
            let text = serde_json::to_string_pretty(value).map_err(CmuxError::internal)?;
            println!("{text}");
        } else {
            human(value);
        }
        Ok(())
    }

    fn run(&self, command: Command) -> CmuxResult<ExitCode> {
        match command {
            Command::Open {
                workspace_ids,
                title,
                multi,
                concurrency,
            } => self.open(workspace_ids, title, multi, concurrency),
            Command::List { prune } => self.rows(None, prune),
            Command::Status { workspace_id } => {
                validate_workspace_id(&workspace_id)?;
                self.rows(Some(workspace_id.as_str()), false)
            }
            Command::Switch {
                workspace_id,
                handle,
                non_interactive,
            } => self.switch(workspace_id, handle, non_interactive),
            Command::Save {
                workspace_id,
                label,
                no_browser,
                lines,
            } => self.save(workspace_id, label, !no_browser, lines),
            Command::Resume {
                workspace_id,
                session,
                skip_browser,
                strict,
            } => self.resume(ResumeRequest {
                workspace_id,
                session_id: session,
                skip_browser,
                strict,
            }),
            Command::Sessions { workspace_id } => {
                validate_workspace_id(&workspace_id)?;
                let sessions = self.session_store().list(&workspace_id)?;
                self.emit(&sessions, |sessions| {
                    for s in sessions {
                        println!(
                            "{}  {}  panes={} surfaces={}{}",
                            s.session_id,
                            s.created_at.to_rfc3339(),
                            s.pane_count,
                            s.surface_count,
                            if s.browser_state_saved { " browser" } else { "" }
                        );
                    }
                })?;
                Ok(ExitCode::SUCCESS)
            }
            Command::DeleteSession {
                workspace_id,
                session_id,
            } => {
                validate_workspace_id(&workspace_id)?;
                let removed = self
                    .session_store()
                    .delete_session(&workspace_id, &session_id)?;
                self.emit(&removed, |s| println!("deleted {}", s.session_id))?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }

    fn open(
        &self,
        workspace_ids: Vec<String>,
        title: Option<String>,
        multi: bool,
        concurrency: Option<usize>,
    ) -> CmuxResult<ExitCode> {
        if title.is_some() && workspace_ids.len() > 1 {
            return Err(CmuxError::invalid_argument(
                "--title can only be used with a single workspace",
            ));
        }

        let locator = self.locator();
        let targets = workspace_ids
            .into_iter()
            .map(|workspace_id| {
                let path = require_active(&locator, &workspace_id)?;
                Ok(OpenTarget {
                    workspace_id,
                    path,
                    title: title.clone(),
                })
            })
            .collect::<CmuxResult<Vec<_>>>()?;

        let store = self.mapping_store();
        let mut mapping = store.load()?;
        let cli = self.client();
        let clock = SystemClock;
        let options = OpenOptions {
            concurrency: concurrency.unwrap_or(self.config.concurrency).max(1),
            multi,
        };
        let report = OpenCoordinator::new(&cli, &store, &clock).open(
            &self.ctx,
            &mut mapping,
            &targets,
            options,
        )?;

        self.emit(&report, |report| {
            for r in &report.results {
                let verb = if r.reused_existing { "reused" } else { "created" };
                println!(
                    "{}: {verb} {} {} \"{}\"",
                    r.workspace_id, r.handle, r.runtime_id, r.title
                );
            }
            for f in &report.failures {
                eprintln!("{}: error[{}]: {}", f.workspace_id, f.code, f.message);
            }
        })?;

        Ok(if report.failures.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }

    fn rows(&self, workspace_id: Option<&str>, prune: bool) -> CmuxResult<ExitCode> {
        #[derive(Serialize)]
        struct Listing {
            rows: Vec<MappingRow>,
            pruned: usize,
            warnings: Vec<String>,
        }

        let store = self.mapping_store();
        let mut mapping = store.load()?;
        let cli = self.client();
        let view = ReconciliationEngine::new(&cli, &store).sync(&self.ctx, &mut mapping, prune)?;

        if let Some(id) = workspace_id {
            if mapping.entries(id).is_empty() {
                return Err(CmuxError::new(
                    ErrorCode::CmuxNotMapped,
                    format!("workspace {id} has no cmux workspace"),
                ));
            }
        }

        let listing = Listing {
            rows: mapping_rows(&mapping, &view.presence, workspace_id),
            pruned: view.pruned,
            warnings: view.warnings,
        };
        self.emit(&listing, |listing| {
            for row in &listing.rows {
                let state = match row.exists {
                    Some(true) => "live",
                    Some(false) => "gone",
                    None => "unknown",
                };
                println!(
                    "{}  {}  {}  {}  [{state}]  last used {}",
                    row.workspace_id,
                    row.handle,
                    row.runtime_id,
                    row.title,
                    row.last_used_at.to_rfc3339()
                );
            }
            if listing.pruned > 0 {
                println!("pruned {} stale mapping entries", listing.pruned);
            }
            for warning in &listing.warnings {
                eprintln!("warning: {warning}");
            }
        })?;
        Ok(ExitCode::SUCCESS)
    }

    fn switch(
        &self,
        workspace_id: Option<String>,
        handle: Option<String>,
        non_interactive: bool,
    ) -> CmuxResult<ExitCode> {
        let store = self.mapping_store();
        let mut mapping = store.load()?;
        let cli = self.client();
        let clock = SystemClock;
        let request = SwitchRequest {
            workspace_id: workspace_id.as_deref(),
            handle: handle.as_deref(),
            non_interactive,
        };
        let outcome = SwitchService::new(&cli, &store, &clock).switch(
            &self.ctx,
            &mut mapping,
            &request,
            &PromptSelector,
        )?;

        self.emit(&outcome, |o| {
            println!(
                "{}: switched to {} {} \"{}\"",
                o.workspace_id, o.handle, o.runtime_id, o.title
            );
            for warning in &o.warnings {
                eprintln!("warning: {warning}");
            }
        })?;
        Ok(ExitCode::SUCCESS)
    }

    fn save(
        &self,
        workspace_id: String,
        label: Option<String>,
        include_browser: bool,
        lines: Option<u32>,
    ) -> CmuxResult<ExitCode> {
        let cli = self.client();
        let mappings = self.mapping_store();
        let sessions = self.session_store();
        let locator = self.locator();
        let clock = SystemClock;
        let request = SaveRequest {
            workspace_id,
            label,
            screen_lines: lines.filter(|n| *n > 0).unwrap_or(self.config.screen_lines),
            include_browser,
        };
        let outcome = SessionCaptureEngine::new(&cli, &mappings, &sessions, &locator, &clock)
            .save(&self.ctx, &request)?;

        self.emit(&outcome, |o| {
            println!(
                "{}: saved session {} ({} panes, {} surfaces) -> {}",
                o.workspace_id,
                o.session_id,
                o.pane_count,
                o.surface_count,
                o.document_path.display()
            );
            for warning in &o.warnings {
                eprintln!("warning: {warning}");
            }
        })?;
        Ok(ExitCode::SUCCESS)
    }

    fn resume(&self, request: ResumeRequest) -> CmuxResult<ExitCode> {
        let cli = self.client();
        let mappings = self.mapping_store();
        let sessions = self.session_store();
        let locator = self.locator();
        let outcome = SessionResumeEngine::new(&cli, &mappings, &sessions, &locator)
            .resume(&self.ctx, &request)?;

        self.emit(&outcome, |o| {
            println!(
                "{}: resumed session {} (focus restored: {}, browser restored: {})",
                o.workspace_id, o.session_id, o.focus_restored, o.browser_restored
            );
            for warning in &o.warnings {
                eprintln!("warning: {warning}");
            }
        })?;

        if outcome.is_partial() {
            eprintln!(
                "error[{}]: {} restore step(s) failed",
                ErrorCode::SessionRestorePartial,
                outcome.warnings.len()
            );
            return Ok(ExitCode::FAILURE);
        }
        Ok(ExitCode::SUCCESS)
    }
}

/// First Ctrl-C cancels in-flight cmux calls, a second one exits immediately
#[cfg(unix)]
fn install_cancel_handler(ctx: &CancelToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;

    let cancelled = ctx.shared_flag();
    for signal in [SIGINT, SIGTERM] {
        flag::register_conditional_shutdown(signal, 130, cancelled.clone())?;
        flag::register(signal, cancelled.clone())?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn install_cancel_handler(_ctx: &CancelToken) -> Result<()> {
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let ctx = CancelToken::new();
    if let Err(e) = install_cancel_handler(&ctx) {
        log::warn!("failed to install signal handlers: {e:#}");
    }

    let config = Config::from_env();
    if let Err(e) = config.ensure_dirs() {
        eprintln!(
            "error[{}]: failed to create {}: {e}",
            ErrorCode::StateWriteFailed,
            config.state_dir.display()
        );
        return ExitCode::FAILURE;
    }

    let app = App {
        config,
        json: cli.json,
        ctx,
    };
    match app.run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            if app.json {
                let body = serde_json::json!({ "code": e.code, "message": e.message });
                println!("{body}");
            } else {
                eprintln!("error[{}]: {}", e.code, e.message);
            }
            ExitCode::FAILURE
        }
    }
}
