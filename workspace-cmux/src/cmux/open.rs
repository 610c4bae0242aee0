//! Open coordinator: attach or create runtime sessions for logical workspaces
//!
//! Policy is 1:1. A workspace with a live mapped entry is re-selected; a stale
//! entry (runtime reports it unknown) is cleared and a fresh session created.
//!
//! Two execution modes:
//! - sequential: input order, stops at the first failure
//! - concurrent: fixed worker pool, every target attempted, results re-sorted
//!   into input order
//!
//! The in-memory mapping is the only shared state. It sits behind one mutex whose
//! critical sections never span a runtime call.

use crate::clock::Clock;
use crate::cmux::client::{
    is_not_found_error, CancelToken, ClientFactory, RuntimeClient, OPEN_REQUIRED_CAPABILITIES,
};
use crate::cmux::mapping::{
    allocate_ordinal, format_workspace_title, MappingFile, MappingStore, RuntimeEntry,
};
use crate::cmux::shell::cd_command;
use crate::errors::{CmuxError, CmuxResult, ErrorCode};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{mpsc, Mutex, MutexGuard, PoisonError};
use std::thread;

/// One logical workspace to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTarget {
    pub workspace_id: String,
    /// Active directory of the workspace
    pub path: PathBuf,
    /// Optional user-facing title folded into the runtime title
    pub title: Option<String>,
}

/// Successful open of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenResult {
    pub workspace_id: String,
    pub runtime_id: String,
    pub handle: String,
    pub title: String,
    pub ordinal: u64,
    pub reused_existing: bool,
    pub last_used_at: DateTime<Utc>,
}

/// Failed open of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenFailure {
    pub workspace_id: String,
    pub code: ErrorCode,
    pub message: String,
}

/// Ordered outcome of an open call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpenReport {
    pub results: Vec<OpenResult>,
    pub failures: Vec<OpenFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub concurrency: usize,
    pub multi: bool,
}

impl OpenOptions {
    pub fn sequential() -> Self {
        Self {
            concurrency: 1,
            multi: false,
        }
    }

    fn is_concurrent(&self) -> bool {
        self.multi && self.concurrency > 1
    }
}

/// Attaches/creates runtime sessions and records them in the mapping
pub struct OpenCoordinator<'a> {
    factory: &'a dyn ClientFactory,
    store: &'a dyn MappingStore,
    clock: &'a dyn Clock,
    home: Option<PathBuf>,
}

impl<'a> OpenCoordinator<'a> {
    pub fn new(
        factory: &'a dyn ClientFactory,
        store: &'a dyn MappingStore,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            factory,
            store,
            clock,
            home: dirs::home_dir(),
        }
    }

    /// Override the home directory used for `cd` command quoting
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Open every target, then persist the mapping once if anything succeeded
    ///
    /// Returns `Err` only for whole-call failures: a repeated workspace id, missing
    /// capabilities, no client, or a failed final save. Per-target failures are
    /// reported in the [`OpenReport`].
    pub fn open(
        &self,
        ctx: &CancelToken,
        mapping: &mut MappingFile,
        targets: &[OpenTarget],
        options: OpenOptions,
    ) -> CmuxResult<OpenReport> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = targets
            .iter()
            .find(|t| !seen.insert(t.workspace_id.as_str()))
        {
            return Err(CmuxError::invalid_argument(format!(
                "workspace {} given more than once",
                duplicate.workspace_id
            )));
        }

        let primary = self
            .factory
            .create()
            .map_err(|e| CmuxError::runtime(ErrorCode::CmuxRuntimeUnavailable, "client", e))?;

        let capabilities = primary
            .capabilities(ctx)
            .map_err(|e| CmuxError::runtime(ErrorCode::CmuxCapabilityMissing, "capabilities", e))?;
        let missing = capabilities.missing(&OPEN_REQUIRED_CAPABILITIES);
        if !missing.is_empty() {
            return Err(CmuxError::new(
                ErrorCode::CmuxCapabilityMissing,
                format!("cmux does not advertise: {}", missing.join(", ")),
            ));
        }

        let shared = Mutex::new(std::mem::take(mapping));
        let report = if options.is_concurrent() {
            drop(primary);
            self.open_concurrent(ctx, &shared, targets, options.concurrency)
        } else {
            self.open_sequential(primary.as_ref(), ctx, &shared, targets)
        };
        *mapping = shared.into_inner().unwrap_or_else(PoisonError::into_inner);

        if !report.results.is_empty() {
            if let Err(e) = self.store.save(mapping) {
                // Runtime-side sessions already exist; they stay orphaned until the next open
                let created: Vec<&str> = report
                    .results
                    .iter()
                    .filter(|r| !r.reused_existing)
                    .map(|r| r.runtime_id.as_str())
                    .collect();
                return Err(CmuxError::new(
                    ErrorCode::StateWriteFailed,
                    format!(
                        "{} (runtime workspaces left unmapped: [{}])",
                        e.message,
                        created.join(", ")
                    ),
                ));
            }
        }

        Ok(report)
    }

    fn open_sequential(
        &self,
        client: &dyn RuntimeClient,
        ctx: &CancelToken,
        shared: &Mutex<MappingFile>,
        targets: &[OpenTarget],
    ) -> OpenReport {
        let mut report = OpenReport::default();
        for target in targets {
            match self.open_one(client, ctx, shared, target) {
                Ok(result) => report.results.push(result),
                Err(error) => {
                    report.failures.push(failure(target, error));
                    break;
                }
            }
        }
        report
    }

    fn open_concurrent(
        &self,
        ctx: &CancelToken,
        shared: &Mutex<MappingFile>,
        targets: &[OpenTarget],
        concurrency: usize,
    ) -> OpenReport {
        let workers = concurrency.min(targets.len()).max(1);
        let (job_tx, job_rx) = mpsc::sync_channel::<(usize, &OpenTarget)>(workers);
        let job_rx = Mutex::new(job_rx);
        // Sized to the target count so workers never block on send after the drain loop is gone
        let (result_tx, result_rx) =
            mpsc::sync_channel::<(usize, CmuxResult<OpenResult>)>(targets.len());

        thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = &job_rx;
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    let client = self.factory.create();
                    if let Err(e) = &client {
                        warn!("open worker {worker}: failed to create cmux client: {e:#}");
                    }
                    loop {
                        let job = lock(job_rx).recv();
                        let Ok((index, target)) = job else { break };
                        let outcome = match &client {
                            Ok(client) => self.open_one(client.as_ref(), ctx, shared, target),
                            Err(e) => Err(CmuxError::runtime(
                                ErrorCode::CmuxRuntimeUnavailable,
                                "client",
                                e,
                            )),
                        };
                        let _ = result_tx.send((index, outcome));
                    }
                });
            }
            drop(result_tx);

            for job in targets.iter().enumerate() {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        let mut outcomes: Vec<(usize, CmuxResult<OpenResult>)> = result_rx.into_iter().collect();
        outcomes.sort_by_key(|(index, _)| *index);

        let mut report = OpenReport::default();
        for (index, outcome) in outcomes {
            match outcome {
                Ok(result) => report.results.push(result),
                Err(error) => report.failures.push(failure(&targets[index], error)),
            }
        }
        report
    }

    /// 1:1 open policy for a single target
    fn open_one(
        &self,
        client: &dyn RuntimeClient,
        ctx: &CancelToken,
        shared: &Mutex<MappingFile>,
        target: &OpenTarget,
    ) -> CmuxResult<OpenResult> {
        let workspace_id = target.workspace_id.as_str();
        if ctx.is_cancelled() {
            return Err(CmuxError::internal("open cancelled"));
        }

        let existing = lock(shared).entries(workspace_id).first().cloned();

        if let Some(entry) = existing {
            match client.identify(ctx, Some(&entry.runtime_id), None) {
                Ok(_) => return self.reuse(client, ctx, shared, workspace_id, entry),
                Err(e) if is_not_found_error(&e) => {
                    warn!(
                        "workspace {workspace_id}: mapped cmux workspace {} is gone ({e:#}); recreating",
                        entry.runtime_id
                    );
                    let mut mapping = lock(shared);
                    let ws = mapping.workspace_mut(workspace_id);
                    // Only the worker that still sees the stale entry resets the counter
                    if ws.entries.iter().any(|e| e.runtime_id == entry.runtime_id) {
                        ws.entries.clear();
                        ws.next_ordinal = 1;
                    }
                }
                Err(e) => {
                    return Err(CmuxError::runtime(
                        ErrorCode::CmuxIdentifyFailed,
                        "identify",
                        e,
                    ));
                }
            }
        }

        self.create(client, ctx, shared, target)
    }

    fn reuse(
        &self,
        client: &dyn RuntimeClient,
        ctx: &CancelToken,
        shared: &Mutex<MappingFile>,
        workspace_id: &str,
        entry: RuntimeEntry,
    ) -> CmuxResult<OpenResult> {
        client
            .select_workspace(ctx, &entry.runtime_id)
            .map_err(|e| CmuxError::runtime(ErrorCode::CmuxSelectFailed, "workspace.select", e))?;

        let now = self.clock.now_utc();
        lock(shared).touch(workspace_id, &entry.runtime_id, now);

        info!(
            "workspace {workspace_id}: reusing cmux workspace {} ({})",
            entry.runtime_id,
            entry.handle()
        );

        Ok(OpenResult {
            workspace_id: workspace_id.to_string(),
            handle: entry.handle(),
            runtime_id: entry.runtime_id,
            title: entry.title_snapshot,
            ordinal: entry.ordinal,
            reused_existing: true,
            last_used_at: now,
        })
    }

    fn create(
        &self,
        client: &dyn RuntimeClient,
        ctx: &CancelToken,
        shared: &Mutex<MappingFile>,
        target: &OpenTarget,
    ) -> CmuxResult<OpenResult> {
        let workspace_id = target.workspace_id.as_str();
        let command = cd_command(&target.path, self.home.as_deref());
        debug!("workspace {workspace_id}: creating cmux workspace with `{command}`");

        let runtime_id = client
            .create_workspace_with_command(ctx, &command)
            .map_err(|e| CmuxError::runtime(ErrorCode::CmuxCreateFailed, "workspace.create", e))?;
        let runtime_id = runtime_id.trim().to_string();
        if runtime_id.is_empty() {
            return Err(CmuxError::new(
                ErrorCode::CmuxCreateFailed,
                "workspace.create: runtime returned an empty workspace id",
            ));
        }

        let ordinal = allocate_ordinal(&mut lock(shared), workspace_id);
        let title = format_workspace_title(workspace_id, target.title.as_deref(), ordinal);

        client
            .rename_workspace(ctx, &runtime_id, &title)
            .map_err(|e| CmuxError::runtime(ErrorCode::CmuxRenameFailed, "workspace.rename", e))?;
        client
            .select_workspace(ctx, &runtime_id)
            .map_err(|e| CmuxError::runtime(ErrorCode::CmuxSelectFailed, "workspace.select", e))?;

        let now = self.clock.now_utc();
        let entry = RuntimeEntry {
            runtime_id: runtime_id.clone(),
            ordinal,
            title_snapshot: title.clone(),
            created_at: now,
            last_used_at: now,
        };
        let handle = entry.handle();
        lock(shared).workspace_mut(workspace_id).entries = vec![entry];

        info!("workspace {workspace_id}: created cmux workspace {runtime_id} ({handle})");

        Ok(OpenResult {
            workspace_id: workspace_id.to_string(),
            runtime_id,
            handle,
            title,
            ordinal,
            reused_existing: false,
            last_used_at: now,
        })
    }
}

fn failure(target: &OpenTarget, error: CmuxError) -> OpenFailure {
    warn!("workspace {}: open failed: {}", target.workspace_id, error);
    OpenFailure {
        workspace_id: target.workspace_id.clone(),
        code: error.code,
        message: error.message,
    }
}

/// Lock that survives a panicked holder; the mapping is plain data
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
