//! Scripted fakes for the runtime, mapping store and selector
//!
//! Compiled for unit tests and behind the `test-support` feature so the
//! integration tests under `tests/` can drive the engines without a real cmux.

use crate::cmux::client::{
    Capabilities, CancelToken, ClientFactory, Identity, Pane, RuntimeClient, RuntimeWorkspace,
    Surface, OPEN_REQUIRED_CAPABILITIES,
};
use crate::cmux::mapping::{MappingFile, MappingStore, RuntimeEntry};
use crate::cmux::switch::{Selector, WorkspaceCandidate};
use crate::errors::{CmuxError, CmuxResult};
use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct FakeState {
    capabilities: Vec<String>,
    workspaces: Vec<String>,
    list_error: Option<String>,
    identify_errors: HashMap<String, String>,
    identify_error_all: Option<String>,
    create_failures: HashSet<String>,
    create_delays: HashMap<String, Duration>,
    create_cancels: HashMap<String, CancelToken>,
    select_failures: HashSet<String>,
    pane_list_failures: HashSet<String>,
    next_id: u64,
    panes: HashMap<String, Vec<Pane>>,
    surfaces: HashMap<String, Vec<Surface>>,
    surface_list_failures: HashSet<String>,
    screens: HashMap<String, String>,
    screen_failures: HashSet<String>,
    browser_save_failures: HashSet<String>,
    browser_load_failures: HashSet<String>,
    focus_failures: HashSet<String>,
    created_commands: Vec<String>,
    renames: Vec<(String, String)>,
    selects: Vec<String>,
    focuses: Vec<String>,
    browser_loads: Vec<(String, PathBuf)>,
    clients_created: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process stand-in for the cmux runtime
///
/// Every client handed out shares one state, so calls made by concurrent
/// workers land in the same logs.
#[derive(Debug, Clone)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// Runtime advertising every capability open requires
    pub fn new() -> Self {
        let state = FakeState {
            capabilities: OPEN_REQUIRED_CAPABILITIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            next_id: 1,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn client(&self) -> FakeClient {
        lock(&self.state).clients_created += 1;
        FakeClient {
            state: Arc::clone(&self.state),
        }
    }

    pub fn factory(&self) -> FakeFactory {
        FakeFactory {
            runtime: self.clone(),
        }
    }

    pub fn set_capabilities(&self, methods: &[&str]) {
        lock(&self.state).capabilities = methods.iter().map(|m| m.to_string()).collect();
    }

    /// Register a live runtime workspace
    pub fn add_workspace(&self, runtime_id: &str) {
        let mut state = lock(&self.state);
        if !state.workspaces.iter().any(|w| w == runtime_id) {
            state.workspaces.push(runtime_id.to_string());
        }
    }

    /// Make a runtime workspace disappear (later identify calls report it unknown)
    pub fn remove_workspace(&self, runtime_id: &str) {
        lock(&self.state).workspaces.retain(|w| w != runtime_id);
    }

    pub fn fail_list(&self, message: &str) {
        lock(&self.state).list_error = Some(message.to_string());
    }

    pub fn fail_identify(&self, runtime_id: &str, message: &str) {
        lock(&self.state)
            .identify_errors
            .insert(runtime_id.to_string(), message.to_string());
    }

    pub fn fail_all_identify(&self, message: &str) {
        lock(&self.state).identify_error_all = Some(message.to_string());
    }

    /// Fail creation for the workspace whose `cd` command targets `<...>/<workspace_id>`
    pub fn fail_create_for(&self, workspace_id: &str) {
        lock(&self.state)
            .create_failures
            .insert(workspace_id.to_string());
    }

    /// Sleep inside create for the given workspace
    pub fn delay_create_for(&self, workspace_id: &str, delay: Duration) {
        lock(&self.state)
            .create_delays
            .insert(workspace_id.to_string(), delay);
    }

    /// Cancel `token` while creating the workspace; the create itself then fails
    /// the way an interrupted adapter call does
    pub fn cancel_during_create(&self, workspace_id: &str, token: &CancelToken) {
        lock(&self.state)
            .create_cancels
            .insert(workspace_id.to_string(), token.clone());
    }

    pub fn fail_pane_list(&self, runtime_id: &str) {
        lock(&self.state)
            .pane_list_failures
            .insert(runtime_id.to_string());
    }

    pub fn fail_select(&self, runtime_id: &str) {
        lock(&self.state)
            .select_failures
            .insert(runtime_id.to_string());
    }

    pub fn set_panes(&self, runtime_id: &str, panes: Vec<Pane>) {
        lock(&self.state)
            .panes
            .insert(runtime_id.to_string(), panes);
    }

    pub fn set_surfaces(&self, pane_id: &str, surfaces: Vec<Surface>) {
        lock(&self.state)
            .surfaces
            .insert(pane_id.to_string(), surfaces);
    }

    pub fn fail_surface_list(&self, pane_id: &str) {
        lock(&self.state)
            .surface_list_failures
            .insert(pane_id.to_string());
    }

    pub fn set_screen(&self, surface_id: &str, text: &str) {
        lock(&self.state)
            .screens
            .insert(surface_id.to_string(), text.to_string());
    }

    pub fn fail_screen(&self, surface_id: &str) {
        lock(&self.state)
            .screen_failures
            .insert(surface_id.to_string());
    }

    pub fn fail_browser_save(&self, surface_id: &str) {
        lock(&self.state)
            .browser_save_failures
            .insert(surface_id.to_string());
    }

    pub fn fail_browser_load(&self, surface_id: &str) {
        lock(&self.state)
            .browser_load_failures
            .insert(surface_id.to_string());
    }

    pub fn fail_focus(&self, pane_id: &str) {
        lock(&self.state)
            .focus_failures
            .insert(pane_id.to_string());
    }

    pub fn created_commands(&self) -> Vec<String> {
        lock(&self.state).created_commands.clone()
    }

    /// `(runtime_id, title)` pairs in call order
    pub fn renames(&self) -> Vec<(String, String)> {
        lock(&self.state).renames.clone()
    }

    pub fn selects(&self) -> Vec<String> {
        lock(&self.state).selects.clone()
    }

    pub fn focuses(&self) -> Vec<String> {
        lock(&self.state).focuses.clone()
    }

    /// `(surface_id, path)` pairs in call order
    pub fn browser_loads(&self) -> Vec<(String, PathBuf)> {
        lock(&self.state).browser_loads.clone()
    }

    pub fn clients_created(&self) -> usize {
        lock(&self.state).clients_created
    }
}

/// Factory handing out [`FakeClient`]s over one shared [`FakeRuntime`]
#[derive(Debug, Clone)]
pub struct FakeFactory {
    runtime: FakeRuntime,
}

impl ClientFactory for FakeFactory {
    fn create(&self) -> Result<Box<dyn RuntimeClient>> {
        Ok(Box::new(self.runtime.client()))
    }
}

#[derive(Debug, Clone)]
pub struct FakeClient {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClient {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.state)
    }

    fn check_live(&self, workspace_id: &str) -> Result<()> {
        if self.state().workspaces.iter().any(|w| w == workspace_id) {
            Ok(())
        } else {
            bail!("unknown workspace {workspace_id}")
        }
    }
}

fn cancelled(ctx: &CancelToken) -> Result<()> {
    if ctx.is_cancelled() {
        bail!("cancelled");
    }
    Ok(())
}

/// Which workspace a `cd` command points at: its last path component
fn command_target(command: &str) -> &str {
    let trimmed = command.trim_end_matches(['"', '\'']);
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

impl RuntimeClient for FakeClient {
    fn capabilities(&self, ctx: &CancelToken) -> Result<Capabilities> {
        cancelled(ctx)?;
        Ok(Capabilities {
            methods: self.state().capabilities.clone(),
        })
    }

    fn create_workspace_with_command(&self, ctx: &CancelToken, command: &str) -> Result<String> {
        cancelled(ctx)?;
        let target = command_target(command).to_string();

        let delay = {
            let mut state = self.state();
            state.created_commands.push(command.to_string());
            state.create_delays.get(&target).copied()
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.state();
        if let Some(token) = state.create_cancels.get(&target) {
            token.cancel();
            bail!("cancelled");
        }
        if state.create_failures.contains(&target) {
            bail!("create refused for {target}");
        }
        let runtime_id = format!("rt-{}", state.next_id);
        state.next_id += 1;
        state.workspaces.push(runtime_id.clone());
        Ok(runtime_id)
    }

    fn rename_workspace(&self, ctx: &CancelToken, workspace_id: &str, title: &str) -> Result<()> {
        cancelled(ctx)?;
        self.check_live(workspace_id)?;
        self.state()
            .renames
            .push((workspace_id.to_string(), title.to_string()));
        Ok(())
    }

    fn select_workspace(&self, ctx: &CancelToken, workspace_id: &str) -> Result<()> {
        cancelled(ctx)?;
        self.check_live(workspace_id)?;
        let mut state = self.state();
        if state.select_failures.contains(workspace_id) {
            bail!("select refused for {workspace_id}");
        }
        state.selects.push(workspace_id.to_string());
        Ok(())
    }

    fn list_workspaces(&self, ctx: &CancelToken) -> Result<Vec<RuntimeWorkspace>> {
        cancelled(ctx)?;
        let state = self.state();
        if let Some(message) = &state.list_error {
            bail!("{message}");
        }
        Ok(state
            .workspaces
            .iter()
            .map(|id| RuntimeWorkspace {
                id: id.clone(),
                title: String::new(),
            })
            .collect())
    }

    fn identify(
        &self,
        ctx: &CancelToken,
        workspace_id: Option<&str>,
        surface_id: Option<&str>,
    ) -> Result<Identity> {
        cancelled(ctx)?;
        let workspace_id = workspace_id.unwrap_or_default();
        {
            let state = self.state();
            if let Some(message) = &state.identify_error_all {
                bail!("{message}");
            }
            if let Some(message) = state.identify_errors.get(workspace_id) {
                bail!("{message}");
            }
        }
        self.check_live(workspace_id)?;
        Ok(Identity {
            workspace_id: workspace_id.to_string(),
            surface_id: surface_id.map(str::to_string),
        })
    }

    fn list_panes(&self, ctx: &CancelToken, workspace_id: &str) -> Result<Vec<Pane>> {
        cancelled(ctx)?;
        self.check_live(workspace_id)?;
        if self.state().pane_list_failures.contains(workspace_id) {
            bail!("pane list unavailable for {workspace_id}");
        }
        Ok(self
            .state()
            .panes
            .get(workspace_id)
            .cloned()
            .unwrap_or_default())
    }

    fn list_pane_surfaces(
        &self,
        ctx: &CancelToken,
        _workspace_id: &str,
        pane_id: &str,
    ) -> Result<Vec<Surface>> {
        cancelled(ctx)?;
        let state = self.state();
        if state.surface_list_failures.contains(pane_id) {
            bail!("pane {pane_id} not responding");
        }
        Ok(state.surfaces.get(pane_id).cloned().unwrap_or_default())
    }

    fn read_screen(
        &self,
        ctx: &CancelToken,
        _workspace_id: &str,
        surface_id: &str,
        lines: u32,
        _scrollback: bool,
    ) -> Result<String> {
        cancelled(ctx)?;
        let state = self.state();
        if state.screen_failures.contains(surface_id) {
            bail!("read-screen failed for {surface_id}");
        }
        Ok(state
            .screens
            .get(surface_id)
            .cloned()
            .unwrap_or_else(|| format!("screen of {surface_id} ({lines} lines)\n")))
    }

    fn browser_state_save(
        &self,
        ctx: &CancelToken,
        _workspace_id: &str,
        surface_id: &str,
        path: &Path,
    ) -> Result<()> {
        cancelled(ctx)?;
        if self.state().browser_save_failures.contains(surface_id) {
            bail!("browser state unavailable for {surface_id}");
        }
        std::fs::write(path, format!("{{\"surface\":\"{surface_id}\"}}"))
            .map_err(|e| anyhow!("write {}: {e}", path.display()))
    }

    fn browser_state_load(
        &self,
        ctx: &CancelToken,
        _workspace_id: &str,
        surface_id: &str,
        path: &Path,
    ) -> Result<()> {
        cancelled(ctx)?;
        let mut state = self.state();
        if state.browser_load_failures.contains(surface_id) {
            bail!("browser state rejected for {surface_id}");
        }
        state
            .browser_loads
            .push((surface_id.to_string(), path.to_path_buf()));
        Ok(())
    }

    fn focus_pane(&self, ctx: &CancelToken, pane_id: &str, _workspace_id: &str) -> Result<()> {
        cancelled(ctx)?;
        let mut state = self.state();
        if state.focus_failures.contains(pane_id) {
            bail!("pane {pane_id} not found");
        }
        state.focuses.push(pane_id.to_string());
        Ok(())
    }
}

/// Mapping store kept in memory; counts saves and can be told to fail them
#[derive(Debug, Default)]
pub struct MemoryMappingStore {
    stored: Mutex<MappingFile>,
    saves: AtomicUsize,
    fail: Mutex<bool>,
}

impl MemoryMappingStore {
    pub fn with(mapping: MappingFile) -> Self {
        Self {
            stored: Mutex::new(mapping),
            ..Default::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn fail_saves(&self) {
        *lock(&self.fail) = true;
    }

    /// Last mapping saved (or the seed)
    pub fn stored(&self) -> MappingFile {
        lock(&self.stored).clone()
    }
}

impl MappingStore for MemoryMappingStore {
    fn load(&self) -> CmuxResult<MappingFile> {
        Ok(self.stored())
    }

    fn save(&self, mapping: &MappingFile) -> CmuxResult<()> {
        if *lock(&self.fail) {
            return Err(CmuxError::state_write("disk full"));
        }
        *lock(&self.stored) = mapping.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Selector answering from a script; unscripted questions are treated as cancelled
#[derive(Debug, Default)]
pub struct ScriptedSelector {
    workspace: Option<String>,
    entry: Option<usize>,
    calls: AtomicUsize,
}

impl ScriptedSelector {
    pub fn with_entry(index: usize) -> Self {
        Self {
            entry: Some(index),
            ..Default::default()
        }
    }

    pub fn with_workspace(workspace_id: &str) -> Self {
        Self {
            workspace: Some(workspace_id.to_string()),
            ..Default::default()
        }
    }

    pub fn and_entry(mut self, index: usize) -> Self {
        self.entry = Some(index);
        self
    }

    /// Number of times the selector was consulted
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Selector for ScriptedSelector {
    fn select_workspace(&self, _candidates: &[WorkspaceCandidate]) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.workspace.clone())
    }

    fn select_entry(
        &self,
        _workspace_id: &str,
        _entries: &[RuntimeEntry],
    ) -> Result<Option<usize>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entry)
    }
}
