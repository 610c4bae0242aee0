//! Runtime client contract
//!
//! The cmux runtime is consumed through the [`RuntimeClient`] trait so the
//! coordinators never embed process calls directly. Instances are not assumed
//! safe for concurrent use; concurrent callers obtain one per worker from a
//! [`ClientFactory`].

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const CAP_WORKSPACE_CREATE: &str = "workspace.create";
pub const CAP_WORKSPACE_RENAME: &str = "workspace.rename";
pub const CAP_WORKSPACE_SELECT: &str = "workspace.select";

/// Capabilities that must be advertised before open mutates anything
pub const OPEN_REQUIRED_CAPABILITIES: [&str; 3] = [
    CAP_WORKSPACE_CREATE,
    CAP_WORKSPACE_RENAME,
    CAP_WORKSPACE_SELECT,
];

/// Methods advertised by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub methods: Vec<String>,
}

impl Capabilities {
    pub fn has(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    /// Required methods that are not advertised, in the order given
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|m| !self.has(m))
            .collect()
    }
}

/// A runtime workspace as reported by `ListWorkspaces`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeWorkspace {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Result of an `Identify` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pane {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "ref")]
    pub pane_ref: String,
    #[serde(default)]
    pub focused: bool,
}

impl Pane {
    /// Id when present, otherwise ref
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.pane_ref
        } else {
            &self.id
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "ref")]
    pub surface_ref: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub surface_type: String,
    #[serde(default)]
    pub selected: bool,
}

impl Surface {
    /// Id when present, otherwise ref
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.surface_ref
        } else {
            &self.id
        }
    }

    pub fn is_browser(&self) -> bool {
        self.surface_type.eq_ignore_ascii_case("browser")
    }
}

/// Cancellation signal threaded through every runtime call
///
/// Clones share the same flag. Adapters poll it while an external call is in flight.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for registering with signal handlers
    pub fn shared_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Synchronous operations against the cmux runtime
///
/// Every call may block on an external process or socket and may fail.
pub trait RuntimeClient {
    fn capabilities(&self, ctx: &CancelToken) -> Result<Capabilities>;

    /// Create a runtime workspace running `command`; returns the new runtime id
    fn create_workspace_with_command(&self, ctx: &CancelToken, command: &str) -> Result<String>;

    fn rename_workspace(&self, ctx: &CancelToken, workspace_id: &str, title: &str) -> Result<()>;

    fn select_workspace(&self, ctx: &CancelToken, workspace_id: &str) -> Result<()>;

    fn list_workspaces(&self, ctx: &CancelToken) -> Result<Vec<RuntimeWorkspace>>;

    fn identify(
        &self,
        ctx: &CancelToken,
        workspace_id: Option<&str>,
        surface_id: Option<&str>,
    ) -> Result<Identity>;

    fn list_panes(&self, ctx: &CancelToken, workspace_id: &str) -> Result<Vec<Pane>>;

    fn list_pane_surfaces(
        &self,
        ctx: &CancelToken,
        workspace_id: &str,
        pane_id: &str,
    ) -> Result<Vec<Surface>>;

    fn read_screen(
        &self,
        ctx: &CancelToken,
        workspace_id: &str,
        surface_id: &str,
        lines: u32,
        scrollback: bool,
    ) -> Result<String>;

    fn browser_state_save(
        &self,
        ctx: &CancelToken,
        workspace_id: &str,
        surface_id: &str,
        path: &Path,
    ) -> Result<()>;

    fn browser_state_load(
        &self,
        ctx: &CancelToken,
        workspace_id: &str,
        surface_id: &str,
        path: &Path,
    ) -> Result<()>;

    fn focus_pane(&self, ctx: &CancelToken, pane_id: &str, workspace_id: &str) -> Result<()>;
}

/// Produces independent client instances (one per worker)
pub trait ClientFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn RuntimeClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn() -> Result<Box<dyn RuntimeClient>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn RuntimeClient>> {
        self()
    }
}

/// Stale-entry heuristic: does a runtime failure mean the workspace is gone?
///
/// The runtime exposes no structured "not found" status, so this is the one
/// place where error text is inspected. Matches "not found" or "unknown workspace",
/// case-insensitively, anywhere in the error chain.
pub fn is_not_found_error(error: &anyhow::Error) -> bool {
    let message = format!("{error:#}").to_lowercase();
    message.contains("not found") || message.contains("unknown workspace")
}

/// Liveness of a single runtime id as classified by a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    Live,
    NotFound,
    /// The probe failed for a reason that says nothing about the workspace
    Indeterminate(String),
}

impl Liveness {
    pub fn is_definitive(&self) -> bool {
        !matches!(self, Liveness::Indeterminate(_))
    }
}

/// Classify one runtime id with an `Identify` call
pub fn probe(client: &dyn RuntimeClient, ctx: &CancelToken, runtime_id: &str) -> Liveness {
    match client.identify(ctx, Some(runtime_id), None) {
        Ok(_) => Liveness::Live,
        Err(e) if is_not_found_error(&e) => Liveness::NotFound,
        Err(e) => Liveness::Indeterminate(format!("{e:#}")),
    }
}
