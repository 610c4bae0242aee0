//! Reconciliation of stored mappings against live runtime state
//!
//! An empty runtime listing means "unknown", never "everything is gone". When
//! the listing is empty (or fails) each mapped runtime id is probed with
//! `Identify` instead, and pruning from probes only commits if at least one
//! probe gave a definitive answer.

use crate::cmux::client::{probe, CancelToken, Liveness, RuntimeClient, RuntimeWorkspace};
use crate::cmux::mapping::{MappingFile, MappingStore};
use crate::errors::{CmuxResult, ErrorCode};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Outcome of reconciling against a runtime listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Trimmed, non-empty runtime ids reported by the runtime
    pub exists: HashSet<String>,
    pub pruned: usize,
}

/// Reconcile `mapping` with a runtime listing
///
/// Pruning happens only when `prune` is set and the listing is non-empty.
pub fn reconcile(
    mapping: &mut MappingFile,
    runtime_list: &[RuntimeWorkspace],
    prune: bool,
) -> ReconcileOutcome {
    let exists: HashSet<String> = runtime_list
        .iter()
        .map(|w| w.id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let pruned = if prune && !exists.is_empty() {
        mapping.retain_entries(|e| exists.contains(&e.runtime_id))
    } else {
        0
    };

    ReconcileOutcome { exists, pruned }
}

/// Probe every distinct mapped runtime id
pub fn probe_entries(
    client: &dyn RuntimeClient,
    ctx: &CancelToken,
    mapping: &MappingFile,
) -> BTreeMap<String, Liveness> {
    mapping
        .runtime_ids()
        .into_iter()
        .map(|id| {
            let liveness = probe(client, ctx, &id);
            (id, liveness)
        })
        .collect()
}

/// Outcome of pruning from probe results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbePruneOutcome {
    pub pruned: usize,
    pub warning: Option<String>,
}

/// Remove entries probed as not-found
///
/// Skipped entirely (with a warning) when no probe resolved definitively.
pub fn prune_from_probes(
    mapping: &mut MappingFile,
    probes: &BTreeMap<String, Liveness>,
) -> ProbePruneOutcome {
    if probes.is_empty() {
        return ProbePruneOutcome::default();
    }

    if !probes.values().any(Liveness::is_definitive) {
        let reason = probes
            .values()
            .find_map(|l| match l {
                Liveness::Indeterminate(reason) => Some(reason.as_str()),
                _ => None,
            })
            .unwrap_or("unknown error");
        return ProbePruneOutcome {
            pruned: 0,
            warning: Some(format!(
                "cmux state unknown: all {} probe(s) were indeterminate ({reason}); skipped pruning",
                probes.len()
            )),
        };
    }

    let pruned =
        mapping.retain_entries(|e| !matches!(probes.get(&e.runtime_id), Some(Liveness::NotFound)));
    ProbePruneOutcome {
        pruned,
        warning: None,
    }
}

/// What is known about runtime presence after a sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    /// Authoritative listing from the runtime
    Listed(HashSet<String>),
    /// Per-entry probe results
    Probed(BTreeMap<String, Liveness>),
}

impl Presence {
    /// `Some(true/false)` when known, `None` when the runtime could not tell
    pub fn exists(&self, runtime_id: &str) -> Option<bool> {
        match self {
            Presence::Listed(ids) => Some(ids.contains(runtime_id)),
            Presence::Probed(probes) => match probes.get(runtime_id) {
                Some(Liveness::Live) => Some(true),
                Some(Liveness::NotFound) => Some(false),
                _ => None,
            },
        }
    }
}

/// Result of [`ReconciliationEngine::sync`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeView {
    pub presence: Presence,
    pub pruned: usize,
    pub warnings: Vec<String>,
}

/// One mapped entry as shown by list/status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingRow {
    pub workspace_id: String,
    pub runtime_id: String,
    pub handle: String,
    pub title: String,
    pub ordinal: u64,
    /// `None` when the runtime state is unknown
    pub exists: Option<bool>,
    pub last_used_at: DateTime<Utc>,
}

/// Keeps the mapping consistent with the runtime; used by list, status and switch
pub struct ReconciliationEngine<'a> {
    client: &'a dyn RuntimeClient,
    store: &'a dyn MappingStore,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(client: &'a dyn RuntimeClient, store: &'a dyn MappingStore) -> Self {
        Self { client, store }
    }

    /// List the runtime (falling back to probes), optionally prune, persist if anything was pruned
    pub fn sync(
        &self,
        ctx: &CancelToken,
        mapping: &mut MappingFile,
        prune: bool,
    ) -> CmuxResult<RuntimeView> {
        let mut warnings = Vec::new();

        let listing = match self.client.list_workspaces(ctx) {
            Ok(listing) => listing,
            Err(e) => {
                warnings.push(format!("{}: workspace.list: {e:#}", ErrorCode::CmuxListFailed));
                Vec::new()
            }
        };

        let (presence, pruned) = if listing.iter().any(|w| !w.id.trim().is_empty()) {
            let outcome = reconcile(mapping, &listing, prune);
            (Presence::Listed(outcome.exists), outcome.pruned)
        } else {
            let probes = probe_entries(self.client, ctx, mapping);
            let pruned = if prune {
                let outcome = prune_from_probes(mapping, &probes);
                warnings.extend(outcome.warning);
                outcome.pruned
            } else {
                if !probes.is_empty() && !probes.values().any(Liveness::is_definitive) {
                    warnings.push(format!(
                        "cmux state unknown: all {} probe(s) were indeterminate",
                        probes.len()
                    ));
                }
                0
            };
            (Presence::Probed(probes), pruned)
        };

        for warning in &warnings {
            warn!("{warning}");
        }

        if pruned > 0 {
            info!("pruned {pruned} stale cmux mapping entries");
            self.store.save(mapping)?;
        }

        Ok(RuntimeView {
            presence,
            pruned,
            warnings,
        })
    }
}

/// Flatten the mapping into display rows, optionally for a single workspace
pub fn mapping_rows(
    mapping: &MappingFile,
    presence: &Presence,
    workspace_id: Option<&str>,
) -> Vec<MappingRow> {
    let mut rows: Vec<MappingRow> = mapping
        .workspaces
        .iter()
        .filter(|(id, _)| workspace_id.map_or(true, |wanted| wanted == id.as_str()))
        .flat_map(|(id, ws)| {
            ws.entries.iter().map(move |e| MappingRow {
                workspace_id: id.clone(),
                runtime_id: e.runtime_id.clone(),
                handle: e.handle(),
                title: e.title_snapshot.clone(),
                ordinal: e.ordinal,
                exists: presence.exists(&e.runtime_id),
                last_used_at: e.last_used_at,
            })
        })
        .collect();
    rows.sort_by(|a, b| {
        a.workspace_id
            .cmp(&b.workspace_id)
            .then(a.ordinal.cmp(&b.ordinal))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmux::mapping::RuntimeEntry;
    use crate::test_support::{FakeRuntime, MemoryMappingStore};
    use chrono::TimeZone;

    fn entry(runtime_id: &str, ordinal: u64) -> RuntimeEntry {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        RuntimeEntry {
            runtime_id: runtime_id.to_string(),
            ordinal,
            title_snapshot: format!("t #{ordinal}"),
            created_at: at,
            last_used_at: at,
        }
    }

    fn listing(ids: &[&str]) -> Vec<RuntimeWorkspace> {
        ids.iter()
            .map(|id| RuntimeWorkspace {
                id: id.to_string(),
                title: String::new(),
            })
            .collect()
    }

    fn seeded() -> MappingFile {
        let mut mapping = MappingFile::default();
        mapping.workspace_mut("a").entries.push(entry("rt-a", 1));
        mapping.workspace_mut("b").entries.push(entry("rt-b", 1));
        mapping.workspace_mut("c").entries.push(entry("rt-c", 2));
        mapping
    }

    #[test]
    fn test_selective_pruning_removes_only_missing_entry() {
        let mut mapping = seeded();
        let outcome = reconcile(&mut mapping, &listing(&["rt-a", " rt-c ", ""]), true);

        assert_eq!(outcome.pruned, 1);
        assert_eq!(outcome.exists.len(), 2);
        assert_eq!(mapping.entries("a").len(), 1);
        assert!(mapping.entries("b").is_empty());
        assert_eq!(mapping.entries("c").len(), 1);
        // Counter survives pruning
        assert_eq!(mapping.workspaces["b"].next_ordinal, 1);
    }

    #[test]
    fn test_empty_listing_never_prunes() {
        let mut mapping = seeded();
        let before = mapping.clone();
        let outcome = reconcile(&mut mapping, &listing(&["  "]), true);
        assert_eq!(outcome.pruned, 0);
        assert_eq!(mapping, before);
    }

    #[test]
    fn test_prune_flag_off_keeps_entries() {
        let mut mapping = seeded();
        let outcome = reconcile(&mut mapping, &listing(&["rt-a"]), false);
        assert_eq!(outcome.pruned, 0);
        assert_eq!(mapping.runtime_ids().len(), 3);
    }

    #[test]
    fn test_probe_pruning_requires_a_definitive_probe() {
        let mut mapping = seeded();
        let probes: BTreeMap<String, Liveness> = [
            ("rt-a", Liveness::Indeterminate("timeout".into())),
            ("rt-b", Liveness::Indeterminate("timeout".into())),
            ("rt-c", Liveness::Indeterminate("timeout".into())),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let outcome = prune_from_probes(&mut mapping, &probes);
        assert_eq!(outcome.pruned, 0);
        assert!(outcome.warning.unwrap().contains("timeout"));
        assert_eq!(mapping.runtime_ids().len(), 3);
    }

    #[test]
    fn test_probe_pruning_removes_not_found_only() {
        let mut mapping = seeded();
        let probes: BTreeMap<String, Liveness> = [
            ("rt-a", Liveness::Live),
            ("rt-b", Liveness::NotFound),
            ("rt-c", Liveness::Indeterminate("timeout".into())),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let outcome = prune_from_probes(&mut mapping, &probes);
        assert_eq!(outcome.pruned, 1);
        assert!(outcome.warning.is_none());
        assert_eq!(
            mapping.runtime_ids(),
            vec!["rt-a".to_string(), "rt-c".to_string()]
        );
    }

    #[test]
    fn test_sync_with_unreachable_runtime_leaves_mapping_alone() {
        let runtime = FakeRuntime::new();
        runtime.fail_all_identify("connection refused");
        let client = runtime.client();
        let store = MemoryMappingStore::default();
        let engine = ReconciliationEngine::new(&client, &store);

        let mut mapping = seeded();
        let before = mapping.clone();
        let view = engine.sync(&CancelToken::new(), &mut mapping, true).unwrap();

        assert_eq!(view.pruned, 0);
        assert_eq!(mapping, before);
        assert!(!view.warnings.is_empty());
        assert_eq!(view.presence.exists("rt-a"), None);
        assert_eq!(store.saves(), 0);
    }

    #[test]
    fn test_sync_prunes_from_listing_and_persists() {
        let runtime = FakeRuntime::new();
        runtime.add_workspace("rt-a");
        runtime.add_workspace("rt-c");
        let client = runtime.client();
        let store = MemoryMappingStore::default();
        let engine = ReconciliationEngine::new(&client, &store);

        let mut mapping = seeded();
        let view = engine.sync(&CancelToken::new(), &mut mapping, true).unwrap();

        assert_eq!(view.pruned, 1);
        assert_eq!(store.saves(), 1);
        assert_eq!(view.presence.exists("rt-a"), Some(true));
        assert_eq!(view.presence.exists("rt-b"), Some(false));
    }

    #[test]
    fn test_mapping_rows_sorted_and_filtered() {
        let mapping = seeded();
        let presence = Presence::Listed(["rt-a".to_string()].into_iter().collect());

        let rows = mapping_rows(&mapping, &presence, None);
        let ids: Vec<&str> = rows.iter().map(|r| r.workspace_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(rows[0].exists, Some(true));
        assert_eq!(rows[1].exists, Some(false));
        assert_eq!(rows[2].handle, "workspace:2");

        let only_c = mapping_rows(&mapping, &presence, Some("c"));
        assert_eq!(only_c.len(), 1);
    }
}
