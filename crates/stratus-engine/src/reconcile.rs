use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use stratus_domain::{
    ArtifactAction, ArtifactChange, ArtifactKind, DeploymentPhase, NodeName, PhaseRecord,
};
use tracing::{debug, info, warn};

use crate::error::ArtifactError;
use crate::fs_util::{copy_file, promote, remove_if_exists, sha256_bytes, sha256_file, write_atomic};
use crate::graph::InstanceVars;
use crate::layout::ArtifactLayout;
use crate::state::PhaseStore;
use crate::translate::TranslationOutput;

type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

/// What an update pass has to do, given the staged artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Nodes are gone but committed artifacts exist: destroy, then clean up.
    Undeploy,
    /// Nothing translated and nothing committed.
    Skip,
    /// The graph changed: promote everything.
    PromoteGraph,
    /// Only these nodes' bootstrap documents changed.
    PromoteBootstrap(Vec<NodeName>),
    NothingToUpdate,
}

/// Decision table of the update operation.
#[must_use]
pub fn decide(
    has_providers: bool,
    committed: bool,
    graph_differs: bool,
    changed_bootstrap: Vec<NodeName>,
) -> UpdateDecision {
    match (has_providers, committed) {
        (false, true) => UpdateDecision::Undeploy,
        (false, false) => UpdateDecision::Skip,
        (true, _) if graph_differs => UpdateDecision::PromoteGraph,
        (true, _) if !changed_bootstrap.is_empty() => {
            UpdateDecision::PromoteBootstrap(changed_bootstrap)
        }
        (true, _) => UpdateDecision::NothingToUpdate,
    }
}

/// Committed and staged artifacts of one deployment, plus its phase record.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: ArtifactLayout,
    phases: PhaseStore,
    service_account_source: Option<PathBuf>,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(layout: ArtifactLayout, service_account_source: Option<PathBuf>) -> Self {
        let phases = PhaseStore::new(layout.phase_record(), layout.deployment().clone());
        Self {
            layout,
            phases,
            service_account_source,
        }
    }

    #[must_use]
    pub const fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// # Errors
    ///
    /// Returns an error when the phase record cannot be read.
    pub fn load_record(&self) -> ArtifactResult<PhaseRecord> {
        self.phases.load()
    }

    /// # Errors
    ///
    /// Returns an error when the phase record cannot be written.
    pub fn save_record(&self, record: &PhaseRecord) -> ArtifactResult<()> {
        self.phases.save(record)
    }

    /// Write every artifact straight to its committed path and mark the
    /// deployment committed. Bootstrap documents of nodes no longer present
    /// are removed.
    ///
    /// # Errors
    ///
    /// Returns an error when an artifact cannot be written.
    pub fn commit(
        &self,
        output: &TranslationOutput,
        record: &mut PhaseRecord,
    ) -> ArtifactResult<Vec<ArtifactChange>> {
        let mut changes = Vec::new();

        let graph = render(output.graph.render_graph(), &self.layout.graph())?;
        write_atomic(&self.layout.graph(), graph.as_bytes())?;
        changes.push(change(ArtifactKind::Graph, self.layout.graph(), ArtifactAction::Written));

        let vars = render(output.graph.render_vars(), &self.layout.vars())?;
        write_atomic(&self.layout.vars(), vars.as_bytes())?;
        changes.push(change(ArtifactKind::Variables, self.layout.vars(), ArtifactAction::Written));

        let mut manifest = BTreeMap::new();
        for (node, content) in &output.bootstrap {
            let path = self.layout.bootstrap(node);
            write_atomic(&path, content.as_bytes())?;
            manifest.insert(node.clone(), sha256_bytes(content.as_bytes()));
            changes.push(change(
                ArtifactKind::Bootstrap { node: node.clone() },
                path,
                ArtifactAction::Written,
            ));
        }
        changes.extend(self.remove_departed(&record.bootstrap, &manifest)?);

        let service_account = self.stage_service_account(output, &mut changes)?;

        record.phase = DeploymentPhase::Committed;
        record.graph_hash = Some(sha256_bytes(graph.as_bytes()));
        record.vars_hash = Some(sha256_bytes(vars.as_bytes()));
        record.bootstrap = manifest;
        record.service_account = service_account;
        self.phases.save(record)?;
        changes.push(change(
            ArtifactKind::PhaseRecord,
            self.phases.path().to_path_buf(),
            ArtifactAction::Written,
        ));

        info!(deployment = %self.layout.deployment(), "artifacts committed");
        Ok(changes)
    }

    /// Write staged copies next to the committed artifacts. Instance tokens
    /// of nodes already in the committed variable file are kept.
    ///
    /// # Errors
    ///
    /// Returns an error when the committed variable file is unreadable or a
    /// staged file cannot be written.
    pub fn stage(&self, output: &mut TranslationOutput) -> ArtifactResult<Vec<ArtifactChange>> {
        let previous = self.committed_instance_vars()?;
        output.graph.update_instance_vars(&previous);

        let mut changes = Vec::new();
        let graph = render(output.graph.render_graph(), &self.layout.graph())?;
        let staged_graph = ArtifactLayout::staged(&self.layout.graph());
        write_atomic(&staged_graph, graph.as_bytes())?;
        changes.push(change(ArtifactKind::Graph, staged_graph, ArtifactAction::Staged));

        let vars = render(output.graph.render_vars(), &self.layout.vars())?;
        let staged_vars = ArtifactLayout::staged(&self.layout.vars());
        write_atomic(&staged_vars, vars.as_bytes())?;
        changes.push(change(ArtifactKind::Variables, staged_vars, ArtifactAction::Staged));

        for (node, content) in &output.bootstrap {
            let staged = ArtifactLayout::staged(&self.layout.bootstrap(node));
            write_atomic(&staged, content.as_bytes())?;
            changes.push(change(
                ArtifactKind::Bootstrap { node: node.clone() },
                staged,
                ArtifactAction::Staged,
            ));
        }
        debug!(deployment = %self.layout.deployment(), "artifacts staged");
        Ok(changes)
    }

    /// Whether the staged graph differs from the committed one.
    ///
    /// # Errors
    ///
    /// Returns an error when either file cannot be read.
    pub fn graph_differs(&self) -> ArtifactResult<bool> {
        let committed = sha256_file(&self.layout.graph())?;
        let staged = sha256_file(&ArtifactLayout::staged(&self.layout.graph()))?;
        Ok(committed.is_none() || committed != staged)
    }

    /// Nodes whose staged bootstrap document differs from the committed one.
    ///
    /// # Errors
    ///
    /// Returns an error when a document cannot be read.
    pub fn changed_bootstrap(&self, output: &TranslationOutput) -> ArtifactResult<Vec<NodeName>> {
        let mut changed = Vec::new();
        for (node, content) in &output.bootstrap {
            let committed = sha256_file(&self.layout.bootstrap(node))?;
            if committed.as_deref() != Some(sha256_bytes(content.as_bytes()).as_str()) {
                changed.push(node.clone());
            }
        }
        Ok(changed)
    }

    /// Promote the staged graph, variables and every staged bootstrap
    /// document, and drop documents of nodes that left the deployment.
    ///
    /// # Errors
    ///
    /// Returns an error when a rename or removal fails.
    pub fn promote_all(
        &self,
        output: &TranslationOutput,
        record: &mut PhaseRecord,
    ) -> ArtifactResult<Vec<ArtifactChange>> {
        let mut changes = Vec::new();
        for (kind, committed) in [
            (ArtifactKind::Graph, self.layout.graph()),
            (ArtifactKind::Variables, self.layout.vars()),
        ] {
            if promote(&ArtifactLayout::staged(&committed), &committed)? {
                changes.push(change(kind, committed, ArtifactAction::Promoted));
            }
        }

        let mut manifest = BTreeMap::new();
        for (node, content) in &output.bootstrap {
            let committed = self.layout.bootstrap(node);
            if promote(&ArtifactLayout::staged(&committed), &committed)? {
                changes.push(change(
                    ArtifactKind::Bootstrap { node: node.clone() },
                    committed,
                    ArtifactAction::Promoted,
                ));
            }
            manifest.insert(node.clone(), sha256_bytes(content.as_bytes()));
        }
        changes.extend(self.remove_departed(&record.bootstrap, &manifest)?);

        let service_account = self.stage_service_account(output, &mut changes)?;

        record.phase = DeploymentPhase::Committed;
        record.graph_hash = sha256_file(&self.layout.graph())?;
        record.vars_hash = sha256_file(&self.layout.vars())?;
        record.bootstrap = manifest;
        record.service_account = service_account;
        self.phases.save(record)?;

        info!(deployment = %self.layout.deployment(), "staged graph promoted");
        Ok(changes)
    }

    /// Promote only the listed bootstrap documents; every other staged file
    /// is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error when a rename or removal fails.
    pub fn promote_bootstrap(
        &self,
        output: &TranslationOutput,
        nodes: &[NodeName],
        record: &mut PhaseRecord,
    ) -> ArtifactResult<Vec<ArtifactChange>> {
        let mut changes = Vec::new();
        for node in nodes {
            let committed = self.layout.bootstrap(node);
            if promote(&ArtifactLayout::staged(&committed), &committed)? {
                changes.push(change(
                    ArtifactKind::Bootstrap { node: node.clone() },
                    committed,
                    ArtifactAction::Promoted,
                ));
            }
            if let Some(content) = output.bootstrap.get(node) {
                record
                    .bootstrap
                    .insert(node.clone(), sha256_bytes(content.as_bytes()));
            }
        }
        changes.extend(self.discard_staged(output)?);

        record.phase = DeploymentPhase::Committed;
        self.phases.save(record)?;
        info!(
            deployment = %self.layout.deployment(),
            nodes = nodes.len(),
            "staged bootstrap documents promoted"
        );
        Ok(changes)
    }

    /// Remove every staged file that is still present.
    ///
    /// # Errors
    ///
    /// Returns an error when a staged file exists but cannot be removed.
    pub fn discard_staged(&self, output: &TranslationOutput) -> ArtifactResult<Vec<ArtifactChange>> {
        let mut candidates = vec![
            (ArtifactKind::Graph, self.layout.graph()),
            (ArtifactKind::Variables, self.layout.vars()),
        ];
        candidates.extend(output.bootstrap.keys().map(|node| {
            (
                ArtifactKind::Bootstrap { node: node.clone() },
                self.layout.bootstrap(node),
            )
        }));

        let mut changes = Vec::new();
        for (kind, committed) in candidates {
            let staged = ArtifactLayout::staged(&committed);
            if remove_if_exists(&staged)? {
                changes.push(change(kind, staged, ArtifactAction::Discarded));
            }
        }
        Ok(changes)
    }

    /// Remove every artifact the deployment owns, including backend state
    /// and the phase record. Missing files are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing file cannot be removed.
    pub fn cleanup(&self, record: &PhaseRecord) -> ArtifactResult<Vec<ArtifactChange>> {
        let mut candidates = vec![
            (ArtifactKind::Graph, self.layout.graph()),
            (ArtifactKind::Variables, self.layout.vars()),
            (ArtifactKind::ServiceAccount, self.layout.service_account()),
        ];
        candidates.extend(
            self.layout
                .backend_state()
                .into_iter()
                .map(|path| (ArtifactKind::BackendState, path)),
        );
        candidates.extend(record.bootstrap.keys().map(|node| {
            (
                ArtifactKind::Bootstrap { node: node.clone() },
                self.layout.bootstrap(node),
            )
        }));

        let mut changes = Vec::new();
        for (kind, path) in candidates {
            for candidate in [ArtifactLayout::staged(&path), path] {
                if remove_if_exists(&candidate)? {
                    changes.push(change(kind.clone(), candidate, ArtifactAction::Removed));
                }
            }
        }
        if self.phases.remove()? {
            changes.push(change(
                ArtifactKind::PhaseRecord,
                self.phases.path().to_path_buf(),
                ArtifactAction::Removed,
            ));
        }
        info!(
            deployment = %self.layout.deployment(),
            removed = changes.len(),
            "artifacts cleaned up"
        );
        Ok(changes)
    }

    fn committed_instance_vars(&self) -> ArtifactResult<InstanceVars> {
        let path = self.layout.vars();
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| ArtifactError::JsonDecode { path, source }),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(InstanceVars::new()),
            Err(source) => Err(ArtifactError::Io {
                context: format!("failed to read {}", path.display()),
                source,
            }),
        }
    }

    fn remove_departed(
        &self,
        previous: &BTreeMap<NodeName, String>,
        current: &BTreeMap<NodeName, String>,
    ) -> ArtifactResult<Vec<ArtifactChange>> {
        let mut changes = Vec::new();
        for node in previous.keys().filter(|node| !current.contains_key(*node)) {
            let path = self.layout.bootstrap(node);
            if remove_if_exists(&path)? {
                debug!(%node, "removed bootstrap document of departed node");
                changes.push(change(
                    ArtifactKind::Bootstrap { node: node.clone() },
                    path,
                    ArtifactAction::Removed,
                ));
            }
        }
        Ok(changes)
    }

    /// Copy the configured service-account file into the artifact directory
    /// when a mapper asked for it.
    fn stage_service_account(
        &self,
        output: &TranslationOutput,
        changes: &mut Vec<ArtifactChange>,
    ) -> ArtifactResult<bool> {
        if !output.stage_service_account {
            return Ok(false);
        }
        let Some(source) = self.service_account_source.as_deref() else {
            warn!("a node needs a service-account file but none is configured");
            return Ok(false);
        };
        let dest = self.layout.service_account();
        copy_file(source, &dest)?;
        changes.push(change(ArtifactKind::ServiceAccount, dest, ArtifactAction::Written));
        Ok(true)
    }
}

fn render(rendered: serde_json::Result<String>, path: &Path) -> ArtifactResult<String> {
    rendered.map_err(|source| ArtifactError::JsonEncode {
        path: path.to_path_buf(),
        source,
    })
}

fn change(kind: ArtifactKind, path: PathBuf, action: ArtifactAction) -> ArtifactChange {
    ArtifactChange { kind, path, action }
}
