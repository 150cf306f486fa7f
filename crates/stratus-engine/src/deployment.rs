use std::collections::BTreeSet;

use stratus_domain::{
    Descriptor, DeploymentId, DeploymentPhase, Operation, PhaseRecord, RunReport, Status,
    TranslateMode,
};
use tracing::{debug, info};

use crate::apply::ApplyExecutor;
use crate::error::{EngineError, ExecutionError};
use crate::reconcile::{ArtifactStore, UpdateDecision, decide};
use crate::translate::{TranslationOutput, Translator};

type EngineResult<T> = std::result::Result<T, EngineError>;

/// Report of one operation plus the values a renderer must redact from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub report: RunReport,
    pub sensitive_values: BTreeSet<String>,
}

impl OperationOutcome {
    fn new(report: RunReport) -> Self {
        Self {
            report,
            sensitive_values: BTreeSet::new(),
        }
    }
}

/// Caller-facing operations for one deployment identifier.
pub struct Deployment<'a> {
    translator: Translator<'a>,
    store: ArtifactStore,
    executor: Option<ApplyExecutor>,
    execution_label: String,
    dry_run: bool,
}

impl<'a> Deployment<'a> {
    /// A deployment without an execution context: translate and cleanup
    /// work, apply-class operations fail with [`ExecutionError::Unavailable`].
    #[must_use]
    pub fn new(
        translator: Translator<'a>,
        store: ArtifactStore,
        execution_label: impl Into<String>,
    ) -> Self {
        Self {
            translator,
            store,
            executor: None,
            execution_label: execution_label.into(),
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Option<ApplyExecutor>) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub const fn id(&self) -> &DeploymentId {
        self.store.layout().deployment()
    }

    /// Translate `descriptor` and write artifacts according to `mode`.
    ///
    /// # Errors
    ///
    /// Returns an error when translation fails or artifacts cannot be written.
    /// Nothing is written when translation fails.
    pub fn translate(
        &self,
        descriptor: &Descriptor,
        mode: TranslateMode,
    ) -> EngineResult<OperationOutcome> {
        info!(deployment = %self.id(), ?mode, "translating");
        let mut outcome =
            OperationOutcome::new(RunReport::new(self.id().clone(), Operation::Translate));
        let mut output = self.translator.translate(descriptor)?;
        outcome.sensitive_values.clone_from(&output.sensitive_values);
        let mut record = self.store.load_record()?;

        if !output.has_providers() {
            info!(deployment = %self.id(), "no nodes to orchestrate; skipping");
            outcome.report.status = Status::Skipped;
            outcome.report.phase = record.phase;
            return Ok(outcome);
        }

        match mode {
            TranslateMode::Build => {
                outcome.report.artifacts = self.store.commit(&output, &mut record)?;
                // A fresh build supersedes whatever an earlier update staged.
                let discarded = self.store.discard_staged(&output)?;
                outcome.report.artifacts.extend(discarded);
            }
            TranslateMode::Update => {
                outcome.report.artifacts = self.store.stage(&mut output)?;
                if !record.has_committed_artifacts() {
                    record.phase = DeploymentPhase::Staged;
                    self.store.save_record(&record)?;
                }
            }
            TranslateMode::Validate => {
                debug!(deployment = %self.id(), "validate mode; nothing written");
            }
        }

        outcome.report.status = Status::Translated;
        outcome.report.phase = record.phase;
        Ok(outcome)
    }

    /// Initialize the backend and apply the committed graph.
    ///
    /// # Errors
    ///
    /// Returns an error when no execution context is available or the
    /// backend fails.
    pub fn execute(&self) -> EngineResult<OperationOutcome> {
        info!(deployment = %self.id(), "executing");
        let mut report = RunReport::new(self.id().clone(), Operation::Execute);
        report.status = Status::Executing;
        let mut record = self.store.load_record()?;
        if self.skip_check(&record, &mut report) {
            return Ok(OperationOutcome::new(report));
        }

        let executor = self.executor()?;
        self.set_phase(&mut record, DeploymentPhase::Applying)?;
        executor.init()?;
        report.output = Some(executor.apply(0)?);
        self.set_phase(&mut record, DeploymentPhase::Applied)?;

        info!(deployment = %self.id(), "executed");
        report.status = Status::Executed;
        report.phase = record.phase;
        Ok(OperationOutcome::new(report))
    }

    /// Destroy the deployed infrastructure. Artifacts stay until cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error when no execution context is available or the
    /// backend fails.
    pub fn undeploy(&self) -> EngineResult<OperationOutcome> {
        info!(deployment = %self.id(), "undeploying");
        let mut report = RunReport::new(self.id().clone(), Operation::Undeploy);
        let mut record = self.store.load_record()?;
        self.undeploy_into(&mut record, &mut report)?;
        Ok(OperationOutcome::new(report))
    }

    /// Translate `descriptor` into staged artifacts and reconcile them with
    /// the committed set.
    ///
    /// # Errors
    ///
    /// Returns an error when translation, promotion or the backend fails.
    pub fn update(&self, descriptor: &Descriptor) -> EngineResult<OperationOutcome> {
        info!(deployment = %self.id(), "updating");
        let mut outcome =
            OperationOutcome::new(RunReport::new(self.id().clone(), Operation::Update));
        let mut output = self.translator.translate(descriptor)?;
        outcome.sensitive_values.clone_from(&output.sensitive_values);
        let mut record = self.store.load_record()?;
        let report = &mut outcome.report;

        let decision = if output.has_providers() {
            report.artifacts = self.store.stage(&mut output)?;
            decide(
                true,
                record.has_committed_artifacts(),
                self.store.graph_differs()?,
                self.store.changed_bootstrap(&output)?,
            )
        } else {
            report.artifacts = self.store.discard_staged(&output)?;
            decide(false, record.has_committed_artifacts(), false, Vec::new())
        };
        debug!(deployment = %self.id(), ?decision, "update decision");

        match decision {
            UpdateDecision::Undeploy => {
                info!(deployment = %self.id(), "all nodes removed; undeploying");
                self.undeploy_into(&mut record, report)?;
                if self.dry_run {
                    report.warnings.push("dry run: cleanup skipped".to_string());
                } else {
                    report.artifacts.extend(self.store.cleanup(&record)?);
                    record = PhaseRecord::new(self.id().clone());
                }
                report.status = Status::UpdatedUndeployed;
            }
            UpdateDecision::Skip => {
                report.status = Status::Skipped;
            }
            UpdateDecision::PromoteGraph => {
                let executor = self.executor_or_discard(&output, report)?;
                report
                    .artifacts
                    .extend(self.store.promote_all(&output, &mut record)?);
                self.apply_update(executor, &mut record, report)?;
                report.status = Status::UpdatedGraph;
            }
            UpdateDecision::PromoteBootstrap(nodes) => {
                let executor = self.executor_or_discard(&output, report)?;
                report
                    .artifacts
                    .extend(self.store.promote_bootstrap(&output, &nodes, &mut record)?);
                self.apply_update(executor, &mut record, report)?;
                report.status = Status::UpdatedBootstrap;
            }
            UpdateDecision::NothingToUpdate => {
                info!(deployment = %self.id(), "no changes in the generated artifacts");
                report.artifacts.extend(self.store.discard_staged(&output)?);
                report.status = Status::UpdatedNothing;
            }
        }

        report.phase = record.phase;
        Ok(outcome)
    }

    /// Remove every artifact the deployment owns.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing artifact cannot be removed.
    pub fn cleanup(&self) -> EngineResult<OperationOutcome> {
        info!(deployment = %self.id(), "cleaning up");
        let mut report = RunReport::new(self.id().clone(), Operation::Cleanup);
        let record = self.store.load_record()?;
        if !record.has_committed_artifacts() {
            info!(deployment = %self.id(), "no committed artifacts; skipping cleanup");
            report.status = Status::Skipped;
            report.phase = record.phase;
            return Ok(OperationOutcome::new(report));
        }

        report.artifacts = self.store.cleanup(&record)?;
        report.phase = DeploymentPhase::NotDeployed;
        Ok(OperationOutcome::new(report))
    }

    fn undeploy_into(&self, record: &mut PhaseRecord, report: &mut RunReport) -> EngineResult<()> {
        report.status = Status::Undeploying;
        if self.skip_check(record, report) {
            return Ok(());
        }

        let executor = self.executor()?;
        self.set_phase(record, DeploymentPhase::Destroying)?;
        report.output = Some(executor.destroy()?);
        self.set_phase(record, DeploymentPhase::Destroyed)?;

        info!(deployment = %self.id(), "undeployed");
        report.status = Status::Undeployed;
        report.phase = record.phase;
        Ok(())
    }

    /// Nothing committed, or dry run: report and tell the caller to stop.
    fn skip_check(&self, record: &PhaseRecord, report: &mut RunReport) -> bool {
        report.phase = record.phase;
        if !record.has_committed_artifacts() {
            info!(deployment = %self.id(), step = %report.status, "no committed graph; skipping");
            report.status = Status::Skipped;
            return true;
        }
        if self.dry_run {
            info!(deployment = %self.id(), step = %report.status, "dry run; backend not called");
            report.status = Status::DryRun;
            return true;
        }
        false
    }

    fn executor(&self) -> Result<&ApplyExecutor, ExecutionError> {
        self.executor.as_ref().ok_or_else(|| ExecutionError::Unavailable {
            label: self.execution_label.clone(),
        })
    }

    /// The executor for an update-driven apply; `None` in dry run. Staged
    /// files are discarded when no executor is available.
    fn executor_or_discard(
        &self,
        output: &TranslationOutput,
        report: &mut RunReport,
    ) -> EngineResult<Option<&ApplyExecutor>> {
        if self.dry_run {
            return Ok(None);
        }
        match self.executor() {
            Ok(executor) => Ok(Some(executor)),
            Err(error) => {
                report.artifacts.extend(self.store.discard_staged(output)?);
                Err(error.into())
            }
        }
    }

    fn apply_update(
        &self,
        executor: Option<&ApplyExecutor>,
        record: &mut PhaseRecord,
        report: &mut RunReport,
    ) -> EngineResult<()> {
        let Some(executor) = executor else {
            report.warnings.push("dry run: apply skipped".to_string());
            return Ok(());
        };
        self.set_phase(record, DeploymentPhase::Applying)?;
        report.output = Some(executor.apply_update()?);
        self.set_phase(record, DeploymentPhase::Applied)?;
        Ok(())
    }

    fn set_phase(&self, record: &mut PhaseRecord, phase: DeploymentPhase) -> EngineResult<()> {
        record.phase = phase;
        self.store.save_record(record)?;
        Ok(())
    }
}
