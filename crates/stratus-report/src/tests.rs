#![allow(clippy::expect_used)]

use std::collections::BTreeSet;
use std::path::PathBuf;

use stratus_domain::{
    ArtifactAction, ArtifactChange, ArtifactKind, DeploymentId, DeploymentPhase, NodeName,
    Operation, RunReport, Status,
};

use super::{ColorChoice, OutputFormat, RenderOptions, redact_sensitive, render_report};

#[test]
fn redact_basic_replacement() {
    let mut sensitive = BTreeSet::new();
    sensitive.insert("my-secret-token".to_string());
    let input = "token is my-secret-token here";
    assert_eq!(
        redact_sensitive(input, &sensitive),
        "token is [REDACTED] here"
    );
}

#[test]
fn redact_short_value_skipped() {
    let mut sensitive = BTreeSet::new();
    sensitive.insert("ab".to_string());
    sensitive.insert("x".to_string());
    let input = "ab and x remain";
    assert_eq!(redact_sensitive(input, &sensitive), input);
}

#[test]
fn redact_longest_value_first() {
    let mut sensitive = BTreeSet::new();
    sensitive.insert("secret".to_string());
    sensitive.insert("secret-extended".to_string());
    assert_eq!(
        redact_sensitive("value=secret-extended", &sensitive),
        "value=[REDACTED]"
    );
}

fn base_options() -> RenderOptions {
    RenderOptions {
        color: ColorChoice::Never,
        verbose: false,
    }
}

fn verbose_options() -> RenderOptions {
    RenderOptions {
        color: ColorChoice::Never,
        verbose: true,
    }
}

fn change(kind: ArtifactKind, file: &str, action: ArtifactAction) -> ArtifactChange {
    ArtifactChange {
        kind,
        path: PathBuf::from("/srv/artifacts").join(file),
        action,
    }
}

fn make_report(operation: Operation, status: Status) -> RunReport {
    let mut report = RunReport::new(DeploymentId::try_from("demo").expect("id"), operation);
    report.status = status;
    report
}

fn worker() -> NodeName {
    NodeName::try_from("worker").expect("node")
}

#[test]
fn translate_lists_written_artifacts() {
    let mut report = make_report(Operation::Translate, Status::Translated);
    report.phase = DeploymentPhase::Committed;
    report.artifacts = vec![
        change(ArtifactKind::Graph, "demo.tf.json", ArtifactAction::Written),
        change(
            ArtifactKind::Bootstrap { node: worker() },
            "worker-cloud-init.yaml",
            ArtifactAction::Written,
        ),
    ];

    let rendered =
        render_report(&report, OutputFormat::Text, &base_options()).expect("render text");

    assert!(rendered.starts_with("translate demo\n"));
    assert!(rendered.contains("Translated (phase: committed)"));
    assert!(rendered.contains("+ written     demo.tf.json (resource graph)"));
    assert!(rendered.contains("worker-cloud-init.yaml (bootstrap for worker)"));
    assert!(rendered.contains("Artifacts: 2 written"));
}

#[test]
fn staged_files_are_summarized_unless_verbose() {
    let mut report = make_report(Operation::Update, Status::UpdatedNothing);
    report.artifacts = vec![
        change(ArtifactKind::Graph, "demo.tf.json.tmp", ArtifactAction::Staged),
        change(ArtifactKind::Graph, "demo.tf.json.tmp", ArtifactAction::Discarded),
    ];

    let normal = render_report(&report, OutputFormat::Text, &base_options()).expect("render");
    assert!(normal.contains("Updated (nothing to update)"));
    assert!(normal.contains("2 staged file(s) handled"));
    assert!(!normal.contains("discarded"));
    assert!(normal.contains("Artifacts: unchanged"));

    let verbose = render_report(&report, OutputFormat::Text, &verbose_options()).expect("render");
    assert!(verbose.contains(". staged      demo.tf.json.tmp"));
    assert!(verbose.contains(". discarded   demo.tf.json.tmp"));
}

#[test]
fn backend_output_is_summarized_to_last_line() {
    let mut report = make_report(Operation::Execute, Status::Executed);
    report.output = Some("Plan: 1 to add\n\nApply complete! Resources: 1 added.\n\n".to_string());

    let normal = render_report(&report, OutputFormat::Text, &base_options()).expect("render");
    assert!(normal.contains("backend (4 lines): Apply complete! Resources: 1 added."));
    assert!(!normal.contains("Plan: 1 to add"));

    let verbose = render_report(&report, OutputFormat::Text, &verbose_options()).expect("render");
    assert!(verbose.contains("    Plan: 1 to add"));
}

#[test]
fn warnings_render_before_artifacts() {
    let mut report = make_report(Operation::Update, Status::UpdatedGraph);
    report.warnings = vec!["dry run: apply skipped".to_string()];
    report.artifacts = vec![change(
        ArtifactKind::Graph,
        "demo.tf.json",
        ArtifactAction::Promoted,
    )];

    let rendered = render_report(&report, OutputFormat::Text, &base_options()).expect("render");
    let warn_index = rendered.find("warn: dry run").expect("warning line");
    let artifact_index = rendered.find("~ promoted").expect("artifact line");
    assert!(warn_index < artifact_index);
    assert!(rendered.contains("Artifacts: 1 promoted"));
}

#[test]
fn cleanup_tallies_removed_files() {
    let mut report = make_report(Operation::Cleanup, Status::Init);
    report.artifacts = vec![
        change(ArtifactKind::Graph, "demo.tf.json", ArtifactAction::Removed),
        change(
            ArtifactKind::BackendState,
            "terraform.tfstate",
            ArtifactAction::Removed,
        ),
    ];

    let rendered = render_report(&report, OutputFormat::Text, &base_options()).expect("render");
    assert!(rendered.contains("- removed     terraform.tfstate (backend state)"));
    assert!(rendered.contains("Artifacts: 2 removed"));
}

#[test]
fn color_always_emits_ansi_codes() {
    let report = make_report(Operation::Execute, Status::DryRun);
    let options = RenderOptions {
        color: ColorChoice::Always,
        verbose: false,
    };
    let rendered = render_report(&report, OutputFormat::Text, &options).expect("render");
    assert!(rendered.contains('\u{1b}'));
    assert!(rendered.contains("DRY-RUN Deployment"));
}

#[test]
fn json_output_is_the_serialized_report() {
    let mut report = make_report(Operation::Undeploy, Status::Undeployed);
    report.phase = DeploymentPhase::Destroyed;

    let rendered = render_report(&report, OutputFormat::Json, &base_options()).expect("render");
    let value: serde_json::Value = serde_json::from_str(&rendered).expect("parse");
    assert_eq!(value["deployment"], "demo");
    assert_eq!(value["operation"], "undeploy");
    assert_eq!(value["status"], "undeployed");
    assert_eq!(value["phase"], "destroyed");
}
