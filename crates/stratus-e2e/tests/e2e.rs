#![allow(clippy::expect_used)]

use std::fs;
use std::path::{Path, PathBuf};

use stratus_e2e::harness::{RunResult, run_stratus, write_config, write_file};
use tempfile::TempDir;

const ONE_NODE: &str = r"
nodes:
  - name: worker
    cloud: ec2
    properties:
      region_name: us-east-1
      image_id: ami-123
      instance_type: t2.micro
";

const TWO_NODES: &str = r"
nodes:
  - name: worker
    cloud: ec2
    properties:
      region_name: us-east-1
      image_id: ami-123
      instance_type: t2.micro
  - name: db
    cloud: ec2
    properties:
      region_name: us-east-1
      image_id: ami-456
      instance_type: t2.small
";

struct Workspace {
    temp: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().expect("tempdir");
        let config = write_config(temp.path()).expect("write config");
        Self { temp, config }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn artifacts(&self) -> PathBuf {
        self.root().join("artifacts")
    }

    fn descriptor(&self, content: &str) -> PathBuf {
        let path = self.root().join("descriptor.yaml");
        write_file(&path, content).expect("write descriptor");
        path
    }

    fn run(&self, command: &str, extra: &[&str]) -> RunResult {
        let config = self.config.display().to_string();
        let mut args = vec![
            command,
            "--id",
            "demo",
            "--config",
            config.as_str(),
            "--color",
            "never",
        ];
        args.extend_from_slice(extra);
        let output = run_stratus(self.root(), &args, &[]).expect("run stratus");
        println!("{}", output.transcript());
        output
    }

    fn run_with_descriptor(&self, command: &str, content: &str, extra: &[&str]) -> RunResult {
        let descriptor = self.descriptor(content).display().to_string();
        let mut args = vec!["--descriptor", descriptor.as_str()];
        args.extend_from_slice(extra);
        self.run(command, &args)
    }

    fn staged_files(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.artifacts()) else {
            return Vec::new();
        };
        entries
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }
}

#[test]
fn translate_writes_graph_and_bootstrap() {
    let workspace = Workspace::new();
    let output = workspace.run_with_descriptor("translate", ONE_NODE, &[]);

    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.contains("Translated"));
    assert!(output.stdout.contains("demo.tf.json"));
    assert!(!output.stdout.contains("e2e-secret-key"));

    let graph: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(workspace.artifacts().join("demo.tf.json")).expect("read graph"),
    )
    .expect("graph is json");
    assert!(graph.get("provider").is_some());
    assert!(workspace.artifacts().join("worker-cloud-init.yaml").exists());
    assert!(workspace.artifacts().join("terraform.tfvars.json").exists());
}

#[test]
fn underscore_in_node_name_fails_without_writing() {
    let workspace = Workspace::new();
    let output = workspace.run_with_descriptor(
        "translate",
        &ONE_NODE.replace("name: worker", "name: worker_1"),
        &[],
    );

    assert_eq!(output.exit_code, 1);
    assert!(
        output
            .stderr
            .contains("underscores in node worker_1 not allowed")
    );
    assert!(!workspace.artifacts().join("demo.tf.json").exists());
}

#[test]
fn validate_writes_nothing() {
    let workspace = Workspace::new();
    let output = workspace.run_with_descriptor("translate", ONE_NODE, &["--validate"]);

    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.contains("Translated"));
    assert!(!workspace.artifacts().exists());
}

#[test]
fn json_format_prints_the_report() {
    let workspace = Workspace::new();
    let output = workspace.run_with_descriptor("translate", ONE_NODE, &["--format", "json"]);

    assert_eq!(output.exit_code, 0);
    let report: serde_json::Value = serde_json::from_str(&output.stdout).expect("report json");
    assert_eq!(report["operation"], "translate");
    assert_eq!(report["status"], "translated");
    assert_eq!(report["phase"], "committed");
}

#[test]
fn unchanged_update_needs_no_backend() {
    let workspace = Workspace::new();
    assert_eq!(
        workspace
            .run_with_descriptor("translate", ONE_NODE, &[])
            .exit_code,
        0
    );

    let output = workspace.run_with_descriptor("update", ONE_NODE, &[]);

    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.contains("Updated (nothing to update)"));
    assert!(workspace.staged_files().is_empty());
}

#[test]
fn changed_update_without_backend_fails_and_discards_staged_files() {
    let workspace = Workspace::new();
    assert_eq!(
        workspace
            .run_with_descriptor("translate", ONE_NODE, &[])
            .exit_code,
        0
    );
    let committed =
        fs::read(workspace.artifacts().join("demo.tf.json")).expect("read committed graph");

    let output = workspace.run_with_descriptor("update", TWO_NODES, &[]);

    assert_eq!(output.exit_code, 1);
    assert!(output.stderr.contains("unavailable"));
    assert!(workspace.staged_files().is_empty());
    assert_eq!(
        fs::read(workspace.artifacts().join("demo.tf.json")).expect("read graph"),
        committed
    );
}

#[test]
fn dry_run_execute_reports_without_backend() {
    let workspace = Workspace::new();
    assert_eq!(
        workspace
            .run_with_descriptor("translate", ONE_NODE, &[])
            .exit_code,
        0
    );

    let output = workspace.run("execute", &["--dry-run"]);

    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.contains("DRY-RUN Deployment"));
}

#[test]
fn execute_before_translate_is_skipped() {
    let workspace = Workspace::new();
    let output = workspace.run("execute", &[]);

    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.contains("Skipped"));
}

#[test]
fn cleanup_removes_generated_files() {
    let workspace = Workspace::new();
    assert_eq!(
        workspace
            .run_with_descriptor("translate", ONE_NODE, &[])
            .exit_code,
        0
    );
    write_file(&workspace.artifacts().join("terraform.tfstate"), "{}").expect("state");

    let output = workspace.run("cleanup", &[]);

    assert_eq!(output.exit_code, 0);
    assert!(output.stdout.contains("removed"));
    assert!(!workspace.artifacts().join("demo.tf.json").exists());
    assert!(!workspace.artifacts().join("terraform.tfstate").exists());
    assert!(!workspace.artifacts().join("worker-cloud-init.yaml").exists());
}
