use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

static BUILD_STRATUS: OnceLock<Result<(), String>> = OnceLock::new();

/// Program name that is never on `PATH`, so apply-class steps find no backend.
pub const MISSING_BACKEND: &str = "stratus-e2e-missing-backend";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub command_line: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    #[must_use]
    pub fn transcript(&self) -> String {
        format!(
            "$ {}\n[exit: {}]\n[stdout]\n{}[stderr]\n{}",
            self.command_line, self.exit_code, self.stdout, self.stderr
        )
    }
}

/// Run the `stratus` binary with `args` from `workdir`.
///
/// `NO_PAGER=1` is always set to keep output deterministic for assertions,
/// and `STRATUS_CONFIG` is cleared unless `env_overrides` sets it.
///
/// # Errors
///
/// Returns an error if building/running the `stratus` binary fails.
pub fn run_stratus(
    workdir: &Path,
    args: &[&str],
    env_overrides: &[(String, String)],
) -> Result<RunResult, String> {
    ensure_stratus_built()?;
    let bin = stratus_bin()?;

    let mut command = Command::new(bin);
    command.current_dir(workdir);
    command.env("NO_PAGER", "1");
    command.env_remove("STRATUS_CONFIG");
    command.env_remove("RUST_LOG");
    command.args(args);

    let mut command_parts = vec!["stratus".to_string()];
    command_parts.extend(args.iter().map(|arg| (*arg).to_string()));

    for (name, value) in env_overrides {
        command.env(name, value);
    }

    let output = command
        .output()
        .map_err(|error| format!("failed to run stratus: {error}"))?;

    Ok(RunResult {
        command_line: command_parts.join(" "),
        exit_code: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Write a text file, creating parent directories if needed.
///
/// # Errors
///
/// Returns an error if directories or file contents cannot be written.
pub fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// Write a config file under `root` pointing artifacts at `root/artifacts`,
/// with AWS credentials and a single-attempt discovery of a missing backend.
///
/// # Errors
///
/// Returns an error if a file cannot be written.
pub fn write_config(root: &Path) -> std::io::Result<PathBuf> {
    write_file(
        &root.join("auth.yaml"),
        "resource:\n  - type: ec2\n    auth_data:\n      accesskey: AKIAE2E\n      secretkey: e2e-secret-key\n",
    )?;
    let config = root.join("config.yaml");
    write_file(
        &config,
        &format!(
            "artifact_root: artifacts\nauth_data_file: auth.yaml\nexecution_label: {MISSING_BACKEND}\ndiscovery_attempts: 1\ndiscovery_backoff_secs: 0\n"
        ),
    )?;
    Ok(config)
}

fn ensure_stratus_built() -> Result<(), String> {
    match BUILD_STRATUS.get_or_init(|| {
        let status = Command::new("cargo")
            .arg("build")
            .arg("-q")
            .arg("-p")
            .arg("stratus")
            .status()
            .map_err(|error| format!("failed to build stratus binary: {error}"))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!(
                "failed to build stratus binary: cargo exited with status {status}"
            ))
        }
    }) {
        Ok(()) => Ok(()),
        Err(error) => Err(error.clone()),
    }
}

fn stratus_bin() -> Result<PathBuf, String> {
    let mut path = std::env::current_exe()
        .map_err(|error| format!("failed to determine current executable: {error}"))?;
    if !path.pop() {
        return Err("failed to resolve test executable directory".to_string());
    }
    if path.ends_with("deps") {
        let _ = path.pop();
    }
    Ok(path.join(format!("stratus{}", std::env::consts::EXE_SUFFIX)))
}
