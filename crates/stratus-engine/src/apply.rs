use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ExecutionError;

type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Output fragments the backend prints while another run holds the state lock.
const LOCK_SIGNATURES: [&str; 2] = ["Error locking state", "Error acquiring the state lock"];

/// Exit code and combined output of one backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: String,
}

/// Somewhere the apply backend can be run.
pub trait ExecutionContext {
    fn label(&self) -> &str;

    /// Run the backend with `args` in `workdir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot be started at all. A backend
    /// that starts and fails is reported through [`ExecOutput::exit_code`].
    fn exec(&self, args: &[&str], workdir: &Path) -> io::Result<ExecOutput>;
}

/// Runs a backend binary on this host through `sh -c`, with stderr folded
/// into stdout so the output keeps its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProcessContext {
    label: String,
    program: PathBuf,
}

impl LocalProcessContext {
    #[must_use]
    pub fn new(label: impl Into<String>, program: PathBuf) -> Self {
        Self {
            label: label.into(),
            program,
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ExecutionContext for LocalProcessContext {
    fn label(&self) -> &str {
        &self.label
    }

    fn exec(&self, args: &[&str], workdir: &Path) -> io::Result<ExecOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(r#""$0" "$@" 2>&1"#)
            .arg(&self.program)
            .args(args)
            .current_dir(workdir)
            .output()?;

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        for line in text.lines() {
            debug!(target: "stratus::backend", "{line}");
        }
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: text,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Wait between two attempts while the state lock is held.
    pub poll_interval: Duration,
    /// Lock retries allowed for an apply driven by an update.
    pub update_lock_attempts: u32,
    /// Lock retries allowed for a destroy.
    pub destroy_lock_attempts: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            update_lock_attempts: 60,
            destroy_lock_attempts: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Init,
    Apply,
    Destroy,
}

impl Step {
    const fn args(self) -> &'static [&'static str] {
        match self {
            Self::Init => &["init", "-input=false"],
            Self::Apply => &["apply", "-auto-approve", "-input=false"],
            Self::Destroy => &["destroy", "-auto-approve", "-input=false"],
        }
    }

    const fn marker(self) -> &'static str {
        match self {
            Self::Init => "successfully initialized",
            Self::Apply => "Apply complete",
            Self::Destroy => "Destroy complete",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        }
    }
}

/// Drives init, apply and destroy through an execution context.
pub struct ApplyExecutor {
    context: Box<dyn ExecutionContext>,
    workdir: PathBuf,
    settings: ExecutorSettings,
}

impl ApplyExecutor {
    #[must_use]
    pub fn new(
        context: Box<dyn ExecutionContext>,
        workdir: PathBuf,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            context,
            workdir,
            settings,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.context.label()
    }

    /// Initialize the backend. Lock contention is not retried.
    ///
    /// # Errors
    ///
    /// Returns an error when the run fails or does not report success.
    pub fn init(&self) -> ExecutionResult<String> {
        self.run(Step::Init, 0)
    }

    /// Apply the committed graph.
    ///
    /// # Errors
    ///
    /// Returns an error when the run fails, does not report success, or the
    /// state lock stays held past `lock_attempts` retries.
    pub fn apply(&self, lock_attempts: u32) -> ExecutionResult<String> {
        self.run(Step::Apply, lock_attempts)
    }

    /// Apply with the lock budget reserved for updates.
    ///
    /// # Errors
    ///
    /// See [`ApplyExecutor::apply`].
    pub fn apply_update(&self) -> ExecutionResult<String> {
        self.apply(self.settings.update_lock_attempts)
    }

    /// Destroy everything the committed graph created.
    ///
    /// # Errors
    ///
    /// Returns an error when the run fails, does not report success, or the
    /// state lock stays held past the destroy budget.
    pub fn destroy(&self) -> ExecutionResult<String> {
        self.run(Step::Destroy, self.settings.destroy_lock_attempts)
    }

    fn run(&self, step: Step, lock_attempts: u32) -> ExecutionResult<String> {
        let args = step.args();
        let command = format!("{} {}", self.context.label(), args.join(" "));
        let mut remaining = lock_attempts;
        info!(%command, workdir = %self.workdir.display(), "running backend");

        loop {
            let result = self
                .context
                .exec(args, &self.workdir)
                .map_err(|source| ExecutionError::Spawn {
                    command: command.clone(),
                    source,
                })?;

            let contended = LOCK_SIGNATURES
                .iter()
                .any(|signature| result.output.contains(signature));
            if contended && remaining > 0 {
                remaining -= 1;
                warn!(
                    %command,
                    remaining,
                    wait_secs = self.settings.poll_interval.as_secs(),
                    "state lock held; waiting"
                );
                std::thread::sleep(self.settings.poll_interval);
                continue;
            }
            if contended && lock_attempts > 0 {
                error!(%command, "state lock still held; giving up");
                return Err(ExecutionError::LockTimeout {
                    command,
                    output: result.output,
                });
            }
            if result.exit_code != 0 {
                error!(%command, exit_code = result.exit_code, "backend run failed");
                return Err(ExecutionError::CommandFailed {
                    command,
                    exit_code: result.exit_code,
                    output: result.output,
                });
            }
            if !result.output.contains(step.marker()) {
                error!(%command, marker = step.marker(), "backend did not report success");
                return Err(ExecutionError::MissingSuccessMarker {
                    command,
                    marker: step.marker(),
                    output: result.output,
                });
            }

            debug!(step = step.label(), "backend run succeeded");
            return Ok(result.output);
        }
    }
}
