// Target-specific transitive dependency split (mio/crossterm stack) is accepted for now.
#![allow(clippy::multiple_crate_versions)]

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use minus::{ExitStrategy, Pager, page_all};
use stratus_domain::{DeploymentId, TranslateMode};
use stratus_engine::{
    ApplyExecutor, ArtifactLayout, ArtifactStore, Deployment, MapperRegistry, OperationOutcome,
    PathLocator, Settings, StaticCredentials, TeraBootstrapRenderer, Translator,
    discover_with_retry, load_descriptor,
};
use stratus_report::{ColorChoice, OutputFormat, RenderOptions, redact_sensitive, render_report};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod error;

pub use error::CliError;

#[derive(Debug, Parser)]
#[command(
    name = "stratus",
    about = "Translate deployment descriptors into cloud infrastructure"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Translate a descriptor into a resource graph and bootstrap files.
    Translate {
        #[command(flatten)]
        target: DescriptorArgs,
        /// Validate only; nothing is written.
        #[arg(long, conflicts_with = "update")]
        validate: bool,
        /// Write staged files next to the committed ones.
        #[arg(long)]
        update: bool,
        #[command(flatten)]
        render: RenderFlags,
    },
    /// Initialize the backend and apply the committed graph.
    Execute {
        #[command(flatten)]
        target: DeploymentArgs,
        #[command(flatten)]
        render: RenderFlags,
    },
    /// Destroy the deployed infrastructure.
    Undeploy {
        #[command(flatten)]
        target: DeploymentArgs,
        #[command(flatten)]
        render: RenderFlags,
    },
    /// Reconcile a changed descriptor with the committed deployment.
    Update {
        #[command(flatten)]
        target: DescriptorArgs,
        #[command(flatten)]
        render: RenderFlags,
    },
    /// Remove every artifact of a deployment.
    Cleanup {
        #[command(flatten)]
        target: DeploymentArgs,
        #[command(flatten)]
        render: RenderFlags,
    },
}

#[derive(Debug, Clone, Args)]
struct DeploymentArgs {
    /// Deployment identifier; artifact file names derive from it.
    #[arg(long)]
    id: String,
    /// Config file; `STRATUS_CONFIG` or the user config dir otherwise.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Report what would run without calling the backend.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct DescriptorArgs {
    /// Deployment descriptor (YAML, or JSON by extension).
    #[arg(long)]
    descriptor: PathBuf,
    #[command(flatten)]
    deployment: DeploymentArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Args)]
struct RenderFlags {
    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    format: FormatArg,
    #[arg(long, value_enum, default_value_t = ColorArg::Auto)]
    color: ColorArg,
    #[arg(long)]
    verbose: bool,
}

impl RenderFlags {
    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            color: self.color.into(),
            verbose: self.verbose,
        }
    }
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

impl From<ColorArg> for ColorChoice {
    fn from(value: ColorArg) -> Self {
        match value {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Whether an operation needs the apply backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Unused,
    Required,
}

/// Everything an operation borrows from, resolved once per invocation.
struct Session {
    settings: Settings,
    id: DeploymentId,
    dry_run: bool,
    registry: MapperRegistry,
    credentials: StaticCredentials,
    renderer: TeraBootstrapRenderer,
}

impl Session {
    fn open(args: &DeploymentArgs) -> std::result::Result<Self, CliError> {
        let settings = Settings::resolve(args.config.as_deref())?;
        let id = DeploymentId::new(args.id.clone())?;
        let credentials = match &settings.auth_data_file {
            Some(path) => StaticCredentials::load(path)?,
            None => StaticCredentials::new(),
        };
        let renderer = TeraBootstrapRenderer::from_paths(
            settings.bootstrap_template.as_deref(),
            settings.master_cert.as_deref(),
        )?;
        let dry_run = args.dry_run || settings.dry_run;
        debug!(deployment = %id, root = %settings.artifact_root.display(), dry_run, "session opened");

        Ok(Self {
            settings,
            id,
            dry_run,
            registry: MapperRegistry::builtin(),
            credentials,
            renderer,
        })
    }

    fn deployment(&self, backend: Backend) -> Deployment<'_> {
        let translator = Translator::new(&self.registry, &self.credentials, &self.renderer);
        let store = ArtifactStore::new(
            ArtifactLayout::new(&self.settings.artifact_root, self.id.clone()),
            self.settings.gce_auth_file.clone(),
        );
        let executor = if backend == Backend::Required && !self.dry_run {
            self.discover()
        } else {
            None
        };
        Deployment::new(translator, store, self.settings.execution_label.clone())
            .with_executor(executor)
            .with_dry_run(self.dry_run)
    }

    /// A missing context only disables the steps that need it.
    fn discover(&self) -> Option<ApplyExecutor> {
        let label = &self.settings.execution_label;
        match discover_with_retry(&PathLocator, label, self.settings.discovery_policy()) {
            Ok(context) => Some(ApplyExecutor::new(
                context,
                self.settings.workdir().to_path_buf(),
                self.settings.executor_settings(),
            )),
            Err(error) => {
                warn!(%error, "apply backend unavailable");
                None
            }
        }
    }

    fn sensitive_values(&self) -> BTreeSet<String> {
        self.credentials.secret_values().into_iter().collect()
    }
}

/// Run the CLI using process arguments.
///
/// # Errors
///
/// Returns an error when argument parsing fails (excluding help/version) or command
/// execution fails.
pub fn run() -> std::result::Result<i32, CliError> {
    run_from(std::env::args_os())
}

fn run_from<I, T>(args: I) -> std::result::Result<i32, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(parsed) => parsed,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(error.into()),
        },
    };

    match cli.command {
        Commands::Translate {
            target,
            validate,
            update,
            render,
        } => {
            init_tracing(render.verbose);
            let mode = if validate {
                TranslateMode::Validate
            } else if update {
                TranslateMode::Update
            } else {
                TranslateMode::Build
            };
            let descriptor = load_descriptor(&target.descriptor)?;
            let session = Session::open(&target.deployment)?;
            let result = session
                .deployment(Backend::Unused)
                .translate(&descriptor, mode);
            finish(&session, result, &render)
        }
        Commands::Execute { target, render } => {
            init_tracing(render.verbose);
            let session = Session::open(&target)?;
            let result = session.deployment(Backend::Required).execute();
            finish(&session, result, &render)
        }
        Commands::Undeploy { target, render } => {
            init_tracing(render.verbose);
            let session = Session::open(&target)?;
            let result = session.deployment(Backend::Required).undeploy();
            finish(&session, result, &render)
        }
        Commands::Update { target, render } => {
            init_tracing(render.verbose);
            let descriptor = load_descriptor(&target.descriptor)?;
            let session = Session::open(&target.deployment)?;
            let result = session.deployment(Backend::Required).update(&descriptor);
            finish(&session, result, &render)
        }
        Commands::Cleanup { target, render } => {
            init_tracing(render.verbose);
            let session = Session::open(&target)?;
            let result = session.deployment(Backend::Unused).cleanup();
            finish(&session, result, &render)
        }
    }
}

/// Render the outcome, or turn the engine error into a redacted one.
fn finish(
    session: &Session,
    result: std::result::Result<OperationOutcome, stratus_engine::EngineError>,
    render: &RenderFlags,
) -> std::result::Result<i32, CliError> {
    let mut sensitive_values = session.sensitive_values();
    let outcome = result.map_err(|error| CliError::operation(&error, &sensitive_values))?;
    sensitive_values.extend(outcome.sensitive_values);

    let format: OutputFormat = render.format.into();
    let rendered = render_report(&outcome.report, format, &render.render_options())?;
    emit_output(&rendered, format, &sensitive_values);
    Ok(0)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn emit_output(rendered: &str, format: OutputFormat, sensitive_values: &BTreeSet<String>) {
    let redacted = redact_sensitive(rendered, sensitive_values);

    if format == OutputFormat::Text && should_use_pager() && page_output(&redacted).is_ok() {
        return;
    }

    if redacted.ends_with('\n') {
        print!("{redacted}");
    } else {
        println!("{redacted}");
    }
}

fn should_use_pager() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_PAGER").is_none()
}

fn page_output(rendered: &str) -> std::result::Result<(), minus::MinusError> {
    let pager = Pager::new();
    pager.set_exit_strategy(ExitStrategy::PagerQuit)?;
    pager.set_text(rendered)?;
    page_all(pager)
}
