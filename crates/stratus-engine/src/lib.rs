mod apply;
mod bootstrap;
mod config;
mod credentials;
mod deployment;
mod descriptor;
mod discovery;
mod error;
mod fs_util;
mod graph;
mod layout;
mod providers;
mod reconcile;
mod state;
mod template;
mod translate;

pub use apply::{
    ApplyExecutor, ExecOutput, ExecutionContext, ExecutorSettings, LocalProcessContext,
};
pub use bootstrap::{
    APPEND_ANCHOR, CLOUD_CONFIG_HEADER, ResolvedBootstrap, resolve as resolve_bootstrap,
};
pub use config::{CONFIG_ENV, Settings};
pub use credentials::{CredentialRecord, CredentialStore, StaticCredentials};
pub use deployment::{Deployment, OperationOutcome};
pub use descriptor::load_descriptor;
pub use discovery::{ContextLocator, DiscoveryPolicy, PathLocator, discover_with_retry};
pub use error::{
    ArtifactError, BootstrapError, ConfigError, CredentialError, DescriptorError,
    DiscoveryError, EngineError, ExecutionError, ScopeConflict, ValidationError,
};
pub use graph::{GENERATED_MARKER, InstanceVars, ResourceGraph};
pub use layout::ArtifactLayout;
pub use providers::{
    AwsMapper, AzureMapper, CloudMapper, GceMapper, MapOutcome, MapperRegistry, NodeContext,
    OpenStackMapper, SERVICE_ACCOUNT_FILE,
};
pub use reconcile::{ArtifactStore, UpdateDecision, decide};
pub use state::PhaseStore;
pub use template::{BUILTIN_TEMPLATE, BootstrapRenderer, RenderedTemplate, TeraBootstrapRenderer};
pub use translate::{TranslationOutput, Translator};
