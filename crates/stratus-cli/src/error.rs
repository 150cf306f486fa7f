use std::collections::BTreeSet;
use std::error::Error as _;

use stratus_report::redact_sensitive;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    ArgumentParse(#[from] clap::Error),
    #[error(transparent)]
    Config(#[from] stratus_engine::ConfigError),
    #[error(transparent)]
    Descriptor(#[from] stratus_engine::DescriptorError),
    #[error(transparent)]
    Credentials(#[from] stratus_engine::CredentialError),
    #[error(transparent)]
    Bootstrap(#[from] stratus_engine::BootstrapError),
    #[error(transparent)]
    Deployment(#[from] stratus_domain::DomainValidationError),
    /// An engine failure with its cause chain flattened and secrets masked.
    #[error("{message}")]
    Operation { message: String },
    #[error(transparent)]
    Report(#[from] stratus_report::ReportError),
}

impl CliError {
    pub(crate) fn operation(
        error: &stratus_engine::EngineError,
        sensitive_values: &BTreeSet<String>,
    ) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !message.contains(&cause_text) {
                message.push_str(": ");
                message.push_str(&cause_text);
            }
            source = cause.source();
        }
        Self::Operation {
            message: redact_sensitive(&message, sensitive_values),
        }
    }
}
