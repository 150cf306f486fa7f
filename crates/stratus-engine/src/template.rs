use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use stratus_domain::NodeName;

use crate::error::BootstrapError;

const TEMPLATE_NAME: &str = "bootstrap";

/// Worker bootstrap shipped with the binary, used when no template file is
/// configured.
pub const BUILTIN_TEMPLATE: &str = r#"#cloud-config
hostname: {{ worker_name }}
write_files:
  - path: /etc/stratus/master.pem
    permissions: "0644"
    content: {{ master_pem | json_encode() }}
runcmd:
  - stratus:append-here
  - systemctl enable --now stratus-worker
"#;

/// Default bootstrap text for one node, plus any values that must not be
/// echoed back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub content: String,
    pub sensitive_values: BTreeSet<String>,
}

pub trait BootstrapRenderer {
    /// Render the default bootstrap document for `node`.
    ///
    /// # Errors
    ///
    /// Returns an error when the template cannot be rendered.
    fn render_default(&self, node: &NodeName) -> Result<RenderedTemplate, BootstrapError>;
}

/// `tera` renderer exposing `worker_name`, `master_pem` and an `env(name=...)`
/// function to the template.
#[derive(Debug, Clone)]
pub struct TeraBootstrapRenderer {
    template: String,
    master_pem: String,
}

impl TeraBootstrapRenderer {
    #[must_use]
    pub fn new(template: impl Into<String>, master_pem: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            master_pem: master_pem.into(),
        }
    }

    /// Load the template and master certificate from disk. A missing template
    /// path selects [`BUILTIN_TEMPLATE`]; a missing certificate path renders
    /// an empty `master_pem`.
    ///
    /// # Errors
    ///
    /// Returns an error when a configured file cannot be read.
    pub fn from_paths(
        template: Option<&Path>,
        master_cert: Option<&Path>,
    ) -> Result<Self, BootstrapError> {
        let template = match template {
            Some(path) => read_input(path)?,
            None => BUILTIN_TEMPLATE.to_string(),
        };
        let master_pem = match master_cert {
            Some(path) => read_input(path)?,
            None => String::new(),
        };
        Ok(Self::new(template, master_pem))
    }
}

impl BootstrapRenderer for TeraBootstrapRenderer {
    fn render_default(&self, node: &NodeName) -> Result<RenderedTemplate, BootstrapError> {
        let render_error = |source| BootstrapError::Render {
            node: node.clone(),
            source,
        };

        let mut tera = tera::Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, &self.template)
            .map_err(render_error)?;

        let sensitive: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(BTreeSet::new()));
        {
            let sensitive = Arc::clone(&sensitive);
            tera.register_function("env", move |args: &HashMap<String, tera::Value>| {
                let name = args
                    .get("name")
                    .and_then(tera::Value::as_str)
                    .ok_or_else(|| tera::Error::msg("env() requires a `name` string argument"))?;

                std::env::var(name).map_or_else(
                    |_| {
                        Err(tera::Error::msg(format!(
                            "env(name=\"{name}\") is not set in the current environment"
                        )))
                    },
                    |value| {
                        lock_sensitive_values(&sensitive)?.insert(value.clone());
                        Ok(tera::Value::String(value))
                    },
                )
            });
        }

        let mut context = tera::Context::new();
        context.insert("worker_name", node.as_str());
        context.insert("master_pem", &self.master_pem);
        let content = tera.render(TEMPLATE_NAME, &context).map_err(render_error)?;
        let sensitive_values = lock_sensitive_values(&sensitive)
            .map_err(render_error)?
            .clone();

        Ok(RenderedTemplate {
            content,
            sensitive_values,
        })
    }
}

fn read_input(path: &Path) -> Result<String, BootstrapError> {
    std::fs::read_to_string(path).map_err(|source| BootstrapError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn lock_sensitive_values(
    sensitive: &Arc<Mutex<BTreeSet<String>>>,
) -> tera::Result<std::sync::MutexGuard<'_, BTreeSet<String>>> {
    sensitive
        .lock()
        .map_err(|_| tera::Error::msg("internal error: sensitive value collector lock poisoned"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::error::Error;

    use stratus_domain::NodeName;

    use super::{BUILTIN_TEMPLATE, BootstrapRenderer, TeraBootstrapRenderer};

    fn node(name: &str) -> NodeName {
        NodeName::try_from(name).expect("node name")
    }

    #[test]
    fn builtin_template_renders_worker_name_and_certificate() {
        let renderer = TeraBootstrapRenderer::new(BUILTIN_TEMPLATE, "-----BEGIN-----\nabc\n");
        let rendered = renderer.render_default(&node("worker")).expect("render");

        assert!(rendered.content.contains("hostname: worker"));
        assert!(rendered.content.contains(r#""-----BEGIN-----\nabc\n""#));
        assert!(rendered.sensitive_values.is_empty());
    }

    #[test]
    fn env_function_values_are_sensitive() {
        let path = std::env::var("PATH").expect("PATH should be set");
        let renderer = TeraBootstrapRenderer::new("path: {{ env(name=\"PATH\") }}", "");
        let rendered = renderer.render_default(&node("worker")).expect("render");
        assert_eq!(rendered.content, format!("path: {path}"));
        assert!(rendered.sensitive_values.contains(&path));
    }

    #[test]
    fn env_function_reports_unset_variable() {
        let renderer =
            TeraBootstrapRenderer::new("{{ env(name=\"STRATUS_MISSING_XYZ\") }}", "");
        let error = renderer
            .render_default(&node("worker"))
            .expect_err("should fail");

        let mut full = error.to_string();
        let mut current: &dyn Error = &error;
        while let Some(source) = current.source() {
            full.push_str(": ");
            full.push_str(&source.to_string());
            current = source;
        }
        assert!(
            full.contains("STRATUS_MISSING_XYZ"),
            "unexpected error chain: {full}"
        );
    }

    #[test]
    fn from_paths_reads_template_and_certificate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let template = temp.path().join("worker.yaml");
        let cert = temp.path().join("master.pem");
        std::fs::write(&template, "name: {{ worker_name }}\npem: {{ master_pem }}\n")
            .expect("write template");
        std::fs::write(&cert, "CERT").expect("write cert");

        let renderer =
            TeraBootstrapRenderer::from_paths(Some(&template), Some(&cert)).expect("renderer");
        let rendered = renderer.render_default(&node("db")).expect("render");
        assert!(rendered.content.starts_with("name: db\npem: CERT"));
    }

    #[test]
    fn from_paths_reports_missing_template() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = TeraBootstrapRenderer::from_paths(Some(&temp.path().join("nope")), None)
            .expect_err("missing template must fail");
        assert!(error.to_string().contains("failed to read bootstrap input"));
    }
}
