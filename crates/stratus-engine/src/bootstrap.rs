use std::collections::BTreeSet;

use serde_yaml::{Mapping, Value};
use stratus_domain::{BootstrapContext, BootstrapMode, NodeName};
use tracing::{debug, warn};

use crate::error::{BootstrapError, EngineError, ValidationError};
use crate::template::BootstrapRenderer;

/// Sequence item marking where appended user items go. Never emitted.
pub const APPEND_ANCHOR: &str = "stratus:append-here";

pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config";

/// Final bootstrap document for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBootstrap {
    pub content: String,
    pub sensitive_values: BTreeSet<String>,
}

/// Produce the bootstrap document for `node` from the default template and
/// the node's bootstrap context.
///
/// | mode | config | result |
/// |------|--------|--------|
/// | default | any | default template |
/// | append | present | default template with user sections merged in |
/// | append | absent | validation error |
/// | override | present | user config only |
/// | override | absent | default template |
///
/// # Errors
///
/// Returns a validation error for append without config or unparsable user
/// config, and a bootstrap error when the default template fails.
pub fn resolve(
    renderer: &dyn BootstrapRenderer,
    node: &NodeName,
    context: Option<&BootstrapContext>,
) -> Result<ResolvedBootstrap, EngineError> {
    let mode = context.map(|context| context.mode).unwrap_or_default();
    let config = context
        .and_then(|context| context.cloud_config.as_deref())
        .filter(|config| !config.trim().is_empty());
    debug!(%node, ?mode, has_config = config.is_some(), "resolving bootstrap");

    let (document, sensitive_values) = match (mode, config) {
        (BootstrapMode::Append, None) => {
            return Err(ValidationError::AppendWithoutConfig { node: node.clone() }.into());
        }
        (BootstrapMode::Override, Some(config)) => (parse_user(node, config)?, BTreeSet::new()),
        (BootstrapMode::Append, Some(config)) => {
            let user = parse_user(node, config)?;
            let (mut document, sensitive) = render_default(renderer, node)?;
            append_sections(node, &mut document, user);
            (document, sensitive)
        }
        (BootstrapMode::Default | BootstrapMode::Override, _) => render_default(renderer, node)?,
    };

    Ok(ResolvedBootstrap {
        content: serialize(node, document)?,
        sensitive_values,
    })
}

fn render_default(
    renderer: &dyn BootstrapRenderer,
    node: &NodeName,
) -> Result<(Mapping, BTreeSet<String>), BootstrapError> {
    let rendered = renderer.render_default(node)?;
    let document = parse_mapping(&rendered.content).map_err(|source| {
        BootstrapError::DefaultTemplate {
            node: node.clone(),
            source,
        }
    })?;
    Ok((document, rendered.sensitive_values))
}

fn parse_user(node: &NodeName, config: &str) -> Result<Mapping, ValidationError> {
    parse_mapping(config).map_err(|source| ValidationError::InvalidBootstrapConfig {
        node: node.clone(),
        source,
    })
}

/// An empty document parses as an empty mapping.
fn parse_mapping(source: &str) -> Result<Mapping, serde_yaml::Error> {
    let value: Value = serde_yaml::from_str(source)?;
    match value {
        Value::Null => Ok(Mapping::new()),
        other => serde_yaml::from_value(other),
    }
}

/// Merge every user section whose key matches a default sequence section.
/// Items land at the section's anchor, or at its end when it has none.
fn append_sections(node: &NodeName, document: &mut Mapping, user: Mapping) {
    for (key, value) in user {
        let Some(section) = document.get_mut(&key) else {
            warn!(%node, section = ?key, "bootstrap section not in default template; ignored");
            continue;
        };
        let Value::Sequence(items) = section else {
            warn!(%node, section = ?key, "default bootstrap section is not a list; ignored");
            continue;
        };

        let additions = match value {
            Value::Sequence(additions) => additions,
            other => vec![other],
        };
        let position = items
            .iter()
            .position(is_anchor)
            .unwrap_or(items.len());
        items.splice(position..position, additions);
    }
}

fn is_anchor(value: &Value) -> bool {
    value.as_str() == Some(APPEND_ANCHOR)
}

fn strip_anchors(value: &mut Value) {
    match value {
        Value::Sequence(items) => {
            items.retain(|item| !is_anchor(item));
            items.iter_mut().for_each(strip_anchors);
        }
        Value::Mapping(mapping) => {
            for (_, item) in mapping.iter_mut() {
                strip_anchors(item);
            }
        }
        _ => {}
    }
}

fn serialize(node: &NodeName, document: Mapping) -> Result<String, BootstrapError> {
    let mut document = Value::Mapping(document);
    strip_anchors(&mut document);
    let body = serde_yaml::to_string(&document).map_err(|source| BootstrapError::Serialize {
        node: node.clone(),
        source,
    })?;
    Ok(format!("{CLOUD_CONFIG_HEADER}\n{body}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::collections::BTreeSet;

    use stratus_domain::{BootstrapContext, BootstrapMode, NodeName};

    use super::{APPEND_ANCHOR, resolve};
    use crate::error::{BootstrapError, EngineError, ValidationError};
    use crate::template::{BootstrapRenderer, RenderedTemplate, TeraBootstrapRenderer};

    const DEFAULT: &str = "\
hostname: {{ worker_name }}
packages:
  - docker.io
runcmd:
  - echo start
  - stratus:append-here
  - echo join
";

    fn node() -> NodeName {
        NodeName::try_from("worker").expect("node name")
    }

    fn renderer() -> TeraBootstrapRenderer {
        TeraBootstrapRenderer::new(DEFAULT, "")
    }

    fn context(mode: BootstrapMode, config: Option<&str>) -> BootstrapContext {
        BootstrapContext {
            cloud_config: config.map(ToString::to_string),
            mode,
        }
    }

    fn parse(content: &str) -> serde_yaml::Value {
        serde_yaml::from_str(content).expect("parse output")
    }

    #[test]
    fn default_mode_renders_template_without_anchor() {
        let resolved = resolve(&renderer(), &node(), None).expect("resolve");

        assert!(resolved.content.starts_with("#cloud-config\n"));
        assert!(!resolved.content.contains(APPEND_ANCHOR));
        let document = parse(&resolved.content);
        assert_eq!(document["hostname"], "worker");
        assert_eq!(
            document["runcmd"],
            parse("[echo start, echo join]")
        );
    }

    #[test]
    fn append_inserts_user_items_at_anchor() {
        let context = context(
            BootstrapMode::Append,
            Some("runcmd:\n  - echo custom\npackages:\n  - htop\n"),
        );
        let resolved = resolve(&renderer(), &node(), Some(&context)).expect("resolve");
        let document = parse(&resolved.content);

        assert_eq!(
            document["runcmd"],
            parse("[echo start, echo custom, echo join]")
        );
        assert_eq!(document["packages"], parse("[docker.io, htop]"));
    }

    #[test]
    fn append_ignores_sections_missing_from_default() {
        let context = context(BootstrapMode::Append, Some("users:\n  - name: ops\n"));
        let resolved = resolve(&renderer(), &node(), Some(&context)).expect("resolve");
        assert!(parse(&resolved.content).get("users").is_none());
    }

    #[test]
    fn append_without_config_is_rejected() {
        let context = context(BootstrapMode::Append, None);
        let error = resolve(&renderer(), &node(), Some(&context)).expect_err("must fail");
        assert!(matches!(
            error,
            EngineError::Validation(ValidationError::AppendWithoutConfig { .. })
        ));
        assert_eq!(error.to_string(), "node worker: append requested without config");
    }

    #[test]
    fn override_uses_user_config_only() {
        let context = context(BootstrapMode::Override, Some("runcmd:\n  - echo only\n"));
        let resolved = resolve(&renderer(), &node(), Some(&context)).expect("resolve");
        let document = parse(&resolved.content);

        assert!(document.get("hostname").is_none());
        assert_eq!(document["runcmd"], parse("[echo only]"));
    }

    #[test]
    fn override_without_config_falls_back_to_default() {
        let context = context(BootstrapMode::Override, Some("   "));
        let resolved = resolve(&renderer(), &node(), Some(&context)).expect("resolve");
        assert_eq!(parse(&resolved.content)["hostname"], "worker");
    }

    #[test]
    fn invalid_user_config_is_a_validation_error() {
        let context = context(BootstrapMode::Override, Some("- just\n- a list\n"));
        let error = resolve(&renderer(), &node(), Some(&context)).expect_err("must fail");
        assert!(matches!(
            error,
            EngineError::Validation(ValidationError::InvalidBootstrapConfig { .. })
        ));
    }

    struct BrokenRenderer;

    impl BootstrapRenderer for BrokenRenderer {
        fn render_default(&self, _node: &NodeName) -> Result<RenderedTemplate, BootstrapError> {
            Ok(RenderedTemplate {
                content: "runcmd: [unterminated".to_string(),
                sensitive_values: BTreeSet::new(),
            })
        }
    }

    #[test]
    fn unparsable_default_template_is_a_bootstrap_error() {
        let error = resolve(&BrokenRenderer, &node(), None).expect_err("must fail");
        assert!(matches!(
            error,
            EngineError::Bootstrap(BootstrapError::DefaultTemplate { .. })
        ));
    }
}
