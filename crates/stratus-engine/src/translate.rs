use std::collections::{BTreeMap, BTreeSet};

use stratus_domain::{Descriptor, NodeName, NodeSpec, PolicySpec, ScalingPolicy};
use tracing::{debug, info};

use crate::bootstrap;
use crate::credentials::CredentialStore;
use crate::error::{EngineError, ValidationError};
use crate::graph::ResourceGraph;
use crate::layout::ArtifactLayout;
use crate::providers::{MapperRegistry, NodeContext};
use crate::template::BootstrapRenderer;

/// Result of one in-memory translation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationOutput {
    pub graph: ResourceGraph,
    /// Rendered bootstrap document per translated node.
    pub bootstrap: BTreeMap<NodeName, String>,
    pub stage_service_account: bool,
    /// Credential and template values embedded in the output.
    pub sensitive_values: BTreeSet<String>,
}

impl TranslationOutput {
    /// Whether any node produced a provider entry. Without one there is
    /// nothing to deploy.
    #[must_use]
    pub fn has_providers(&self) -> bool {
        self.graph.has_providers()
    }
}

pub struct Translator<'a> {
    registry: &'a MapperRegistry,
    credentials: &'a dyn CredentialStore,
    renderer: &'a dyn BootstrapRenderer,
}

impl<'a> Translator<'a> {
    #[must_use]
    pub fn new(
        registry: &'a MapperRegistry,
        credentials: &'a dyn CredentialStore,
        renderer: &'a dyn BootstrapRenderer,
    ) -> Self {
        Self {
            registry,
            credentials,
            renderer,
        }
    }

    /// Map every node of `descriptor` into one resource graph.
    ///
    /// Nodes are processed in order. Nothing is written to disk; the first
    /// failing node aborts the whole pass.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed nodes, and a bootstrap error
    /// when a node's bootstrap document cannot be produced.
    pub fn translate(&self, descriptor: &Descriptor) -> Result<TranslationOutput, EngineError> {
        let mut output = TranslationOutput::default();
        let mut seen = BTreeSet::new();

        for spec in &descriptor.nodes {
            let name = NodeName::new(spec.name.clone()).map_err(ValidationError::from)?;
            if !seen.insert(name.clone()) {
                return Err(ValidationError::DuplicateNode { node: name }.into());
            }
            let Some(cloud) = spec.cloud else {
                debug!(node = %name, "node has no infrastructure interface; skipping");
                continue;
            };

            let scaling = resolve_scaling(&name, spec, &descriptor.policies);
            let resolved = bootstrap::resolve(self.renderer, &name, spec.context.as_ref())?;
            let mapper = self
                .registry
                .get(cloud)
                .ok_or(ValidationError::UnsupportedCloud { cloud })?;

            let bootstrap_file = ArtifactLayout::bootstrap_file_name(&name);
            let context = NodeContext {
                name: &name,
                properties: &spec.properties,
                scaling,
                bootstrap_file: &bootstrap_file,
            };
            debug!(node = %name, %cloud, min = scaling.min_instances, "mapping node");
            let outcome = mapper.map(&context, self.credentials, &mut output.graph)?;

            output.stage_service_account |= outcome.stage_service_account;
            output.sensitive_values.extend(outcome.sensitive_values);
            output.sensitive_values.extend(resolved.sensitive_values);
            output.bootstrap.insert(name, resolved.content);
        }

        info!(
            providers = output.graph.providers().len(),
            resources = output.graph.resource_count(),
            nodes = output.bootstrap.len(),
            "translation pass complete"
        );
        Ok(output)
    }
}

/// Node capability first, then the last policy targeting the node, then 1/1.
fn resolve_scaling(name: &NodeName, spec: &NodeSpec, policies: &[PolicySpec]) -> ScalingPolicy {
    if let Some(scaling) = spec.scalable {
        return scaling;
    }
    policies
        .iter()
        .rev()
        .find(|policy| policy.targets.iter().any(|target| target == name.as_str()))
        .map_or_else(ScalingPolicy::default, |policy| {
            debug!(node = %name, policy = %policy.name, "scaling policy matched");
            ScalingPolicy {
                min_instances: policy.min_instances,
                max_instances: policy.max_instances,
            }
        })
}
