use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use stratus_domain::NodeName;

use crate::error::ScopeConflict;

pub const GENERATED_MARKER: &str = "This file has been generated by stratus";

/// Instance-count variables: node name to its ordered instance tokens.
pub type InstanceVars = BTreeMap<String, Vec<String>>;

/// Accumulator for one translation pass.
///
/// Every `add_*` operation is idempotent: repeating a call with an identical
/// value leaves the document unchanged. Nothing here touches the filesystem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceGraph {
    providers: BTreeMap<String, Value>,
    resources: BTreeMap<String, Vec<Value>>,
    data: BTreeMap<String, Vec<Value>>,
    variables: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
    instance_vars: InstanceVars,
}

impl ResourceGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a provider configuration. The first write wins; returns whether
    /// the entry was inserted.
    pub fn add_provider(&mut self, name: &str, config: Value) -> bool {
        if self.providers.contains_key(name) {
            return false;
        }
        self.providers.insert(name.to_string(), config);
        true
    }

    /// Insert a provider whose `scope_fields` must agree with any entry
    /// already present for the same provider.
    ///
    /// # Errors
    ///
    /// Returns a [`ScopeConflict`] when an existing entry differs on one of
    /// the scope fields. The document is left unchanged in that case.
    pub fn add_scoped_provider(
        &mut self,
        name: &str,
        config: Value,
        scope_fields: &[&str],
    ) -> Result<bool, ScopeConflict> {
        let Some(existing) = self.providers.get(name) else {
            self.providers.insert(name.to_string(), config);
            return Ok(true);
        };

        for field in scope_fields {
            let current = existing.get(*field);
            let requested = config.get(*field);
            if current != requested {
                return Err(ScopeConflict {
                    provider: name.to_string(),
                    field: (*field).to_string(),
                    existing: scope_value_text(current),
                    requested: scope_value_text(requested),
                });
            }
        }
        Ok(false)
    }

    pub fn add_variable(&mut self, name: &str, config: Value) -> bool {
        if self.variables.contains_key(name) {
            return false;
        }
        self.variables.insert(name.to_string(), config);
        true
    }

    pub fn add_output(&mut self, name: &str, value: Value) -> bool {
        if self.outputs.contains_key(name) {
            return false;
        }
        self.outputs.insert(name.to_string(), value);
        true
    }

    /// Append a resource stanza under `kind` unless a structurally equal one
    /// is already present.
    pub fn add_resource(&mut self, kind: &str, stanza: Value) -> bool {
        push_unique(self.resources.entry(kind.to_string()).or_default(), stanza)
    }

    pub fn add_data(&mut self, kind: &str, stanza: Value) -> bool {
        push_unique(self.data.entry(kind.to_string()).or_default(), stanza)
    }

    /// Declare the count variable for `node` with tokens `"1"..=count`.
    pub fn add_instance_variable(&mut self, node: &NodeName, count: u32) {
        let _ = self.add_variable(node.as_str(), json!({}));
        let tokens = (1..=count).map(|token| token.to_string()).collect();
        self.instance_vars.insert(node.to_string(), tokens);
    }

    /// Keep the previous token list of every node already deployed, so an
    /// incremental update never renumbers existing instances.
    pub fn update_instance_vars(&mut self, previous: &InstanceVars) {
        for (node, tokens) in &mut self.instance_vars {
            if let Some(old_tokens) = previous.get(node) {
                tokens.clone_from(old_tokens);
            }
        }
    }

    #[must_use]
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&Value> {
        self.providers.get(name)
    }

    #[must_use]
    pub const fn providers(&self) -> &BTreeMap<String, Value> {
        &self.providers
    }

    #[must_use]
    pub fn resources(&self, kind: &str) -> &[Value] {
        self.resources.get(kind).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn data(&self, kind: &str) -> &[Value] {
        self.data.get(kind).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    #[must_use]
    pub const fn instance_vars(&self) -> &InstanceVars {
        &self.instance_vars
    }

    /// Structured form of the resource graph, as consumed by the apply backend.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut document = Map::new();
        document.insert("//".to_string(), Value::String(GENERATED_MARKER.to_string()));

        if !self.providers.is_empty() {
            document.insert("provider".to_string(), json!(self.providers));
        }
        if !self.resources.is_empty() {
            document.insert("resource".to_string(), json!(self.resources));
        }
        if !self.data.is_empty() {
            document.insert("data".to_string(), json!(self.data));
        }
        if !self.variables.is_empty() {
            document.insert("variable".to_string(), json!(self.variables));
        }
        if !self.outputs.is_empty() {
            let outputs: Map<String, Value> = self
                .outputs
                .iter()
                .map(|(name, value)| (name.clone(), json!({ "value": value })))
                .collect();
            document.insert("output".to_string(), Value::Object(outputs));
        }

        Value::Object(document)
    }

    /// Pretty JSON rendering of the graph. Keys are sorted, so identical
    /// graphs always render to identical bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_graph(&self) -> serde_json::Result<String> {
        let mut rendered = serde_json::to_string_pretty(&self.to_document())?;
        rendered.push('\n');
        Ok(rendered)
    }

    /// Pretty JSON rendering of the instance-count variables.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_vars(&self) -> serde_json::Result<String> {
        let mut rendered = serde_json::to_string_pretty(&self.instance_vars)?;
        rendered.push('\n');
        Ok(rendered)
    }
}

fn push_unique(stanzas: &mut Vec<Value>, stanza: Value) -> bool {
    if stanzas.contains(&stanza) {
        return false;
    }
    stanzas.push(stanza);
    true
}

fn scope_value_text(value: Option<&Value>) -> String {
    match value {
        None => "<unset>".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
