//! Plugin catalog and node-kind dispatch
//!
//! Plugins register, per node kind they introduce, a handler implementing the
//! stepper's `advance` contract plus the keywords/operators the external parser
//! needs. Each engine clones an immutable `DispatchTable` snapshot of the
//! catalog; node kinds are resolved to table indices once, at load time.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::error::{EvalResult, RegistryError};
use crate::interpreter::ast::NodeId;
use crate::interpreter::context::Evaluation;

/// Evaluation handler for one node kind.
///
/// Called repeatedly on the same unevaluated node; every call performs one
/// unit of progress and returns the node to visit next.
pub trait NodeHandler: Send + Sync {
    /// Advance evaluation of `pos`
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId>;
}

impl<F> NodeHandler for F
where
    F: Fn(&mut dyn Evaluation, NodeId) -> EvalResult<NodeId> + Send + Sync,
{
    fn advance(&self, eval: &mut dyn Evaluation, pos: NodeId) -> EvalResult<NodeId> {
        self(eval, pos)
    }
}

/// Contributor of node kinds
pub trait Plugin: Send + Sync {
    /// Plugin name
    fn name(&self) -> &'static str;

    /// Reserved words consumed by the external parser
    fn keywords(&self) -> &'static [&'static str] {
        &[]
    }

    /// Operator tokens consumed by the external parser
    fn operators(&self) -> &'static [&'static str] {
        &[]
    }

    /// Handlers for every node kind this plugin introduces
    fn handlers(&self) -> Vec<(&'static str, Arc<dyn NodeHandler>)>;
}

/// Index of a handler inside a [`DispatchTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerIndex(pub usize);

#[derive(Clone)]
struct KindInfo {
    plugin: String,
    handler: Arc<dyn NodeHandler>,
}

/// Lexical contributions of all registered plugins
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    /// Keyword -> contributing plugins
    pub keywords: BTreeMap<String, BTreeSet<String>>,
    /// Operator -> contributing plugins
    pub operators: BTreeMap<String, BTreeSet<String>>,
}

impl Lexicon {
    fn add(&mut self, plugin: &dyn Plugin) {
        for keyword in plugin.keywords() {
            self.keywords
                .entry(keyword.to_string())
                .or_default()
                .insert(plugin.name().to_string());
        }
        for operator in plugin.operators() {
            self.operators
                .entry(operator.to_string())
                .or_default()
                .insert(plugin.name().to_string());
        }
    }
}

#[derive(Default)]
struct CatalogInner {
    kinds: HashMap<String, KindInfo>,
    lexicon: Lexicon,
}

/// Mutable catalog of node-kind handlers
pub struct PluginCatalog {
    inner: RwLock<CatalogInner>,
}

static CATALOG: Lazy<PluginCatalog> = Lazy::new(PluginCatalog::standard);

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner::default()),
        }
    }

    /// Catalog preloaded with the built-in plugins
    pub fn standard() -> Self {
        let catalog = Self::new();
        for plugin in crate::plugins::builtin_plugins() {
            // Built-in kinds are disjoint.
            if let Err(err) = catalog.register_plugin(plugin.as_ref()) {
                tracing::error!("built-in plugin registration failed: {}", err);
            }
        }
        catalog
    }

    /// Access the global catalog singleton
    pub fn global() -> &'static Self {
        &CATALOG
    }

    /// Register every kind and lexical contribution of a plugin
    pub fn register_plugin(&self, plugin: &dyn Plugin) -> Result<(), RegistryError> {
        let handlers = plugin.handlers();
        let mut inner = self.inner.write();
        for (kind, _) in &handlers {
            if let Some(existing) = inner.kinds.get(*kind) {
                return Err(RegistryError::DuplicateKind {
                    kind: kind.to_string(),
                    existing_plugin: existing.plugin.clone(),
                    plugin: plugin.name().to_string(),
                });
            }
        }
        for (kind, handler) in handlers {
            inner.kinds.insert(
                kind.to_string(),
                KindInfo {
                    plugin: plugin.name().to_string(),
                    handler,
                },
            );
        }
        inner.lexicon.add(plugin);
        tracing::debug!("registered plugin {}", plugin.name());
        Ok(())
    }

    /// Register a single handler (no lexical contribution)
    pub fn register_handler<H>(&self, plugin: &str, kind: &str, handler: H) -> Result<(), RegistryError>
    where
        H: NodeHandler + 'static,
    {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.kinds.get(kind) {
            return Err(RegistryError::DuplicateKind {
                kind: kind.to_string(),
                existing_plugin: existing.plugin.clone(),
                plugin: plugin.to_string(),
            });
        }
        inner.kinds.insert(
            kind.to_string(),
            KindInfo {
                plugin: plugin.to_string(),
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Check whether the catalog knows the kind
    pub fn has_kind(&self, kind: &str) -> bool {
        self.inner.read().kinds.contains_key(kind)
    }

    /// Produce an immutable snapshot for an engine instance
    pub fn snapshot(&self) -> DispatchTable {
        let inner = self.inner.read();
        let mut kinds: Vec<(&String, &KindInfo)> = inner.kinds.iter().collect();
        kinds.sort_by(|a, b| a.0.cmp(b.0));

        let mut entries = Vec::with_capacity(kinds.len());
        let mut index = HashMap::with_capacity(kinds.len());
        for (kind, info) in kinds {
            index.insert(kind.clone(), HandlerIndex(entries.len()));
            entries.push(DispatchEntry {
                kind: kind.clone(),
                plugin: info.plugin.clone(),
                handler: info.handler.clone(),
            });
        }

        DispatchTable {
            entries: Arc::new(entries),
            index: Arc::new(index),
            lexicon: Arc::new(inner.lexicon.clone()),
        }
    }
}

struct DispatchEntry {
    kind: String,
    plugin: String,
    handler: Arc<dyn NodeHandler>,
}

/// Immutable view of the catalog used during evaluation
#[derive(Clone)]
pub struct DispatchTable {
    entries: Arc<Vec<DispatchEntry>>,
    index: Arc<HashMap<String, HandlerIndex>>,
    lexicon: Arc<Lexicon>,
}

impl DispatchTable {
    /// Resolve a node kind to its handler index
    pub fn resolve(&self, kind: &str) -> Option<HandlerIndex> {
        self.index.get(kind).copied()
    }

    /// Handler at a resolved index
    pub fn handler(&self, index: HandlerIndex) -> Option<&dyn NodeHandler> {
        self.entries.get(index.0).map(|entry| entry.handler.as_ref())
    }

    /// Plugin that provides the kind
    pub fn plugin_of(&self, kind: &str) -> Option<&str> {
        let index = self.resolve(kind)?;
        self.entries.get(index.0).map(|entry| entry.plugin.as_str())
    }

    /// All node kinds known to this snapshot
    pub fn kinds(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.kind.as_str()).collect()
    }

    /// Keywords and operators contributed by the plugins
    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ProbePlugin;

    impl Plugin for ProbePlugin {
        fn name(&self) -> &'static str {
            "ProbePlugin"
        }

        fn keywords(&self) -> &'static [&'static str] {
            &["probe"]
        }

        fn handlers(&self) -> Vec<(&'static str, Arc<dyn NodeHandler>)> {
            let handler = |eval: &mut dyn Evaluation, pos: NodeId| -> EvalResult<NodeId> {
                eval.set_result(pos, None, None);
                Ok(pos)
            };
            vec![("ProbeRule", Arc::new(handler) as Arc<dyn NodeHandler>)]
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let catalog = PluginCatalog::new();
        catalog.register_plugin(&ProbePlugin).unwrap();
        assert!(catalog.has_kind("ProbeRule"));

        let table = catalog.snapshot();
        let index = table.resolve("ProbeRule").unwrap();
        assert!(table.handler(index).is_some());
        assert_eq!(table.plugin_of("ProbeRule"), Some("ProbePlugin"));
        assert!(table.lexicon().keywords.contains_key("probe"));
        assert!(table.resolve("MissingRule").is_none());
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let catalog = PluginCatalog::new();
        catalog.register_plugin(&ProbePlugin).unwrap();
        let err = catalog.register_plugin(&ProbePlugin).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKind { .. }));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_registrations() {
        let catalog = PluginCatalog::new();
        let table = catalog.snapshot();
        catalog.register_plugin(&ProbePlugin).unwrap();
        assert!(table.resolve("ProbeRule").is_none());
    }

    #[test]
    fn test_standard_catalog_has_builtin_kinds() {
        let table = PluginCatalog::global().snapshot();
        for kind in ["ChooseRule", "PickExp", "UpdateRule", "SeqBlockRule", "ForallRule"] {
            assert!(table.resolve(kind).is_some(), "missing {}", kind);
        }
        assert!(table.lexicon().keywords.contains_key("ifnone"));
    }
}
