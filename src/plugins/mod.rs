//! Built-in node kinds.
//!
//! Every plugin contributes handlers for the node kinds it introduces plus
//! the keywords and operators an external parser needs to recognize them.
//! The standard catalog registers all of them.

pub mod chooserule;
pub mod collection;
pub mod forallrule;
pub mod kernel;
pub mod turboasm;

use crate::runtime::registry::Plugin;

/// Plugins registered by [`PluginCatalog::standard`](crate::runtime::registry::PluginCatalog::standard).
pub fn builtin_plugins() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(kernel::KernelPlugin),
        Box::new(chooserule::ChooseRulePlugin),
        Box::new(forallrule::ForallRulePlugin),
        Box::new(turboasm::TurboAsmPlugin),
        Box::new(collection::CollectionPlugin),
    ]
}
