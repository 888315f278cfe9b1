//! Plugin registry (C3, `spec.md §4.3`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::FormatCodec;
use crate::error::{DbError, PluginErrorReason};
use crate::hooks::GlobalHooks;
use crate::operators::is_builtin;
use crate::value::{QueryValue, ValueTypeTag};

pub trait CustomOperator: Send + Sync {
    fn name(&self) -> &str;
    fn types(&self) -> &[ValueTypeTag];
    fn evaluate(&self, field_value: &QueryValue, operand: &QueryValue) -> bool;
}

pub trait CustomIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// A plugin contributes any combination of operators, id generators,
/// codecs, and global hooks, plus optional async lifecycle effects.
///
/// Modeled after the teacher's `Plugin`/`PluginTransformer` pair
/// (`src/orm/plugin.rs`): a plugin is a first-class, introspectable object
/// registered into a registry before any query runs.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn operators(&self) -> Vec<Arc<dyn CustomOperator>> {
        Vec::new()
    }

    fn id_generators(&self) -> Vec<(String, Arc<dyn CustomIdGenerator>)> {
        Vec::new()
    }

    fn codecs(&self) -> Vec<Arc<dyn FormatCodec>> {
        Vec::new()
    }

    fn global_hooks(&self) -> GlobalHooks {
        GlobalHooks::default()
    }

    async fn initialize(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DbError> {
        Ok(())
    }
}

/// Build-once, immutable-after-build registry exposing merged capabilities
/// to the query and mutation engines.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    operators: BTreeMap<String, Arc<dyn CustomOperator>>,
    id_generators: BTreeMap<String, Arc<dyn CustomIdGenerator>>,
    codecs: BTreeMap<String, Arc<dyn FormatCodec>>,
    global_hooks: GlobalHooks,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.len())
            .field("operators", &self.operators.keys().collect::<Vec<_>>())
            .field("id_generators", &self.id_generators.keys().collect::<Vec<_>>())
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// Validate and build a registry from an ordered plugin list
    /// (`spec.md §4.3`: build-time validation, fail closed).
    pub fn build(plugins: Vec<Arc<dyn Plugin>>) -> Result<Self, DbError> {
        let registered_names: BTreeSet<String> = plugins.iter().map(|p| p.name().to_string()).collect();

        let mut operators: BTreeMap<String, Arc<dyn CustomOperator>> = BTreeMap::new();
        let mut operator_owner: BTreeMap<String, String> = BTreeMap::new();
        let mut id_generators = BTreeMap::new();
        let mut codecs: BTreeMap<String, Arc<dyn FormatCodec>> = BTreeMap::new();
        let mut global_hooks = GlobalHooks::default();

        for plugin in &plugins {
            let name = plugin.name().to_string();
            if name.is_empty() {
                return Err(DbError::Plugin {
                    plugin: name,
                    reason: PluginErrorReason::MissingName,
                }
                .log_and_return());
            }

            let missing: Vec<String> = plugin
                .dependencies()
                .into_iter()
                .filter(|dep| !registered_names.contains(dep))
                .collect();
            if !missing.is_empty() {
                return Err(DbError::Plugin {
                    plugin: name,
                    reason: PluginErrorReason::MissingDependencies,
                }
                .log_and_return());
            }

            for op in plugin.operators() {
                let op_name = op.name().to_string();
                if op_name.is_empty() || !op_name.starts_with('$') || op.types().is_empty() {
                    return Err(DbError::Plugin {
                        plugin: name,
                        reason: PluginErrorReason::InvalidOperator,
                    }
                    .log_and_return());
                }
                if is_builtin(&op_name) || operators.contains_key(&op_name) {
                    return Err(DbError::Plugin {
                        plugin: name,
                        reason: PluginErrorReason::OperatorConflict,
                    }
                    .log_and_return());
                }
                operator_owner.insert(op_name.clone(), name.clone());
                operators.insert(op_name, op);
            }

            for (gen_name, generator) in plugin.id_generators() {
                id_generators.insert(gen_name, generator);
            }

            for codec in plugin.codecs() {
                if codec.name().is_empty() || codec.extensions().is_empty() {
                    return Err(DbError::Plugin {
                        plugin: name,
                        reason: PluginErrorReason::InvalidCodec,
                    }
                    .log_and_return());
                }
                for ext in codec.extensions() {
                    if codecs.contains_key(*ext) {
                        tracing::warn!(extension = %ext, plugin = %name, "codec extension overridden by later plugin");
                    }
                    codecs.insert(ext.to_string(), codec.clone());
                }
            }

            let hooks = plugin.global_hooks();
            global_hooks.before_create.extend(hooks.before_create);
            global_hooks.after_create.extend(hooks.after_create);
            global_hooks.before_update.extend(hooks.before_update);
            global_hooks.after_update.extend(hooks.after_update);
            global_hooks.before_delete.extend(hooks.before_delete);
            global_hooks.after_delete.extend(hooks.after_delete);
            global_hooks.on_change.extend(hooks.on_change);
        }

        Ok(Self {
            plugins,
            operators,
            id_generators,
            codecs,
            global_hooks,
        })
    }

    pub fn validate_id_generator(&self, name: &str) -> Result<(), DbError> {
        if self.id_generators.contains_key(name) {
            Ok(())
        } else {
            Err(DbError::Plugin {
                plugin: name.to_string(),
                reason: PluginErrorReason::MissingIdGenerator,
            }
            .log_and_return())
        }
    }

    pub fn operator(&self, name: &str) -> Option<&Arc<dyn CustomOperator>> {
        self.operators.get(name)
    }

    pub fn id_generator(&self, name: &str) -> Option<&Arc<dyn CustomIdGenerator>> {
        self.id_generators.get(name)
    }

    pub fn codec(&self, extension: &str) -> Option<&Arc<dyn FormatCodec>> {
        self.codecs.get(extension)
    }

    pub fn global_hooks(&self) -> &GlobalHooks {
        &self.global_hooks
    }

    /// Run `initialize` in registration order.
    pub async fn initialize_all(&self) -> Result<(), DbError> {
        for plugin in &self.plugins {
            plugin.initialize().await?;
        }
        Ok(())
    }

    /// Run `shutdown` in reverse registration order; each failure is
    /// isolated and logged, never aborting the others (`spec.md §4.3`).
    pub async fn shutdown_all(&self) {
        for plugin in self.plugins.iter().rev() {
            if let Err(err) = plugin.shutdown().await {
                tracing::error!(plugin = %plugin.name(), error = %err, "plugin shutdown failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FuzzyOp;
    impl CustomOperator for FuzzyOp {
        fn name(&self) -> &str {
            "$fuzzy"
        }
        fn types(&self) -> &[ValueTypeTag] {
            &[ValueTypeTag::String]
        }
        fn evaluate(&self, _field_value: &QueryValue, _operand: &QueryValue) -> bool {
            true
        }
    }

    struct PluginA;
    #[async_trait]
    impl Plugin for PluginA {
        fn name(&self) -> &str {
            "plugin-a"
        }
        fn operators(&self) -> Vec<Arc<dyn CustomOperator>> {
            vec![Arc::new(FuzzyOp)]
        }
    }

    struct PluginB;
    #[async_trait]
    impl Plugin for PluginB {
        fn name(&self) -> &str {
            "plugin-b"
        }
        fn operators(&self) -> Vec<Arc<dyn CustomOperator>> {
            vec![Arc::new(FuzzyOp)]
        }
    }

    #[test]
    fn conflicting_operator_names_fail_build() {
        let err = PluginRegistry::build(vec![Arc::new(PluginA), Arc::new(PluginB)]).unwrap_err();
        match err {
            DbError::Plugin { plugin, reason } => {
                assert_eq!(plugin, "plugin-b");
                assert_eq!(reason, PluginErrorReason::OperatorConflict);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct BuiltinOverride;
    #[async_trait]
    impl Plugin for BuiltinOverride {
        fn name(&self) -> &str {
            "override"
        }
        fn operators(&self) -> Vec<Arc<dyn CustomOperator>> {
            struct EqOp;
            impl CustomOperator for EqOp {
                fn name(&self) -> &str {
                    "$eq"
                }
                fn types(&self) -> &[ValueTypeTag] {
                    &[ValueTypeTag::String]
                }
                fn evaluate(&self, _f: &QueryValue, _o: &QueryValue) -> bool {
                    true
                }
            }
            vec![Arc::new(EqOp)]
        }
    }

    #[test]
    fn cannot_override_builtin_operator() {
        let err = PluginRegistry::build(vec![Arc::new(BuiltinOverride)]).unwrap_err();
        assert!(matches!(
            err,
            DbError::Plugin {
                reason: PluginErrorReason::OperatorConflict,
                ..
            }
        ));
    }
}
