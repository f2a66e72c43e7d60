use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::PolicyError;
use crate::loader::compile_policy_text;
use crate::matching::PolicyRef;
use crate::parse::parse_policy_text;
use crate::reload::ReloadReport;
use crate::types::{CompiledPolicySet, CriteriaCatalog, EngineConfig, StatusRegistry};

/// Compiled policies together with what is needed to recompile them.
///
/// The compiled set is shared behind an [`Arc`]; evaluators keep their own clone
/// while [`reload_text`](Self::reload_text) updates thresholds in place.
#[derive(Debug)]
pub struct PolicyEngine {
    catalog: CriteriaCatalog,
    registry: StatusRegistry,
    config: EngineConfig,
    policies: Arc<CompiledPolicySet>,
}

impl PolicyEngine {
    /// Parse and compile policy text with the default configuration and no status
    /// managers.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] on parse or compile failure.
    pub fn from_text(input: &str) -> Result<Self, PolicyError> {
        Self::with_options(input, EngineConfig::default(), StatusRegistry::new())
    }

    /// Read a policy file and compile it with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] on I/O, parse, or compile failure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_text(&input)
    }

    /// # Errors
    ///
    /// Returns [`PolicyError`] on parse or compile failure.
    pub fn with_options(
        input: &str,
        config: EngineConfig,
        registry: StatusRegistry,
    ) -> Result<Self, PolicyError> {
        let catalog = CriteriaCatalog::new();
        let items = parse_policy_text(input)?;
        let policies = compile_policy_text(items, &catalog, &registry, config.clone())?;
        Ok(Self {
            catalog,
            registry,
            config,
            policies: Arc::new(policies),
        })
    }

    #[must_use]
    pub fn policies(&self) -> &Arc<CompiledPolicySet> {
        &self.policies
    }

    #[must_use]
    pub fn policy(&self, name: &str) -> Option<PolicyRef<'_>> {
        self.policies.policy(name)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &CriteriaCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    /// Compile `input` and apply its numeric changes to the live policies.
    ///
    /// The live set is never replaced: structural changes are rejected and listed in
    /// the report.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] when `input` does not compile; the live set is untouched.
    pub fn reload_text(&self, input: &str) -> Result<ReloadReport, PolicyError> {
        let items = parse_policy_text(input)?;
        let fresh =
            compile_policy_text(items, &self.catalog, &self.registry, self.config.clone())?;
        let report = self.policies.reload_from(&fresh);
        info!(target: "fspolicy::reload", %report, "reload finished");
        Ok(report)
    }

    /// # Errors
    ///
    /// Returns [`PolicyError`] on I/O, parse, or compile failure.
    pub fn reload_file(&self, path: impl AsRef<Path>) -> Result<ReloadReport, PolicyError> {
        let input = std::fs::read_to_string(path)?;
        self.reload_text(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = r#"
        FileClass big { definition { size > 1GB } }
        define_policy purge { }
        purge_rules {
            rule r1 { target_fileclass = big; condition { last_access > 1d } }
        }
    "#;

    #[test]
    fn from_text_compiles() {
        let engine = PolicyEngine::from_text(TEXT).unwrap();
        assert_eq!(engine.policies().classes().len(), 1);
        assert_eq!(engine.policy("purge").unwrap().name(), "purge");
    }

    #[test]
    fn from_text_reports_parse_errors() {
        let err = PolicyEngine::from_text("FileClass { ").unwrap_err();
        assert!(matches!(err, PolicyError::Parse(_)));
    }

    #[test]
    fn from_text_reports_compile_errors() {
        let err = PolicyEngine::from_text("FileClass a { definition { colour == red } }")
            .unwrap_err();
        assert!(matches!(err, PolicyError::Compile(_)));
    }

    #[test]
    fn from_file_missing() {
        let err = PolicyEngine::from_file("/nonexistent/fspolicy/policy.conf").unwrap_err();
        assert!(matches!(err, PolicyError::Io(_)));
    }

    #[test]
    fn reload_updates_shared_set() {
        let engine = PolicyEngine::from_text(TEXT).unwrap();
        let shared = Arc::clone(engine.policies());
        let report = engine
            .reload_text(&TEXT.replace("1GB", "2GB").replace("1d", "3d"))
            .unwrap();
        assert!(report.is_clean());
        assert_eq!(report.updated().len(), 2);
        let class = shared.class_by_name("big").unwrap();
        assert_eq!(shared.to_display_string(class.definition()), "size > 2GB");
    }
}
