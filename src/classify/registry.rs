use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::sequence::FeatureSequence;

use super::backend::{Classification, DynamicClassifier, ModelVariant};

/// Registry of sequence-model backends, routed by `ModelVariant`.
///
/// The registry is itself a `DynamicClassifier`: each request goes to the default
/// backend when it serves the requested variant, otherwise to any registered backend
/// that does.
pub struct ModelRegistry {
    backends: HashMap<String, Arc<dyn DynamicClassifier>>,
    default_name: Option<String>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DynamicClassifier + 'static>(&mut self, backend: B) {
        self.register_arc(Arc::new(backend));
    }

    pub fn register_arc(&mut self, backend: Arc<dyn DynamicClassifier>) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, backend);
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("model backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DynamicClassifier>> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<Arc<dyn DynamicClassifier>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Select a backend that serves the requested variant.
    pub fn backend_for_variant(&self, variant: ModelVariant) -> Result<Arc<dyn DynamicClassifier>> {
        if let Some(default_backend) = self.default_backend() {
            if default_backend.supports(variant) {
                return Ok(default_backend);
            }
        }
        let mut names: Vec<&String> = self.backends.keys().collect();
        names.sort();
        for name in names {
            let backend = &self.backends[name];
            if backend.supports(variant) {
                return Ok(backend.clone());
            }
        }
        Err(anyhow!(
            "no registered model backend supports variant {}",
            variant
        ))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicClassifier for ModelRegistry {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn supports(&self, variant: ModelVariant) -> bool {
        self.backends.values().any(|b| b.supports(variant))
    }

    fn classify(
        &self,
        sequence: &FeatureSequence,
        variant: ModelVariant,
    ) -> Result<Classification> {
        let backend = self.backend_for_variant(variant)?;
        backend.classify(sequence, variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FeatureVector;

    struct Fixed {
        name: &'static str,
        variants: &'static [ModelVariant],
    }

    impl DynamicClassifier for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, variant: ModelVariant) -> bool {
            self.variants.contains(&variant)
        }

        fn classify(&self, _: &FeatureSequence, _: ModelVariant) -> Result<Classification> {
            Classification::new(self.name, 0.8)
        }
    }

    fn sequence() -> FeatureSequence {
        FeatureSequence::prepare(&[FeatureVector::zeros()]).unwrap()
    }

    #[test]
    fn routes_by_variant() {
        let mut registry = ModelRegistry::new();
        registry.register(Fixed {
            name: "lstm-local",
            variants: &[ModelVariant::Lstm],
        });
        registry.register(Fixed {
            name: "transformer-remote",
            variants: &[ModelVariant::Transformer],
        });

        let lstm = registry.classify(&sequence(), ModelVariant::Lstm).unwrap();
        assert_eq!(lstm.label, "lstm-local");
        let transformer = registry
            .classify(&sequence(), ModelVariant::Transformer)
            .unwrap();
        assert_eq!(transformer.label, "transformer-remote");
    }

    #[test]
    fn prefers_default_backend() {
        let mut registry = ModelRegistry::new();
        registry.register(Fixed {
            name: "a",
            variants: &[ModelVariant::Lstm],
        });
        registry.register(Fixed {
            name: "b",
            variants: &[ModelVariant::Lstm],
        });
        assert_eq!(
            registry.backend_for_variant(ModelVariant::Lstm).unwrap().name(),
            "a"
        );
        registry.set_default("b").unwrap();
        assert_eq!(
            registry.backend_for_variant(ModelVariant::Lstm).unwrap().name(),
            "b"
        );
        assert!(registry.set_default("missing").is_err());
        assert_eq!(registry.list(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unsupported_variant_is_an_error() {
        let mut registry = ModelRegistry::new();
        registry.register(Fixed {
            name: "a",
            variants: &[ModelVariant::Lstm],
        });
        assert!(!registry.supports(ModelVariant::Transformer));
        assert!(registry
            .classify(&sequence(), ModelVariant::Transformer)
            .is_err());
    }
}
