//! Health probe report.

use serde::Serialize;

/// Result of the engine health probe.
///
/// `healthy` holds only when the model is loaded, the store answers, the
/// schema verifies, and the cache is reachable or disabled.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub model_loaded: bool,
    pub store_reachable: bool,
    pub schema_valid: bool,
    pub cache_ok: bool,
}

impl HealthReport {
    pub fn evaluate(
        model_loaded: bool,
        store_reachable: bool,
        schema_valid: bool,
        cache_ok: bool,
    ) -> Self {
        Self {
            healthy: model_loaded && store_reachable && schema_valid && cache_ok,
            model_loaded,
            store_reachable,
            schema_valid,
            cache_ok,
        }
    }
}

impl std::fmt::Display for HealthReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (model={}, store={}, schema={}, cache={})",
            if self.healthy { "healthy" } else { "unhealthy" },
            self.model_loaded,
            self.store_reachable,
            self.schema_valid,
            self.cache_ok
        )
    }
}
