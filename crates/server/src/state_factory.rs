use std::sync::Arc;

use tollgate_state::StateStore;
use tollgate_state_memory::MemoryStateStore;

use crate::config::StateConfig;
use crate::error::ServerError;

/// Create a state store from the given configuration.
pub fn create_state(config: &StateConfig) -> Result<Arc<dyn StateStore>, ServerError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStateStore::new())),
        other => Err(ServerError::Config(format!(
            "unknown state backend: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_is_built_in() {
        assert!(create_state(&StateConfig::default()).is_ok());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = StateConfig {
            backend: "redis".into(),
            ..StateConfig::default()
        };
        let err = create_state(&config).err().unwrap();
        assert!(err.to_string().contains("unknown state backend: redis"));
    }
}
