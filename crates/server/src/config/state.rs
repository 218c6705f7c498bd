use serde::Deserialize;

/// Configuration for the state store backend.
#[derive(Debug, Deserialize)]
pub struct StateConfig {
    /// Which backend to use. Only `"memory"` is built in.
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Prefix for every key the pipeline writes. Defaults to `"tollgate"`.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            namespace: default_namespace(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_owned()
}

fn default_namespace() -> String {
    "tollgate".to_owned()
}
