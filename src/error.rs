use thiserror::Error;

pub type Result<T> = std::result::Result<T, MeshError>;

/// Failures a mesh build can surface to the caller.
///
/// Malformed configuration is clamped at use and never reported here; the
/// only fatal build condition is running out of 32-bit index space, which is
/// detected before the output buffers are allocated.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("mesh needs {vertices} vertices, more than a 32-bit index buffer can address")]
    IndexOverflow { vertices: usize },

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}
