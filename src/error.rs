use thiserror::Error;

/// Failures of the cache machinery itself.
///
/// Errors produced by a [`DataSource`](crate::traits::DataSource) never end up here: they are handed back to the
/// caller exactly as the source returned them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to build {what}: {message}")]
    Builder { what: &'static str, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn builder<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> Self {
        move |err| Self::Builder {
            what,
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
