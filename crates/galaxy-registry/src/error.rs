use galaxy_core::NameError;
use galaxy_store::BackendError;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("invalid registration field {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error(transparent)]
    InvalidName(#[from] NameError),
}
