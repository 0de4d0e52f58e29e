use std::fmt::{Display, Formatter};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("No storage engine is available")]
    StoreUnavailable,

    #[error("Enumerating databases is not supported by this runtime")]
    FeatureUnsupported,

    #[error("Database \"{0}\" does not exist")]
    DatabaseNotFound(String),

    #[error("Object store {0} does not exist")]
    StoreNotFound(String),

    #[error("Index {index} does not exist on object store {store}")]
    IndexNotFound { store: String, index: String },

    #[error("Failed to open database: {0}")]
    Open(EngineError),

    #[error("Request failed: {0}")]
    Request(EngineError),

    #[error("Transaction failed: {0}")]
    Transaction(EngineError),

    #[error("Transaction was aborted: {0}")]
    TransactionAbort(EngineError),

    #[error("Unable to delete database {0} because it's blocked")]
    BlockedDelete(String),

    #[error(transparent)]
    JSON(#[from] serde_json::Error),
}

/// The error reported by the storage engine, modelled after a `DOMException`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub name: String,
    pub message: String,
}

impl EngineError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new("AbortError", message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new("ConstraintError", message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new("DataError", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("InvalidStateError", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NotFoundError", message)
    }

    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new("ReadOnlyError", message)
    }

    pub fn transaction_inactive(message: impl Into<String>) -> Self {
        Self::new("TransactionInactiveError", message)
    }

    pub fn version(message: impl Into<String>) -> Self {
        Self::new("VersionError", message)
    }

    pub fn is_constraint_error(&self) -> bool {
        self.name == "ConstraintError"
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl Error {
    /// Returns the engine error carried by this error, if any.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Error::Open(err)
            | Error::Request(err)
            | Error::Transaction(err)
            | Error::TransactionAbort(err) => Some(err),
            _ => None,
        }
    }
}
