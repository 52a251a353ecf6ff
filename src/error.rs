use thiserror::Error;

// JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("archive encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("archive io: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive lock poisoned")]
    Poisoned,
    #[error("archive task failed: {0}")]
    Task(String),
}

/// Failures on the live path. None of these reach a caller directly; the
/// resolver turns every variant into an archive fallback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LiveError {
    #[error("live source unavailable")]
    Unavailable,
    #[error("not found in live source")]
    NotFound,
    #[error("live session ended")]
    SessionInvalid,
    #[error("live call failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("bad arguments: {0}")]
    BadArguments(String),
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("internal: {0}")]
    Internal(String),
}

impl ToolError {
    pub(crate) fn bad_args(err: impl std::fmt::Display) -> Self {
        Self::BadArguments(err.to_string())
    }
}

/// `resources/read` failures.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("unknown resource: {0}")]
    Unknown(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// `prompts/get` failures. All of them are the caller's fault.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("unknown prompt: {0}")]
    Unknown(String),
    #[error("prompt {prompt} needs argument {argument}")]
    MissingArgument { prompt: String, argument: String },
    #[error("prompt argument {0} must be an integer")]
    InvalidArgument(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate tool registration: {0}")]
    Duplicate(String),
    #[error("tool '{0}' has an invalid input schema: {1}")]
    InvalidSchema(String, String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("config parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("config write: {0}")]
    Write(#[from] std::io::Error),
    #[error("config encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
