/// Category of a store error. Lets callers tell a dead connection from a
/// rejected write when they report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Invalid connection string or options; permanent.
    Config,
    /// Network, server selection or cursor failure.
    Transport,
    /// Write rejected by the server (validation, write concern, duplicate key).
    Rejected,
    /// Targeted document does not exist.
    NotFound,
    /// Document could not be (de)serialized.
    Format,
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreErrorKind::Config => f.write_str("config"),
            StoreErrorKind::Transport => f.write_str("transport"),
            StoreErrorKind::Rejected => f.write_str("rejected"),
            StoreErrorKind::NotFound => f.write_str("not found"),
            StoreErrorKind::Format => f.write_str("format"),
        }
    }
}

/// Unified error type for all `DocumentStore` and `ChangeFeed` methods.
///
/// Carries a `StoreErrorKind` for categorization and a human-readable message.
#[derive(Clone)]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Config, msg)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transport, msg)
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Rejected, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, msg)
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Format, msg)
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<bson::ser::Error> for StoreError {
    fn from(e: bson::ser::Error) -> Self { Self::format_err(e.to_string()) }
}

impl From<bson::de::Error> for StoreError {
    fn from(e: bson::de::Error) -> Self { Self::format_err(e.to_string()) }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self { Self::transport(e.to_string()) }
}

/// Why a raw change event could not be turned into a `ChangeEvent`.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The bytes are not a well-formed BSON document.
    Malformed(String),
    /// A field required for the event kind is absent.
    MissingField { operation: String, field: &'static str },
    /// A field is present but has the wrong BSON type.
    InvalidField { field: &'static str, detail: String },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Malformed(detail) => write!(f, "malformed event: {detail}"),
            DecodeError::MissingField { operation, field } => {
                write!(f, "{operation} event is missing '{field}'")
            }
            DecodeError::InvalidField { field, detail } => write!(f, "invalid '{field}': {detail}"),
        }
    }
}

impl std::error::Error for DecodeError {}
