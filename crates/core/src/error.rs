use std::fmt;

#[derive(Debug)]
pub enum KindredError {
    /// Malformed input or config (missing id, empty blocking keys, bad enum value).
    Validation(String),
    /// An adapter reported a missing row.
    NotFound { entity: String, id: String },
    /// Adapter-boundary query failure, wrapped with context.
    Query(String),
    /// Adapter-boundary transaction failure.
    Transaction(String),
    /// Adapter-boundary connection failure.
    Connection(String),
    /// Queue facade accessed without a configured queue adapter.
    Queue(String),
    /// Unresolvable merge conflict under the `Error` resolution policy.
    Conflict { field: String, message: String },
    /// A field value could not be coerced to the requested type.
    Parse { field: String, value: String },
    /// IO error (CSV read, etc.).
    Io(String),
}

impl fmt::Display for KindredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::NotFound { entity, id } => write!(f, "{entity} '{id}' not found"),
            Self::Query(msg) => write!(f, "query error: {msg}"),
            Self::Transaction(msg) => write!(f, "transaction error: {msg}"),
            Self::Connection(msg) => write!(f, "connection error: {msg}"),
            Self::Queue(msg) => write!(f, "queue error: {msg}"),
            Self::Conflict { field, message } => {
                write!(f, "merge conflict on field '{field}': {message}")
            }
            Self::Parse { field, value } => {
                write!(f, "field '{field}': cannot parse value '{value}'")
            }
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for KindredError {}
