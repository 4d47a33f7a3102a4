use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Referenced entity does not exist. Terminal for the request.
    NotFound(Ulid),
    /// Duplicate id on create.
    AlreadyExists(Ulid),
    /// Lost the commit-time overlap check to the reservation carried here.
    /// Callers retry selection rather than treating this as a hard failure.
    Conflict(Ulid),
    /// One or more business-rule violations, reported together. The
    /// offending change is never partially applied.
    Validation(Vec<String>),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            EngineError::Validation(messages) => {
                write!(f, "validation failed: {}", messages.join("; "))
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
