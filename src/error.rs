/// Result type alias for the framework
pub type Result<T> = std::result::Result<T, Error>;

/// Error types raised while building or serving the route table
#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),
    SerializationError(String),
    /// A handler parameter cannot be classified for its route.
    InvalidParameter {
        route: String,
        index: usize,
        message: String,
    },
    InvalidRoute {
        route: String,
        message: String,
    },
    DuplicateRoute(String),
    MuxError(String),
    NotInitialized,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "IO error: {}", e),
            Error::SerializationError(msg) => write!(f, "serialization error: {}", msg),
            Error::InvalidParameter {
                route,
                index,
                message,
            } => write!(f, "route {} parameter {}: {}", route, index, message),
            Error::InvalidRoute { route, message } => {
                write!(f, "invalid route {}: {}", route, message)
            }
            Error::DuplicateRoute(id) => write!(f, "route already registered: {}", id),
            Error::MuxError(msg) => write!(f, "mux error: {}", msg),
            Error::NotInitialized => write!(f, "application routes are not initialized"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(format!("JSON: {}", err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::SerializationError(format!("YAML: {}", err))
    }
}
