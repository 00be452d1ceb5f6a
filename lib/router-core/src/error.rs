use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Route not found")]
    RouteNotFound,

    #[error("Duplicate route")]
    DuplicateRoute,

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Watcher stopped")]
    WatcherStopped,

    #[error("Router not running")]
    NotRunning,

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Invalid router configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed applying advert event {event}: {source}")]
    Process {
        event: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Configuration parse error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
