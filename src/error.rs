use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Loading env({path}): {message}")]
    EnvFile { path: String, message: String },

    #[error("prefix {prefix} is duplicated")]
    DuplicatePrefix { prefix: String },

    #[error("flag {name} is registered more than once")]
    DuplicateFlag { name: String },

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("Flag error: {message}")]
    Flag { message: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Runnable {component} failed: {source}")]
    RunnableFailed {
        component: String,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl ServiceError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>, M: Into<String>>(component: S, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
