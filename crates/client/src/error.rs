use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A required constructor argument is missing or unusable. Never
    /// retried.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// A required call argument is missing or empty. Fatal to that single
    /// call, never retried.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// A second start on a component whose lifecycle is one-shot.
    #[error("{component} is already running")]
    AlreadyRunning { component: &'static str },

    /// A service response the client could not accept.
    #[error("{message}")]
    Message { message: String },

    /// An underlying communication failure. Retried per the active retry
    /// policy.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn already_running(component: &'static str) -> Self {
        Self::AlreadyRunning { component }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
