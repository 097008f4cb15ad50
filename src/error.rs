//! Error taxonomy shared by the session manager and the input stack

/// Errors raised by the automation core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The compositor or its socket never became ready
    #[error("session failed to start: {message}\n--- captured output ---\n{diagnostics}")]
    Startup { message: String, diagnostics: String },

    /// The EIS handshake was aborted or a required device never appeared
    #[error("input negotiation failed: {0}")]
    Negotiation(String),

    /// The native event-injection context could not be created or attached
    #[error("input channel setup failed: {0}")]
    ChannelSetup(String),

    /// A touch operation referenced an id that is not currently down
    #[error("unknown touch id {0}")]
    UnknownTouch(u32),

    /// No active session, no input backend, or the device is not usable
    #[error("{0}")]
    NotRunning(String),

    /// An optional helper tool is missing or failed
    #[error("{tool}: {message}")]
    ExternalTool { tool: String, message: String },

    /// Invalid caller input (button, key, finger count, ...)
    #[error("invalid argument: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),
}

impl Error {
    pub(crate) fn tool(tool: &str, message: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    /// Short hint for tool callers, if the failure has an obvious fix
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::NotRunning(_) => Some("Call session_start first"),
            Error::UnknownTouch(_) => Some("Use an id returned by a touch-down that has not been lifted"),
            Error::ExternalTool { .. } => Some("Install the helper tool inside the session environment"),
            _ => None,
        }
    }
}

impl From<zbus::fdo::Error> for Error {
    fn from(err: zbus::fdo::Error) -> Self {
        Self::DBus(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
