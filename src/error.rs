use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to invalid connection or operation configuration
    Configuration,
    /// Error related to the WebSocket transport
    WebSocket,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Error indicating that a connection key was never configured on the pool.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct UnknownConnection {
    pub key: String,
}

impl fmt::Display for UnknownConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no connection configured for key `{}`", self.key)
    }
}

impl StdError for UnknownConnection {}

impl From<UnknownConnection> for Error {
    fn from(err: UnknownConnection) -> Self {
        Error::with_source(Kind::Configuration, err)
    }
}

/// Error indicating that an operation method was never registered.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct UnknownOperation {
    pub method: String,
}

impl fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no operation registered for method `{}`", self.method)
    }
}

impl StdError for UnknownOperation {}

impl From<UnknownOperation> for Error {
    fn from(err: UnknownOperation) -> Self {
        Error::with_source(Kind::Configuration, err)
    }
}

/// Error indicating a send was attempted while the socket is not open.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct NotOpen;

impl fmt::Display for NotOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket is not open")
    }
}

impl StdError for NotOpen {}

impl From<NotOpen> for Error {
    fn from(err: NotOpen) -> Self {
        Error::with_source(Kind::WebSocket, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Configuration, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::with_source(Kind::WebSocket, e)
    }
}
