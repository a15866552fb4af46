use crate::from_str::FromStrError;
use crate::Type;
use thiserror::Error;

#[macro_export]
macro_rules! bail {
    ($kind:ident, $($arg:tt)*) => {
        // Construct the I/O error.
        return Err(
            ::std::io::Error::new(::std::io::ErrorKind::$kind, format!($($arg)*))
        )
    };
}

/// Errors returned by the clients, the cache and the forwarder.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Http(#[from] http::Error),

    #[error(transparent)]
    Hyper(#[from] hyper::Error),

    #[error(transparent)]
    Uri(#[from] http::uri::InvalidUri),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("upstream query failed: {0}")]
    Upstream(String),

    #[error("cache store unavailable: {0}")]
    Cache(String),
}

/// Errors while converting a DoH-JSON document into a [`Message`].
///
/// [`Message`]: crate::Message
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid rcode in Status field: {0}")]
    InvalidStatus(u32),

    #[error("invalid record type: {0}")]
    InvalidType(u16),

    #[error("unable to parse {0} record data: {1}")]
    InvalidResource(Type, FromStrError),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}
