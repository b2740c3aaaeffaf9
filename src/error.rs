use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    Http(reqwest::Error),

    #[from]
    HttpHeader(hyper::http::Error),

    #[from]
    Io(std::io::Error),

    /// The resolved watch uri is not an absolute url or lacks a watch segment
    InvalidWatchUri(String),

    /// The resource descriptor does not declare a verb the caller needs
    VerbNotSupported { resource: String, verb: String },

    /// Custom error message
    Custom(String),
}

impl Error {
    /// True for errors raised while validating constructor arguments
    #[must_use]
    pub const fn is_construction(&self) -> bool {
        matches!(self, Self::InvalidWatchUri(_) | Self::VerbNotSupported { .. })
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::InvalidWatchUri(uri) => write!(fmt, "uri '{uri}' not valid watch uri."),
            Self::VerbNotSupported { resource, verb } => {
                write!(fmt, "Resource '{resource}' does not support verb \"{verb}\"")
            }
            Self::Custom(message) => write!(fmt, "{message}"),
            _ => write!(fmt, "{self:?}"),
        }
    }
}

impl std::error::Error for Error {}
