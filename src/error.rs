// src/error.rs

use std::error::Error as StdError;
use std::fmt;

use url::Url;

/// A `Result` alias where the `Err` case is `httpauth::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// The boxed cause carried by an [`Error`].
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The Errors that may occur while negotiating HTTP authentication.
///
/// Every error falls into exactly one [`Severity`]. The controller uses it to
/// decide whether to drop the current identity, disable the scheme for the
/// rest of the transaction, or abort the transaction.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    origin: Option<Url>,
}

/// How a failed token generation is handled by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The scheme cannot work for this transaction; it is disabled and
    /// selection falls through to the next offered scheme.
    SchemeFatal,
    /// The identity was refused; it is discarded and the same scheme may be
    /// retried with fresh credentials.
    IdentityFatal,
    /// Any other failure; the transaction is aborted with this error.
    TransactionFatal,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                origin: None,
            }),
        }
    }

    /// Returns the origin related to this error, if any.
    pub fn origin(&self) -> Option<&Url> {
        self.inner.origin.as_ref()
    }

    /// Returns a mutable reference to the origin related to this error.
    pub fn origin_mut(&mut self) -> Option<&mut Url> {
        self.inner.origin.as_mut()
    }

    /// Add an origin related to this error (overwriting any existing).
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.inner.origin = Some(origin);
        self
    }

    /// Strip the related origin from this error.
    pub fn without_origin(mut self) -> Self {
        self.inner.origin = None;
        self
    }

    /// Classify this error for the controller's triage.
    pub fn severity(&self) -> Severity {
        match self.inner.kind {
            Kind::MissingAuthCredentials
            | Kind::UnsupportedAuthScheme
            | Kind::UnexpectedSecurityLibraryStatus
            | Kind::UndocumentedSecurityLibraryStatus
            | Kind::MisconfiguredAuthEnvironment => Severity::SchemeFatal,
            Kind::InvalidAuthCredentials | Kind::InvalidHandle => Severity::IdentityFatal,
            Kind::InvalidResponse
            | Kind::ProxyAuthUnsupported
            | Kind::TooManyRounds
            | Kind::Transport
            | Kind::Failed => Severity::TransactionFatal,
        }
    }

    /// Returns true if the scheme should be disabled for the transaction.
    pub fn is_scheme_fatal(&self) -> bool {
        self.severity() == Severity::SchemeFatal
    }

    /// Returns true if only the identity should be discarded.
    pub fn is_identity_fatal(&self) -> bool {
        self.severity() == Severity::IdentityFatal
    }

    /// Returns true if the transaction must be aborted.
    pub fn is_transaction_fatal(&self) -> bool {
        self.severity() == Severity::TransactionFatal
    }

    /// Returns true if a challenge could not be parsed.
    pub fn is_invalid_response(&self) -> bool {
        matches!(self.inner.kind, Kind::InvalidResponse)
    }

    /// Returns true if no handler exists for the offered scheme.
    pub fn is_unsupported_scheme(&self) -> bool {
        matches!(self.inner.kind, Kind::UnsupportedAuthScheme)
    }

    /// Returns true if a proxy demanded authentication while a tunnel was
    /// being established and no offered scheme was usable.
    pub fn is_proxy_auth_unsupported(&self) -> bool {
        matches!(self.inner.kind, Kind::ProxyAuthUnsupported)
    }

    /// Returns true if the handshake exceeded its round-trip limit.
    pub fn is_too_many_rounds(&self) -> bool {
        matches!(self.inner.kind, Kind::TooManyRounds)
    }

    /// Returns true if the error came from the request transport.
    pub fn is_transport(&self) -> bool {
        matches!(self.inner.kind, Kind::Transport)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("httpauth::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref origin) = self.inner.origin {
            builder.field("origin", &origin.as_str());
        }
        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::InvalidResponse => f.write_str("invalid authentication challenge")?,
            Kind::UnsupportedAuthScheme => f.write_str("unsupported authentication scheme")?,
            Kind::InvalidAuthCredentials => f.write_str("invalid authentication credentials")?,
            Kind::MissingAuthCredentials => f.write_str("missing authentication credentials")?,
            Kind::InvalidHandle => f.write_str("invalid security context handle")?,
            Kind::UnexpectedSecurityLibraryStatus => {
                f.write_str("unexpected security library status")?
            }
            Kind::UndocumentedSecurityLibraryStatus => {
                f.write_str("undocumented security library status")?
            }
            Kind::MisconfiguredAuthEnvironment => {
                f.write_str("misconfigured authentication environment")?
            }
            Kind::ProxyAuthUnsupported => {
                f.write_str("proxy requested an unsupported authentication scheme")?
            }
            Kind::TooManyRounds => f.write_str("too many authentication round trips")?,
            Kind::Transport => f.write_str("error sending request")?,
            Kind::Failed => f.write_str("authentication failed")?,
        }

        if let Some(origin) = &self.inner.origin {
            write!(f, " for {}", origin)?;
        }

        if let Some(e) = &self.inner.source {
            write!(f, ": {}", e)?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    InvalidResponse,
    UnsupportedAuthScheme,
    InvalidAuthCredentials,
    MissingAuthCredentials,
    InvalidHandle,
    UnexpectedSecurityLibraryStatus,
    UndocumentedSecurityLibraryStatus,
    MisconfiguredAuthEnvironment,
    ProxyAuthUnsupported,
    TooManyRounds,
    Transport,
    Failed,
}

// constructors

/// A challenge was malformed.
pub fn invalid_response<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::InvalidResponse, Some(e))
}

/// No handler is available for the scheme.
pub fn unsupported_scheme<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::UnsupportedAuthScheme, Some(e))
}

/// The server refused the identity.
pub fn invalid_credentials<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::InvalidAuthCredentials, Some(e))
}

/// The scheme needs credentials that are not available.
pub fn missing_credentials<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::MissingAuthCredentials, Some(e))
}

/// The security library lost or rejected its context handle.
pub fn invalid_handle<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::InvalidHandle, Some(e))
}

/// The security library returned a status it should not have.
pub fn unexpected_library_status<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::UnexpectedSecurityLibraryStatus, Some(e))
}

/// The security library returned a status nobody knows about.
pub fn undocumented_library_status<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::UndocumentedSecurityLibraryStatus, Some(e))
}

/// The local environment cannot support the scheme (no realm, no keytab).
pub fn misconfigured_environment<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::MisconfiguredAuthEnvironment, Some(e))
}

/// The request could not be delivered.
pub fn transport<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Transport, Some(e))
}

/// Catch-all failure; always aborts the transaction.
pub fn failed<E: Into<BoxError>>(e: E) -> Error {
    Error::new(Kind::Failed, Some(e))
}

pub(crate) fn proxy_auth_unsupported() -> Error {
    Error::new(Kind::ProxyAuthUnsupported, None::<Error>)
}

pub(crate) fn too_many_rounds(rounds: usize) -> Error {
    Error::new(
        Kind::TooManyRounds,
        Some(format!("gave up after {} round trips", rounds)),
    )
}
