//! Error types and result definitions for harness operations.
//!
//! [`HarnessError`] carries an [`ErrorKind`] classification, a static description, optional
//! dynamic detail, an optional source error and the call site that raised it. Failures from
//! several workers can be aggregated into a single error.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Result type used throughout the harness.
pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the harness.
#[derive(Debug, Clone)]
pub struct HarnessError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Aggregated failures, used when several workers fail in the same run.
    Many {
        errors: Vec<HarnessError>,
        location: &'static Location<'static>,
    },
}

/// Classification of harness failures.
///
/// The first four kinds are the failure modes observed while driving the pipeline; the rest
/// come from the harness' own plumbing.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Source, destination or control channel could not be reached.
    ConnectionError,
    /// The source rejected a row insert.
    WriteError,
    /// A count probe returned a negative or non-numeric reading.
    ProbeError,
    /// A fault action could not be executed because the control path failed.
    FaultControlError,

    // Scenario errors
    ScenarioTimedOut,
    InvalidScenario,
    WorkerPanic,

    // Plumbing errors
    ConfigError,
    ConversionError,
    IoError,
    SerializationError,
    DeserializationError,

    Unknown,

    #[cfg(feature = "failpoints")]
    FailpointTriggered,
}

impl ErrorKind {
    /// Returns `true` when a failure of this kind means the test infrastructure itself is
    /// unreliable and the whole scenario must be aborted.
    ///
    /// Every other kind is captured on the worker or probe that raised it.
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            ErrorKind::FaultControlError | ErrorKind::ProbeError | ErrorKind::ScenarioTimedOut
        )
    }
}

impl HarnessError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// Aggregates report the kind of their first error, or [`ErrorKind::Unknown`] when empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.description.as_ref(),
            ErrorRepr::Many { .. } => "Multiple errors occurred",
        }
    }

    /// Returns the dynamic detail, or the first one found in an aggregate.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error. No effect on aggregates.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        HarnessError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for HarnessError {
    fn eq(&self, other: &HarnessError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => {
                a.kind == b.kind && a.description == b.description
            }
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for HarnessError {}

impl Hash for HarnessError {
    /// Hashes the kind and static description only, so repeated occurrences of the same
    /// failure group together regardless of detail or call site.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_block(f, "Detail", payload.detail.as_deref())?;
                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_block(f, "Backtrace", Some(&backtrace))?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    errors.len(),
                    if errors.len() == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes an indented, labelled block such as the detail or backtrace.
fn write_block(f: &mut fmt::Formatter<'_>, label: &str, content: Option<&str>) -> fmt::Result {
    let Some(content) = content else {
        return Ok(());
    };

    if content.trim().is_empty() {
        return write!(f, "\n  {label}: <empty>");
    }

    write!(f, "\n  {label}:")?;
    for line in content.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for HarnessError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> HarnessError {
        HarnessError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for HarnessError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> HarnessError {
        HarnessError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors; a single error is returned unwrapped.
impl<E> From<Vec<E>> for HarnessError
where
    E: Into<HarnessError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> HarnessError {
        let location = Location::caller();
        let mut errors: Vec<HarnessError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        HarnessError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for HarnessError {
    #[track_caller]
    fn from(err: std::io::Error) -> HarnessError {
        let detail = err.to_string();
        HarnessError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for HarnessError {
    #[track_caller]
    fn from(err: serde_json::Error) -> HarnessError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::DeserializationError, "JSON deserialization failed")
            }
        };

        let detail = err.to_string();
        HarnessError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::num::ParseIntError> for HarnessError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> HarnessError {
        let detail = err.to_string();
        HarnessError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Integer parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps [`sqlx::Error`]: transport failures become [`ErrorKind::ConnectionError`] and
/// statements rejected by the database become [`ErrorKind::WriteError`].
impl From<sqlx::Error> for HarnessError {
    #[track_caller]
    fn from(err: sqlx::Error) -> HarnessError {
        let (kind, description) = match &err {
            sqlx::Error::Database(_) => {
                (ErrorKind::WriteError, "Source database rejected the statement")
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => {
                (ErrorKind::ConnectionError, "Source database connection failed")
            }
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "Source database configuration is invalid")
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => (
                ErrorKind::ConversionError,
                "Source database value could not be decoded",
            ),
            _ => (ErrorKind::Unknown, "Source database operation failed"),
        };

        let detail = err.to_string();
        HarnessError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
