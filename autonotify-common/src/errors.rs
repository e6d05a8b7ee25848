//! Errors shared by the notification crates

use std::fmt::{self, Display};
use std::io;

use backtrace::Backtrace; // Sentry 0.32 uses the backtrace crate, not std::backtrace

use thiserror::Error;

/// Autonotify Common error (To distinguish from the service's ApiError)
#[derive(Debug)]
pub struct CommonError {
    pub kind: CommonErrorKind,
    pub backtrace: Box<Backtrace>,
}

// Print out the error and backtrace, including source errors
impl Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}\nBacktrace: \n{:?}", self.kind, self.backtrace)?;

        // Go down the chain of errors
        let mut error: &dyn std::error::Error = &self.kind;
        while let Some(source) = error.source() {
            write!(f, "\n\nCaused by: {source}")?;
            error = source;
        }

        Ok(())
    }
}

impl std::error::Error for CommonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

// Forward From impls to CommonError from CommonErrorKind. Because From is
// reflexive, this impl also takes care of From<CommonErrorKind>.
impl<T> From<T> for CommonError
where
    CommonErrorKind: From<T>,
{
    fn from(item: T) -> Self {
        CommonError {
            kind: CommonErrorKind::from(item),
            backtrace: Box::new(Backtrace::new()),
        }
    }
}

#[derive(Error, Debug)]
pub enum CommonErrorKind {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    MetricError(#[from] cadence::MetricError),
}

pub type Result<T> = std::result::Result<T, CommonError>;
