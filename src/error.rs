// src/error.rs
//! Error handling for the materialization layer.
//!
//! - **Decoder failures** are captured per attempt as [`DecodeFailure`] and never escape a
//!   chain on their own; only an [`AggregateFailure`] (every decoder said no) crosses the
//!   chain boundary.
//! - **Misuse** (`NotReady`, `ReentrantLoad`, `EmptyChain`) is reported, never papered over
//!   with a default.
//! - **Deferred loads** that fail come back as `Loader { key, .. }`; the handle stays pending
//!   and can be retried.

use std::fmt;
use thiserror::Error;

/// One decoder rejecting one input.
#[derive(Debug)]
pub struct DecodeFailure {
    /// Name of the decoder that was attempted.
    pub decoder: String,
    /// Whatever the decoder reported.
    pub cause: anyhow::Error,
}

impl DecodeFailure {
    #[inline]
    pub fn new<S: Into<String>>(decoder: S, cause: anyhow::Error) -> Self {
        Self {
            decoder: decoder.into(),
            cause,
        }
    }
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed to read the data: {:#}", self.decoder, self.cause)
    }
}

impl std::error::Error for DecodeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.cause)
    }
}

/// Every decoder in a chain rejected the input. Causes are kept in attempt order.
#[derive(Debug, Default)]
pub struct AggregateFailure {
    failures: Vec<DecodeFailure>,
}

impl AggregateFailure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: DecodeFailure) {
        self.failures.push(failure);
    }

    pub fn failures(&self) -> &[DecodeFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Decoder names in the order they were tried.
    pub fn decoders(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.decoder.as_str())
    }

    pub fn into_failures(self) -> Vec<DecodeFailure> {
        self.failures
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "all {} decoder(s) failed:", self.failures.len())?;
        for failure in &self.failures {
            writeln!(f, "\t{}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateFailure {}

/// Main error type of the crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O while opening or reading a byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single decoder rejected its input.
    #[error(transparent)]
    Decode(#[from] DecodeFailure),

    /// Every decoder in the chain rejected the input.
    #[error("{0}")]
    Aggregate(#[from] AggregateFailure),

    /// A chain was asked to decode with no decoders configured.
    #[error("decode chain has no decoders configured")]
    EmptyChain,

    /// A derived property was queried before any decode succeeded.
    #[error("attempt to query {0} before a successful decode")]
    NotReady(&'static str),

    /// The same key was requested again while it was being materialized.
    #[error("re-entrant load of `{key}` while it is already being materialized")]
    ReentrantLoad { key: String },

    /// Materializing a deferred resource failed; the handle stays pending.
    #[error("failed to materialize deferred resource `{key}`: {source}")]
    Loader {
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// The byte source cannot be rewound to its mark.
    #[error("byte source does not support mark/reset")]
    NotSeekable,

    /// No configured location could resolve the reference.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The cache that owned a deferred handle has been dropped.
    #[error("deferred handle `{0}` outlived its resource cache")]
    Detached(String),

    /// Simple custom message (allocation only when error happens).
    #[error("{0}")]
    Custom(String),

    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Add context to any error (chainable, like `.context()` in anyhow).
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Wrap a failed materialization of `key`.
    ///
    /// Misuse errors pass through untouched so they stay recognisable.
    #[inline]
    pub fn loader<K: Into<String>>(key: K, source: Error) -> Self {
        match source {
            e @ (Error::ReentrantLoad { .. } | Error::Detached(_) | Error::Loader { .. }) => e,
            other => Self::Loader {
                key: key.into(),
                source: Box::new(other),
            },
        }
    }

    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    #[inline]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Error::Aggregate(_))
    }

    #[inline]
    pub fn is_reentrant(&self) -> bool {
        matches!(self, Error::ReentrantLoad { .. })
    }

    #[inline]
    pub fn is_loader(&self) -> bool {
        matches!(self, Error::Loader { .. })
    }

    #[inline]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady(_))
    }

    /// Finds the aggregate failure, looking through `Loader` and context wrappers.
    pub fn as_aggregate(&self) -> Option<&AggregateFailure> {
        match self {
            Error::Aggregate(agg) => Some(agg),
            Error::Loader { source, .. } | Error::WithContext { source, .. } => {
                source.as_aggregate()
            }
            _ => None,
        }
    }
}

/// `Result` alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
