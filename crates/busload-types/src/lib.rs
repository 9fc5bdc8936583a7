//! `busload-types` – shared vocabulary for the bus load bridge.
//!
//! Every crate in the workspace speaks in these types: endpoint names, the
//! fragment delivery policy, the outgoing write plan, and the single error
//! enum whose `Display` output is also the string form handed back to load
//! scripts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the container and member halves of an endpoint name.
pub const ENDPOINT_SEPARATOR: &str = "::";

/// Reader the bridge uses when nothing else is configured.
pub const DEFAULT_READER: (&str, &str) = ("MySubscriber", "MyReader");

/// Writer the bridge uses when nothing else is configured.
pub const DEFAULT_WRITER: (&str, &str) = ("MyPublisher", "MyWriter");

// ────────────────────────────────────────────────────────────────────────────
// Endpoint references
// ────────────────────────────────────────────────────────────────────────────

/// Two-part name of an input or output on the bus, e.g.
/// `"MySubscriber::MyReader"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointRef {
    scope: String,
    member: String,
}

impl EndpointRef {
    /// Build a reference from its two halves.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidArgument`] when either half is empty.
    pub fn new(scope: impl Into<String>, member: impl Into<String>) -> Result<Self, BridgeError> {
        let scope = scope.into();
        let member = member.into();
        if scope.is_empty() || member.is_empty() {
            return Err(BridgeError::InvalidArgument(format!(
                "endpoint name needs both halves, got '{scope}{ENDPOINT_SEPARATOR}{member}'"
            )));
        }
        Ok(Self { scope, member })
    }

    /// Parse `"Scope::Member"`, splitting on the first separator.
    pub fn parse(name: &str) -> Result<Self, BridgeError> {
        match name.split_once(ENDPOINT_SEPARATOR) {
            Some((scope, member)) => Self::new(scope, member),
            None => Err(BridgeError::InvalidArgument(format!(
                "endpoint name '{name}' is missing the '{ENDPOINT_SEPARATOR}' separator"
            ))),
        }
    }

    /// [`DEFAULT_READER`] as a reference.
    pub fn default_reader() -> Self {
        Self {
            scope: DEFAULT_READER.0.to_string(),
            member: DEFAULT_READER.1.to_string(),
        }
    }

    /// [`DEFAULT_WRITER`] as a reference.
    pub fn default_writer() -> Self {
        Self {
            scope: DEFAULT_WRITER.0.to_string(),
            member: DEFAULT_WRITER.1.to_string(),
        }
    }

    /// The publisher/subscriber half of the name.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The writer/reader half of the name.
    pub fn member(&self) -> &str {
        &self.member
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ENDPOINT_SEPARATOR}{}", self.scope, self.member)
    }
}

impl FromStr for EndpointRef {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EndpointRef {
    type Error = BridgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EndpointRef> for String {
    fn from(value: EndpointRef) -> Self {
        value.to_string()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Delivery policy / direction
// ────────────────────────────────────────────────────────────────────────────

/// How the fragment reassembler treats the samples of each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Reliable, in-order delivery: every valid sample of every batch is one
    /// fragment of the message.
    #[default]
    Sequenced,
    /// Best-effort delivery: only the sample at batch offset 0 counts, the
    /// rest of the batch is ignored.
    LatestOnly,
}

impl DeliveryPolicy {
    /// Map the legacy `reliable` flag onto a policy.
    pub fn from_reliable(reliable: bool) -> Self {
        if reliable {
            DeliveryPolicy::Sequenced
        } else {
            DeliveryPolicy::LatestOnly
        }
    }
}

impl fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryPolicy::Sequenced => write!(f, "sequenced"),
            DeliveryPolicy::LatestOnly => write!(f, "latest_only"),
        }
    }
}

impl FromStr for DeliveryPolicy {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequenced" | "reliable" => Ok(DeliveryPolicy::Sequenced),
            "latest_only" | "latest" | "best_effort" => Ok(DeliveryPolicy::LatestOnly),
            other => Err(BridgeError::InvalidArgument(format!(
                "unknown delivery policy '{other}'"
            ))),
        }
    }
}

impl From<bool> for DeliveryPolicy {
    fn from(reliable: bool) -> Self {
        Self::from_reliable(reliable)
    }
}

/// Which side of the bus a call touches. Each direction has its own lock and
/// its own cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Reader,
    Writer,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Reader => write!(f, "reader"),
            Direction::Writer => write!(f, "writer"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Write plan
// ────────────────────────────────────────────────────────────────────────────

/// An outgoing payload together with its chunking and pacing.
///
/// The payload is emitted one chunk (stride) at a time and one byte at a time
/// within a chunk; after every byte the writer pauses for
/// [`byte_pause`][WritePlan::byte_pause].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePlan {
    payload: Vec<u8>,
    chunk_size: usize,
    rate: u64,
}

impl WritePlan {
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidArgument`] when `chunk_size` is zero.
    pub fn new(payload: Vec<u8>, chunk_size: usize, rate: u64) -> Result<Self, BridgeError> {
        if chunk_size == 0 {
            return Err(BridgeError::InvalidArgument(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            payload,
            chunk_size,
            rate,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Number of strides needed to cover the payload: `ceil(len / chunk_size)`.
    pub fn stride_count(&self) -> usize {
        self.payload.len().div_ceil(self.chunk_size)
    }

    /// Iterate the payload stride by stride. The last stride may be short.
    pub fn strides(&self) -> std::slice::Chunks<'_, u8> {
        self.payload.chunks(self.chunk_size)
    }

    /// Pause after each byte: `rate / chunk_size` milliseconds, integer
    /// division. Truncates to zero whenever `chunk_size > rate`.
    pub fn byte_pause(&self) -> Duration {
        Duration::from_millis(self.rate / self.chunk_size as u64)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Every failure the bridge can report.
///
/// The `Display` strings are the exact texts returned to load scripts, so
/// scripts that pattern-match on them keep working.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("RTI Connector not initialized")]
    NotInitialized,

    #[error("Failed to get input")]
    InputNotFound(EndpointRef),

    #[error("Failed to get output")]
    OutputNotFound(EndpointRef),

    #[error("No data available")]
    NoData,

    #[error("Failed to UnMarshal data: {0}")]
    Decode(String),

    #[error("Failed to read data: {0}")]
    Read(String),

    #[error("Failed to write data: {0}")]
    Write(String),

    #[error("Failed to create RTI Connector: {0}")]
    Connector(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// `true` for failures that leave the process without a usable connector.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Connector(_) | BridgeError::Config(_))
    }
}

/// Convert a script-supplied integer argument, rejecting negatives (and
/// values the target type cannot hold) as [`BridgeError::InvalidArgument`].
pub fn non_negative<T: TryFrom<i64>>(value: i64, what: &str) -> Result<T, BridgeError> {
    T::try_from(value)
        .ok()
        .filter(|_| value >= 0)
        .ok_or_else(|| BridgeError::InvalidArgument(format!("{what} must be non-negative, got {value}")))
}
