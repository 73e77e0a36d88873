//! W3C trace identity carried by every instrumented request.
//!
//! The `traceparent` header format is `version-traceId-spanId-flags`:
//!
//! ```text
//! traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01
//! ```

use rand::Rng;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// HTTP header key for W3C traceparent.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Version, 32-hex trace id, 16-hex span id, flags, optional future-version suffix.
static TRACEPARENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-f0-9]{2})-([a-f0-9]{32})-([a-f0-9]{16})-([a-f0-9]{2})(-.*)?$")
        .expect("traceparent regex is valid")
});

const SAMPLED_FLAG: u8 = 0x01;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceparentError {
    #[error("Malformed traceparent: {0}")]
    Malformed(String),
    #[error("Unsupported traceparent version: {0}")]
    UnsupportedVersion(String),
    #[error("Trace id must not be all zeros")]
    ZeroTraceId,
    #[error("Span id must not be all zeros")]
    ZeroSpanId,
}

/// 128-bit trace identifier. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    pub fn random() -> Self {
        let mut rng = rand::rng();
        loop {
            let value: u128 = rng.random();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        u128::from_str_radix(hex, 16)
            .ok()
            .filter(|value| *value != 0)
            .map(Self)
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// 64-bit span identifier. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    pub fn random() -> Self {
        let mut rng = rand::rng();
        loop {
            let value: u64 = rng.random();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        u64::from_str_radix(hex, 16)
            .ok()
            .filter(|value| *value != 0)
            .map(Self)
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identity of one step of a distributed operation.
///
/// Immutable once built: continuing a trace or opening a child step always
/// produces a new value through [`TraceContext::child`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    sampled: bool,
    parent_span_id: Option<SpanId>,
}

impl TraceContext {
    /// Starts a new trace with random ids.
    pub fn new_root() -> Self {
        Self {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            sampled: true,
            parent_span_id: None,
        }
    }

    /// Parses an inbound `traceparent` header into the remote caller's context.
    pub fn from_traceparent(header: &str) -> Result<Self, TraceparentError> {
        let header = header.trim();
        let captures = TRACEPARENT_REGEX
            .captures(header)
            .ok_or_else(|| TraceparentError::Malformed(header.to_string()))?;

        let version = &captures[1];
        if version.eq_ignore_ascii_case("ff") {
            return Err(TraceparentError::UnsupportedVersion(version.to_string()));
        }
        // Version 00 defines exactly four fields.
        if version == "00" && captures.get(5).is_some() {
            return Err(TraceparentError::Malformed(header.to_string()));
        }

        let trace_id = TraceId::from_hex(&captures[2]).ok_or(TraceparentError::ZeroTraceId)?;
        let span_id = SpanId::from_hex(&captures[3]).ok_or(TraceparentError::ZeroSpanId)?;
        let flags = u8::from_str_radix(&captures[4], 16)
            .map_err(|_| TraceparentError::Malformed(header.to_string()))?;

        Ok(Self {
            trace_id,
            span_id,
            sampled: flags & SAMPLED_FLAG == SAMPLED_FLAG,
            parent_span_id: None,
        })
    }

    /// Continues the inbound trace when the header is well-formed, otherwise
    /// starts a new one. The returned context is always a fresh local span.
    pub fn continue_or_start(traceparent: Option<&str>) -> Self {
        match traceparent.map(Self::from_traceparent) {
            Some(Ok(remote)) => remote.child(),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "ignoring invalid traceparent");
                Self::new_root()
            }
            None => Self::new_root(),
        }
    }

    /// A new span in the same trace whose parent is this span.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            sampled: self.sampled,
            parent_span_id: Some(self.span_id),
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn sampled(&self) -> bool {
        self.sampled
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    pub fn flags(&self) -> u8 {
        if self.sampled { SAMPLED_FLAG } else { 0 }
    }

    /// Renders the outbound propagation header for downstream calls.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags())
    }
}
