//! Fork targets and their lifecycle.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sip_core::SipUri;
use smol_str::SmolStr;

/// Client transaction id of a branch. The branch parameter of the Via the
/// proxy inserts doubles as the id.
pub type TransactionId = SmolStr;

/// Generates an RFC 3261 branch id (`z9hG4bK` magic cookie + random suffix).
pub fn generate_branch_id() -> TransactionId {
    let mut rng = rand::thread_rng();
    let suffix: String = (&mut rng)
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    SmolStr::new(format!("z9hG4bK{}", suffix))
}

/// Contact q-value in thousandths, `0..=1000`.
///
/// ```
/// use sip_proxy::QValue;
///
/// assert_eq!(QValue::parse("0.5"), Some(QValue::from_millis(500)));
/// assert_eq!(QValue::parse("1"), Some(QValue::MAX));
/// assert!(QValue::parse("1.5").is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QValue(u16);

impl QValue {
    pub const MAX: QValue = QValue(1000);
    pub const MIN: QValue = QValue(0);

    pub fn from_millis(millis: u16) -> Self {
        QValue(millis.min(1000))
    }

    pub fn millis(&self) -> u16 {
        self.0
    }

    /// Parses `qvalue = ( "0" [ "." 0*3DIGIT ] ) / ( "1" [ "." 0*3("0") ] )`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (int, frac) = input.split_once('.').unwrap_or((input, ""));
        if frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let mut millis: u16 = 0;
        for (i, digit) in frac.bytes().enumerate() {
            millis += u16::from(digit - b'0') * [100, 10, 1][i];
        }
        match int {
            "0" => Some(QValue(millis)),
            "1" if millis == 0 => Some(QValue::MAX),
            _ => None,
        }
    }
}

impl Default for QValue {
    fn default() -> Self {
        QValue::MAX
    }
}

impl fmt::Display for QValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

/// Lifecycle of a fork target.
///
/// `Pending → Candidate → Trying → Proceeding → {WaitingToCancel, Cancelled,
/// Terminated}`; `Terminated` is reachable from every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetStatus {
    /// Created but not yet handed to a response context.
    Pending,
    /// Accepted, client transaction not started.
    Candidate,
    /// Client transaction started, no provisional yet.
    Trying,
    /// At least one provisional received.
    Proceeding,
    /// Cancel requested before any provisional; CANCEL goes out on the first 1xx.
    WaitingToCancel,
    /// CANCEL sent, waiting for the final response.
    Cancelled,
    Terminated,
}

impl TargetStatus {
    /// States held in the active partition.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TargetStatus::Trying
                | TargetStatus::Proceeding
                | TargetStatus::WaitingToCancel
                | TargetStatus::Cancelled
        )
    }
}

/// One forked destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    uri: SipUri,
    tid: TransactionId,
    q: QValue,
    status: TargetStatus,
}

impl Target {
    /// New target with a fresh branch id. The q-value is taken from a `q`
    /// URI parameter when present.
    pub fn new(uri: SipUri) -> Self {
        let q = uri.param("q").and_then(QValue::parse).unwrap_or_default();
        Self {
            uri,
            tid: generate_branch_id(),
            q,
            status: TargetStatus::Pending,
        }
    }

    pub fn with_q(mut self, q: QValue) -> Self {
        self.q = q;
        self
    }

    /// Uses a caller supplied branch id instead of a random one.
    pub fn with_tid(mut self, tid: impl Into<TransactionId>) -> Self {
        self.tid = tid.into();
        self
    }

    pub fn uri(&self) -> &SipUri {
        &self.uri
    }

    pub fn tid(&self) -> &TransactionId {
        &self.tid
    }

    pub fn q(&self) -> QValue {
        self.q
    }

    pub fn status(&self) -> TargetStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: TargetStatus) {
        self.status = status;
    }
}
