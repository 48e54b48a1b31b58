//! Trusted-range validation of local answers.

use hickory_proto::op::Message;
use std::sync::Arc;

use crate::dns::answer_addresses;
use crate::matcher::IpMatcher;

/// Outcome of checking a response against the trusted IP range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// At least one address record lies inside the range.
    InRange,
    /// Address records are present but none is inside the range.
    OutOfRange,
    /// No A/AAAA record to judge (NXDOMAIN, NODATA, other types).
    NoAddress,
}

impl Verdict {
    /// Whether a local answer with this verdict may be accepted without
    /// waiting for the remote group.
    pub fn is_acceptable(self) -> bool {
        !matches!(self, Verdict::OutOfRange)
    }
}

#[derive(Clone)]
pub struct ResponseValidator {
    trusted: Arc<dyn IpMatcher>,
}

impl ResponseValidator {
    pub fn new(trusted: Arc<dyn IpMatcher>) -> Self {
        Self { trusted }
    }

    pub fn validate(&self, response: &Message) -> Verdict {
        let mut saw_address = false;
        for ip in answer_addresses(response) {
            if self.trusted.contains(ip) {
                return Verdict::InRange;
            }
            saw_address = true;
        }
        if saw_address {
            Verdict::OutOfRange
        } else {
            Verdict::NoAddress
        }
    }
}
