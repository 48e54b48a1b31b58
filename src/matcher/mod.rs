//! Domain-name and IP-range matchers.
//!
//! The dispatcher only sees the two traits below; the concrete sets are
//! loaded from rule files at startup and never change afterwards.

mod domain;
mod netlist;

pub use domain::DomainSet;
pub use netlist::NetList;

use std::net::IpAddr;

/// Membership test for domain names, used to force a route.
pub trait DomainMatcher: Send + Sync {
    /// `name` is lower-case without the trailing root dot.
    fn matches(&self, name: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Membership test for addresses, used by the response validator.
pub trait IpMatcher: Send + Sync {
    fn contains(&self, ip: IpAddr) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterate the meaningful lines of a rule file, skipping blanks and `#` comments.
fn rule_lines(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents.lines().enumerate().filter_map(|(idx, line)| {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        }
        .trim();
        if line.is_empty() {
            None
        } else {
            Some((idx + 1, line))
        }
    })
}
