//! Client IP exclusion.
//!
//! Entries are either a single IPv4 address or an inclusive `start-end`
//! range. A malformed entry never blocks the rest of the list.

use std::net::Ipv4Addr;

use crate::error::GateError;

/// Closed range of IPv4 addresses in their numeric form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpRange {
    start: u32,
    end: u32,
}

impl IpRange {
    /// Parse `a.b.c.d` or `a.b.c.d-e.f.g.h`.
    ///
    /// # Errors
    /// Returns `GateError::PolicyMatch` if either bound is not an IPv4 address.
    pub fn parse(entry: &str) -> Result<Self, GateError> {
        let entry = entry.trim();
        match entry.split_once('-') {
            Some((start, end)) => Ok(Self {
                start: parse_addr(entry, start)?,
                end: parse_addr(entry, end)?,
            }),
            None => {
                let single = parse_addr(entry, entry)?;
                Ok(Self {
                    start: single,
                    end: single,
                })
            }
        }
    }

    #[must_use]
    pub fn contains(&self, ip: u32) -> bool {
        ip >= self.start && ip <= self.end
    }
}

fn parse_addr(entry: &str, value: &str) -> Result<u32, GateError> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|e| GateError::PolicyMatch {
            entry: entry.to_string(),
            reason: e.to_string(),
        })
}

/// Outcome of the client-IP check with the entries that could not be used.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IpExclusion {
    pub excluded: bool,
    pub matched_entry: Option<String>,
    /// One message per unparsable client IP or exclusion entry.
    pub skipped: Vec<String>,
}

/// Check `client_ip` against every exclusion entry and keep the trace.
#[must_use]
pub fn check_ip_exclusion<S: AsRef<str>>(client_ip: &str, exclusions: &[S]) -> IpExclusion {
    let mut result = IpExclusion::default();
    let ip = match client_ip.trim().parse::<Ipv4Addr>() {
        Ok(addr) => u32::from(addr),
        Err(e) => {
            result
                .skipped
                .push(format!("client IP {client_ip:?} is not an IPv4 address: {e}"));
            return result;
        }
    };

    for entry in exclusions {
        let entry = entry.as_ref();
        match IpRange::parse(entry) {
            Ok(range) if range.contains(ip) => {
                result.excluded = true;
                result.matched_entry = Some(entry.to_string());
                break;
            }
            Ok(_) => {}
            Err(e) => result.skipped.push(format!("skipping exclusion entry: {e}")),
        }
    }

    result
}

/// Return true when `client_ip` falls inside any exclusion entry.
#[must_use]
pub fn matches_ip_exclusion<S: AsRef<str>>(client_ip: &str, exclusions: &[S]) -> bool {
    check_ip_exclusion(client_ip, exclusions).excluded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_with_bad_entry() {
        let list = ["10.0.0.5-10.0.0.9", "bad-entry"];
        assert!(matches_ip_exclusion("10.0.0.7", &list));
        assert!(!matches_ip_exclusion("10.0.0.10", &list));
    }

    #[test]
    fn skipped_entries_are_reported() {
        let result = check_ip_exclusion("10.0.0.7", &["bad-entry", "10.0.0.5-10.0.0.9"]);
        assert!(result.excluded);
        assert_eq!(result.matched_entry.as_deref(), Some("10.0.0.5-10.0.0.9"));
        assert_eq!(result.skipped.len(), 1);
        assert!(result.skipped[0].contains("bad-entry"));

        let result = check_ip_exclusion("not-an-ip", &["10.0.0.5"]);
        assert!(!result.excluded);
        assert_eq!(result.skipped.len(), 1);
        assert!(result.skipped[0].starts_with("client IP"));
    }

    #[test]
    fn bounds_are_inclusive() {
        let list = ["10.0.0.5-10.0.0.9"];
        assert!(matches_ip_exclusion("10.0.0.5", &list));
        assert!(matches_ip_exclusion("10.0.0.9", &list));
        assert!(!matches_ip_exclusion("10.0.0.4", &list));
    }

    #[test]
    fn single_address() {
        let list = ["192.168.1.1"];
        assert!(matches_ip_exclusion("192.168.1.1", &list));
        assert!(!matches_ip_exclusion("192.168.1.2", &list));
    }

    #[test]
    fn bad_entry_first_does_not_block_later_match() {
        let list = ["not-an-ip", "300.1.1.1", "172.16.0.1"];
        assert!(matches_ip_exclusion("172.16.0.1", &list));
    }

    #[test]
    fn spaces_around_range_are_trimmed() {
        let list = [" 10.1.0.0 - 10.1.255.255 "];
        assert!(matches_ip_exclusion("10.1.20.30", &list));
    }

    #[test]
    fn invalid_client_ip_never_matches() {
        let list = ["0.0.0.0-255.255.255.255"];
        assert!(!matches_ip_exclusion("::1", &list));
        assert!(!matches_ip_exclusion("", &list));
    }

    #[test]
    fn empty_list_never_matches() {
        let list: [&str; 0] = [];
        assert!(!matches_ip_exclusion("10.0.0.1", &list));
    }

    #[test]
    fn inverted_range_is_empty() {
        let list = ["10.0.0.9-10.0.0.5"];
        assert!(!matches_ip_exclusion("10.0.0.7", &list));
    }

    #[test]
    fn parse_reports_the_entry() {
        let err = IpRange::parse("10.0.0.1-nope");
        assert!(matches!(
            err,
            Err(GateError::PolicyMatch { ref entry, .. }) if entry == "10.0.0.1-nope"
        ));
    }
}
