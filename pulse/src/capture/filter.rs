//! Relevance filtering and network correlation
//!
//! Second-line, userspace-side filtering that does not trust kernel-side
//! pre-filtering alone. An event is forwarded downstream only if its command
//! matches the monitored family and, for network-shaped events, its
//! destination falls inside the known-API address table.

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::domain::CaptureError;
use crate::event::{ActivityEvent, EventPayload};

/// Canonical hostname annotated onto events whose destination is inside the
/// known-API table.
pub const API_HOSTNAME: &str = "api.anthropic.com";

/// CloudFront ranges the API is served from. Supplied as defaults; callers
/// can override the table through [`crate::capture::CaptureConfig`].
pub const DEFAULT_API_RANGES: &[&str] = &[
    "52.84.0.0/15",
    "54.230.0.0/16",
    "99.86.0.0/16",
    "13.32.0.0/15",
    "204.246.164.0/22",
    "54.192.0.0/12",
];

/// An IPv4 CIDR range with prefix-mask membership testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr4 {
    network: u32,
    mask: u32,
}

impl Cidr4 {
    /// Whether `addr` falls inside this range.
    #[must_use]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        (u32::from(addr) & self.mask) == self.network
    }
}

impl FromStr for Cidr4 {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CaptureError::InvalidNetwork(s.to_string());

        let (addr_str, prefix_str) = s.split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr_str.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix_str.parse().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }

        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        Ok(Self { network: u32::from(addr) & mask, mask })
    }
}

/// Immutable known-API network table.
#[derive(Debug, Clone)]
pub struct ApiNetworkTable {
    ranges: Vec<Cidr4>,
}

impl ApiNetworkTable {
    /// Parse a list of CIDR strings. Fails on the first invalid range so a
    /// typo in configuration is caught at startup, not silently skipped.
    pub fn new(ranges: &[impl AsRef<str>]) -> Result<Self, CaptureError> {
        let ranges = ranges
            .iter()
            .map(|r| r.as_ref().parse())
            .collect::<Result<Vec<Cidr4>, _>>()?;
        Ok(Self { ranges })
    }

    #[must_use]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.ranges.iter().any(|range| range.contains(addr))
    }
}

/// Userspace relevance rules: monitored-command match plus known-API
/// destination membership.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    command: String,
    path_form: String,
    exe_form: String,
    networks: ApiNetworkTable,
}

impl RelevanceFilter {
    pub fn new(command: &str, ranges: &[impl AsRef<str>]) -> Result<Self, CaptureError> {
        Ok(Self {
            command: command.to_string(),
            path_form: format!("/{command}"),
            exe_form: format!("{command}.exe"),
            networks: ApiNetworkTable::new(ranges)?,
        })
    }

    /// Case-sensitive match against the known invocation forms of the
    /// monitored family: bare name, path-qualified, platform-suffixed, or
    /// embedded in a longer token.
    #[must_use]
    pub fn is_monitored_command(&self, command: &str) -> bool {
        command == self.command
            || command.ends_with(&self.path_form)
            || command.ends_with(&self.exe_form)
            || command.contains(&self.command)
    }

    /// Authoritative network classification, independent of the kernel's
    /// coarse port gate.
    #[must_use]
    pub fn is_api_address(&self, addr: Ipv4Addr) -> bool {
        self.networks.contains(addr)
    }

    /// Whether a decoded event should be forwarded downstream.
    ///
    /// - Exec / Exit: command match.
    /// - Connect / HTTP request: command match and known-API destination.
    ///   Business classification of HTTP events is a separate stage and
    ///   never affects relevance.
    #[must_use]
    pub fn is_relevant(&self, event: &ActivityEvent) -> bool {
        if !self.is_monitored_command(&event.command) {
            return false;
        }

        match &event.payload {
            EventPayload::Exec { .. } | EventPayload::Exit { .. } => true,
            EventPayload::Connect { addr, .. } | EventPayload::HttpRequest { addr, .. } => {
                self.is_api_address(*addr)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ActivityKind;

    fn filter() -> RelevanceFilter {
        RelevanceFilter::new("claude", DEFAULT_API_RANGES).unwrap()
    }

    fn connect_event(command: &str, addr: Ipv4Addr) -> ActivityEvent {
        ActivityEvent {
            kind: ActivityKind::Connect,
            pid: 42,
            uid: 1000,
            command: command.to_string(),
            timestamp_ns: 1,
            payload: EventPayload::Connect { addr, port: 443, host: None },
        }
    }

    #[test]
    fn test_cidr_membership() {
        let range: Cidr4 = "52.84.0.0/15".parse().unwrap();
        assert!(range.contains(Ipv4Addr::new(52, 84, 1, 1)));
        assert!(range.contains(Ipv4Addr::new(52, 85, 255, 255)));
        assert!(!range.contains(Ipv4Addr::new(52, 86, 0, 0)));
        assert!(!range.contains(Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[test]
    fn test_cidr_rejects_garbage() {
        assert!("52.84.0.0".parse::<Cidr4>().is_err());
        assert!("52.84.0.0/33".parse::<Cidr4>().is_err());
        assert!("not-an-addr/8".parse::<Cidr4>().is_err());
        assert!("52.84.0.0/x".parse::<Cidr4>().is_err());
    }

    #[test]
    fn test_command_family_match() {
        let f = filter();
        assert!(f.is_monitored_command("claude"));
        assert!(f.is_monitored_command("/usr/local/bin/claude"));
        assert!(f.is_monitored_command("claude.exe"));
        assert!(f.is_monitored_command("some-claude-tool"));

        assert!(!f.is_monitored_command("python"));
        assert!(!f.is_monitored_command("bash"));
        assert!(!f.is_monitored_command(""));
        // Case-sensitive on purpose.
        assert!(!f.is_monitored_command("Claude"));
    }

    #[test]
    fn test_api_table_default_ranges() {
        let f = filter();
        assert!(f.is_api_address(Ipv4Addr::new(52, 84, 1, 1)));
        assert!(f.is_api_address(Ipv4Addr::new(204, 246, 164, 10)));
        assert!(!f.is_api_address(Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!f.is_api_address(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_connect_relevance_needs_both_rules() {
        let f = filter();
        assert!(f.is_relevant(&connect_event("claude", Ipv4Addr::new(52, 84, 1, 1))));
        // Right address, wrong command.
        assert!(!f.is_relevant(&connect_event("python", Ipv4Addr::new(52, 84, 1, 1))));
        // Right command, destination outside the table.
        assert!(!f.is_relevant(&connect_event("claude", Ipv4Addr::new(192, 168, 1, 1))));
    }

    #[test]
    fn test_exec_exit_relevance_by_command_only() {
        let f = filter();
        for command in ["python", "", "bash"] {
            let event = ActivityEvent {
                kind: ActivityKind::Exit,
                pid: 1,
                uid: 0,
                command: command.to_string(),
                timestamp_ns: 0,
                payload: EventPayload::Exit { exit_code: 0 },
            };
            assert!(!f.is_relevant(&event), "command {command:?} must be rejected");
        }

        let event = ActivityEvent {
            kind: ActivityKind::Exec,
            pid: 1,
            uid: 0,
            command: "claude".to_string(),
            timestamp_ns: 0,
            payload: EventPayload::Exec { path: "/usr/local/bin/claude".to_string(), ppid: 7 },
        };
        assert!(f.is_relevant(&event));
    }

    #[test]
    fn test_invalid_range_fails_table_construction() {
        assert!(RelevanceFilter::new("claude", &["52.84.0.0/15", "bogus"]).is_err());
    }
}
