//! Best-effort process metadata from `/proc`.
//!
//! The exec tracepoint cannot portably resolve the parent pid in kernel
//! context, so exec events arrive with `ppid == 0` and are enriched here.
//! The process may already be gone by the time we look; that is fine, the
//! field simply stays zero.

use std::fs;

/// Read the parent pid of `pid` from `/proc/<pid>/stat`.
///
/// Returns `None` when the process no longer exists or the stat line cannot
/// be parsed.
#[must_use]
pub fn parent_pid(pid: u32) -> Option<u32> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat_ppid(&stat)
}

/// Extract field 4 (ppid) from a `/proc/<pid>/stat` line.
///
/// The comm field is wrapped in parentheses and may itself contain spaces or
/// parentheses, so fields are counted from after the last `)`.
fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    // after_comm: " <state> <ppid> ..."
    after_comm.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_ppid() {
        let stat = "12345 (claude) S 678 12345 678 34816 12345 4194304 1523 0 0 0";
        assert_eq!(parse_stat_ppid(stat), Some(678));
    }

    #[test]
    fn test_parse_stat_ppid_with_hostile_comm() {
        // comm can contain spaces and parentheses; parsing anchors on the
        // last closing paren.
        let stat = "4242 (we) ird (name) R 99 4242 99 0 -1 4194560 0 0 0 0";
        assert_eq!(parse_stat_ppid(stat), Some(99));
    }

    #[test]
    fn test_parse_stat_ppid_malformed() {
        assert_eq!(parse_stat_ppid(""), None);
        assert_eq!(parse_stat_ppid("no parens here"), None);
        assert_eq!(parse_stat_ppid("1 (x) S"), None);
        assert_eq!(parse_stat_ppid("1 (x) S notanumber 0"), None);
    }

    #[test]
    fn test_parent_pid_of_missing_process() {
        assert_eq!(parent_pid(u32::MAX - 1), None);
    }
}
