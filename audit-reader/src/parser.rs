//! Parses `ausearch -i` output into `AuditRecord`s.
//!
//! Records are separated by lines starting with `----`; within a record,
//! each `key=value` pair (optionally quoted) is folded into the record
//! under construction.

use crate::types::AuditRecord;
use chrono::NaiveDateTime;

fn strip_quotes(v: &str) -> &str {
    v.trim_matches('"')
}

/// Parse a wall-clock ausearch timestamp (`MM/DD/YYYY HH:MM:SS`) to Unix
/// seconds, or a raw Unix `secs.frac:serial` form.
pub fn parse_audit_timestamp(raw: &str) -> Option<f64> {
    if let Some((secs, _serial)) = raw.split_once(':') {
        if let Ok(v) = secs.parse::<f64>() {
            return Some(v);
        }
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Some(v);
    }
    NaiveDateTime::parse_from_str(raw, "%m/%d/%Y %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp() as f64)
}

pub fn parse_ausearch_output(stdout: &str) -> Vec<AuditRecord> {
    let mut records = Vec::new();
    let mut current = AuditRecord::default();
    let mut has_fields = false;

    for raw_line in stdout.lines() {
        let line = raw_line.trim();
        if line.starts_with("----") {
            if has_fields {
                records.push(std::mem::take(&mut current));
                has_fields = false;
            }
            continue;
        }

        for field in line.split_whitespace() {
            let Some((k, v)) = field.split_once('=') else {
                continue;
            };
            let v = strip_quotes(v);
            match k {
                "auid" => {
                    if let Ok(uid) = v.parse::<u32>() {
                        if uid != u32::MAX {
                            current.initiator_uid = Some(uid);
                            has_fields = true;
                        }
                    }
                }
                "uid" => {
                    if let Ok(uid) = v.parse::<u32>() {
                        current.effective_uid = Some(uid);
                        has_fields = true;
                    }
                }
                "pid" => {
                    if let Ok(pid) = v.parse::<i32>() {
                        current.pid = Some(pid);
                        has_fields = true;
                    }
                }
                "key" => {
                    current.key = Some(v.to_string());
                    has_fields = true;
                }
                "exe" => {
                    current.exe = Some(v.to_string());
                    has_fields = true;
                }
                "comm" => {
                    current.comm = Some(v.to_string());
                    has_fields = true;
                }
                "time" => {
                    current.timestamp_raw = Some(v.to_string());
                    current.timestamp_unix = parse_audit_timestamp(v);
                    has_fields = true;
                }
                "msg" => {
                    current.raw_msg = Some(v.to_string());
                    has_fields = true;
                }
                _ => {}
            }
        }
    }
    if has_fields {
        records.push(current);
    }

    // Initiator uid takes precedence over effective uid (sudo-wrapped clients).
    for r in &mut records {
        if r.initiator_uid.is_none() {
            r.initiator_uid = r.effective_uid;
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wall_clock_timestamp() {
        let ts = parse_audit_timestamp("01/15/2024 10:30:00").unwrap();
        assert!(ts > 0.0);
    }

    #[test]
    fn test_parse_unix_seconds_timestamp() {
        assert_eq!(parse_audit_timestamp("1700000000.123:456"), Some(1700000000.123));
    }

    #[test]
    fn test_parse_ausearch_output_single_record() {
        let stdout = "----\ntype=SYSCALL msg=audit(1700000000.123:456): \
            auid=1001 uid=0 pid=4242 comm=\"docker\" exe=\"/usr/bin/docker\" key=\"docker-client\"\n\
            time->Wed Nov 15 00:00:00 2023\n";
        let records = parse_ausearch_output(stdout);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].initiator_uid, Some(1001));
        assert_eq!(records[0].effective_uid, Some(0));
        assert_eq!(records[0].key.as_deref(), Some("docker-client"));
        assert_eq!(records[0].comm.as_deref(), Some("docker"));
    }

    #[test]
    fn test_parse_ausearch_output_multiple_records() {
        let stdout = "----\nauid=1001 key=\"docker-socket\"\n\
            ----\nauid=1002 key=\"docker-client\"\n";
        let records = parse_ausearch_output(stdout);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].initiator_uid, Some(1001));
        assert_eq!(records[1].initiator_uid, Some(1002));
    }

    #[test]
    fn test_initiator_falls_back_to_effective() {
        let stdout = "----\nuid=55 key=\"docker-client\"\n";
        let records = parse_ausearch_output(stdout);
        assert_eq!(records[0].initiator_uid, Some(55));
    }

    #[test]
    fn test_auid_unset_sentinel_ignored() {
        // auditd reports 4294967295 (-1) when no login uid is set.
        let stdout = "----\nauid=4294967295 uid=20 key=\"docker-client\"\n";
        let records = parse_ausearch_output(stdout);
        assert_eq!(records[0].initiator_uid, Some(20));
    }
}
