//! Explicit audit record schema, replacing the source's defensively-parsed
//! `dict[str, Any]`.

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub timestamp_unix: Option<f64>,
    pub timestamp_raw: Option<String>,
    pub initiator_uid: Option<u32>,
    pub initiator_uid_name: Option<String>,
    pub effective_uid: Option<u32>,
    pub pid: Option<i32>,
    pub key: Option<String>,
    pub exe: Option<String>,
    pub comm: Option<String>,
    pub raw_msg: Option<String>,
}

impl Default for AuditRecord {
    fn default() -> Self {
        AuditRecord {
            timestamp_unix: None,
            timestamp_raw: None,
            initiator_uid: None,
            initiator_uid_name: None,
            effective_uid: None,
            pid: None,
            key: None,
            exe: None,
            comm: None,
            raw_msg: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditHealth {
    pub tool_present: bool,
    pub daemon_running: bool,
    pub docker_rules_present: bool,
    pub rules: Vec<String>,
    pub errors: Vec<String>,
}
