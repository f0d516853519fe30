//! C5: `POST /check` report admission. The validation sequence from §4.5 is
//! expressed as one outcome enum so the HTTP status mapping is an
//! exhaustive match rather than a chain of early returns re-derived at each
//! call site.

use serde::Deserialize;

use crate::crd::HealthCheckStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct ReportBody {
    #[serde(rename = "OK")]
    pub ok: bool,
    #[serde(rename = "Errors", default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Accept { namespace: String, check_name: String },
    RejectMissingHeader,
    RejectUnknownUuid,
    RejectGate,
    RejectSchema(String),
    RejectStore(String),
}

impl ReportOutcome {
    pub fn status_code(&self) -> u16 {
        match self {
            ReportOutcome::Accept { .. } => 200,
            ReportOutcome::RejectMissingHeader => 400,
            ReportOutcome::RejectUnknownUuid => 400,
            ReportOutcome::RejectGate => 410,
            ReportOutcome::RejectSchema(_) => 400,
            ReportOutcome::RejectStore(_) => 500,
        }
    }
}

/// Step 6/7 of §4.5: `OK=true` forbids non-empty `Errors`; `OK=false`
/// requires at least one non-blank `Errors` entry.
pub fn validate_body_schema(body: &ReportBody) -> Result<(), String> {
    if body.ok && !body.errors.is_empty() {
        return Err("OK=true but Errors is non-empty".to_string());
    }
    if !body.ok {
        if body.errors.is_empty() {
            return Err("OK=false but Errors is empty".to_string());
        }
        if body.errors.iter().any(|e| e.trim().is_empty()) {
            return Err("Errors entries must not be blank".to_string());
        }
    }
    Ok(())
}

/// The report gate (P2): allow iff `currentUUID == uuid` AND
/// (`lastRunUnix == 0` OR `now - lastRunUnix < timeout`).
pub fn passes_gate(status: &HealthCheckStatus, uuid: &str, timeout_seconds: u64, now_unix: i64) -> bool {
    status.current_uuid == uuid
        && (status.last_run_unix == 0 || now_unix - status.last_run_unix < timeout_seconds as i64)
}

/// Find which `(namespace, name)` currently has `status.currentUUID == uuid`,
/// scanning the supplied candidate checks (the cache, in practice).
pub fn find_check_by_uuid<'a>(
    checks: impl Iterator<Item = (&'a str, &'a str, &'a HealthCheckStatus)>,
    uuid: &str,
) -> Option<(&'a str, &'a str)> {
    checks
        .filter(|(_, _, status)| status.current_uuid == uuid)
        .map(|(ns, name, _)| (ns, name))
        .next()
}
