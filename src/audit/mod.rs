//! Plan fingerprinting
//!
//! Every stored session carries the SHA-256 of its plan snapshot, so a stored
//! record can be checked against the plan it claims to have run.

use crate::models::{ExecutionPlan, Session};
use crate::Result;
use sha2::{Digest, Sha256};
use std::io::Write;

/// Hex SHA-256 of the plan's JSON form
pub fn compute_plan_fingerprint(plan: &ExecutionPlan) -> Result<String> {
    let mut hasher = Sha256::new();

    // Stream JSON directly into the hasher
    serde_json::to_writer(&mut HashWriter(&mut hasher), plan)?;

    Ok(hex::encode(hasher.finalize()))
}

/// Whether a session's recorded fingerprint still matches its plan
pub fn verify_fingerprint(session: &Session) -> bool {
    compute_plan_fingerprint(&session.plan)
        .map(|fp| fp == session.plan_fingerprint)
        .unwrap_or(false)
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_catalog;
    use crate::planner::fallback_plan;

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let plan = fallback_plan(&["bitcoin".to_string()], &default_catalog());

        let first = compute_plan_fingerprint(&plan).unwrap();
        let second = compute_plan_fingerprint(&plan.clone()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_changes_with_plan() {
        let catalog = default_catalog();
        let btc = fallback_plan(&["bitcoin".to_string()], &catalog);
        let eth = fallback_plan(&["ethereum".to_string()], &catalog);

        assert_ne!(
            compute_plan_fingerprint(&btc).unwrap(),
            compute_plan_fingerprint(&eth).unwrap()
        );
    }
}
