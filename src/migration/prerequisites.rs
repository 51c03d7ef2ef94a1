//! Prerequisite checks run once before `idle -> initializing`.
//! Critical failures abort the start; warnings are surfaced but don't block.

use crate::error::{Check, Result, Severity};
use crate::legacy::{Interface, LegacyStore};
use crate::manager::DatabaseManager;

pub async fn run_prerequisites(manager: &DatabaseManager, legacy: &LegacyStore) -> Result<Vec<Check>> {
    let mut checks = Vec::new();

    checks.push(match legacy.ensure_schema().await {
        Ok(()) => Check {
            name: "legacy_schema_reachable".to_string(),
            ok: true,
            severity: Severity::Critical,
            detail: "legacy tables present".to_string(),
        },
        Err(e) => Check {
            name: "legacy_schema_reachable".to_string(),
            ok: false,
            severity: Severity::Critical,
            detail: e.to_string(),
        },
    });

    checks.push(match manager.is_v2_only_mode().await {
        Ok(true) => Check {
            name: "not_already_cut_over".to_string(),
            ok: false,
            severity: Severity::Critical,
            detail: "is_v2_only_mode is already true".to_string(),
        },
        Ok(false) => Check {
            name: "not_already_cut_over".to_string(),
            ok: true,
            severity: Severity::Critical,
            detail: "v2-only mode not yet active".to_string(),
        },
        Err(e) => Check {
            name: "not_already_cut_over".to_string(),
            ok: false,
            severity: Severity::Critical,
            detail: e.to_string(),
        },
    });

    let total = legacy.count().await.unwrap_or(0);
    checks.push(Check {
        name: "legacy_has_records".to_string(),
        ok: true,
        severity: Severity::Warning,
        detail: format!("{total} legacy record(s) to migrate"),
    });

    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, StoreConfig};
    use std::sync::Arc;

    #[tokio::test]
    async fn fresh_database_passes_all_critical_checks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prereq.db");
        std::mem::forget(dir);
        let config = StoreConfig {
            engine: EngineConfig::Sqlite {
                path: path.to_str().unwrap().to_string(),
                busy_timeout_ms: 1000,
            },
            ..Default::default()
        };
        let manager = Arc::new(DatabaseManager::initialize(&config).await.unwrap());
        let legacy = LegacyStore::new(manager.clone());
        let checks = run_prerequisites(&manager, &legacy).await.unwrap();
        assert!(checks
            .iter()
            .filter(|c| c.severity == Severity::Critical)
            .all(|c| c.ok));
    }

    #[tokio::test]
    async fn already_cut_over_fails_the_critical_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prereq2.db");
        std::mem::forget(dir);
        let config = StoreConfig {
            engine: EngineConfig::Sqlite {
                path: path.to_str().unwrap().to_string(),
                busy_timeout_ms: 1000,
            },
            ..Default::default()
        };
        let manager = Arc::new(DatabaseManager::initialize(&config).await.unwrap());
        manager.set_v2_only_mode(true).await.unwrap();
        let legacy = LegacyStore::new(manager.clone());
        let checks = run_prerequisites(&manager, &legacy).await.unwrap();
        assert!(checks.iter().any(|c| c.name == "not_already_cut_over" && !c.ok));
    }
}
