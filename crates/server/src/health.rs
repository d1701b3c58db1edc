use artifacts::{ArtifactStore, PurgeScope, StorageError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub model_loaded: bool,
    /// Seconds since start-up.
    pub uptime: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
}

/// Query accepted by `POST /cleanup`.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupParams {
    pub scope: Option<String>,
    pub older_than_hours: Option<u64>,
}

impl CleanupParams {
    pub fn into_scope(self, default_max_age: Duration) -> Result<PurgeScope, String> {
        match (self.scope.as_deref(), self.older_than_hours) {
            (Some("all"), None) => Ok(PurgeScope::All),
            (Some("all"), Some(_)) => Err("scope=all cannot be combined with older_than_hours".to_string()),
            (Some(other), _) => Err(format!("unknown cleanup scope `{}`", other)),
            (None, Some(hours)) => Ok(PurgeScope::OlderThan(Duration::from_secs(hours.saturating_mul(3600)))),
            (None, None) => Ok(PurgeScope::OlderThan(default_max_age)),
        }
    }
}

/// Liveness reporting and artifact eviction.
pub struct HealthController {
    started: Instant,
    store: ArtifactStore,
    default_max_age: Duration,
}

impl HealthController {
    pub fn new(store: ArtifactStore, default_max_age: Duration) -> Self {
        Self {
            started: Instant::now(),
            store,
            default_max_age,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn default_max_age(&self) -> Duration {
        self.default_max_age
    }

    pub fn health(&self, model_loaded: bool) -> HealthReport {
        HealthReport {
            status: if model_loaded {
                HealthStatus::Ok
            } else {
                HealthStatus::Degraded
            },
            model_loaded,
            uptime: self.uptime().as_secs(),
        }
    }

    /// Purge eligible artifacts. Blocking; run it off the async workers.
    pub fn cleanup(&self, scope: PurgeScope) -> Result<CleanupReport, StorageError> {
        let removed = self.store.purge(scope)?;
        Ok(CleanupReport { removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifacts::StorageLayout;

    #[test]
    fn test_cleanup_scope_parsing() {
        let day = Duration::from_secs(24 * 3600);
        assert_eq!(CleanupParams::default().into_scope(day), Ok(PurgeScope::OlderThan(day)));
        assert_eq!(
            CleanupParams {
                scope: Some("all".into()),
                older_than_hours: None
            }
            .into_scope(day),
            Ok(PurgeScope::All)
        );
        assert_eq!(
            CleanupParams {
                scope: None,
                older_than_hours: Some(2)
            }
            .into_scope(day),
            Ok(PurgeScope::OlderThan(Duration::from_secs(7200)))
        );
        assert!(
            CleanupParams {
                scope: Some("everything".into()),
                older_than_hours: None
            }
            .into_scope(day)
            .is_err()
        );
    }

    #[test]
    fn test_health_degraded_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(StorageLayout::new(dir.path(), "/static")).unwrap();
        let controller = HealthController::new(store, Duration::from_secs(3600));

        let report = controller.health(false);
        assert_eq!(report.status, HealthStatus::Degraded);

        let json = serde_json::to_value(controller.health(true)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["modelLoaded"], true);
        assert!(json["uptime"].is_u64());
    }

    #[test]
    fn test_cleanup_twice_returns_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(StorageLayout::new(dir.path(), "/static")).unwrap();
        std::fs::write(store.layout().result_dir(artifacts::MediaKind::Image).join("a.jpg"), b"x").unwrap();
        let controller = HealthController::new(store, Duration::from_secs(3600));

        assert_eq!(controller.cleanup(PurgeScope::All).unwrap().removed, 1);
        assert_eq!(controller.cleanup(PurgeScope::All).unwrap().removed, 0);
    }
}
