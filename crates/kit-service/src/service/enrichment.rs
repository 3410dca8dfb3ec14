//! 地址补全调度
//!
//! 依次处理待地理编码的登录（不并发，配额在整批运行中共享）：
//!
//! 1. `retry_failed` 时先清除所有永久失败标记，使其重新进入待处理集合
//! 2. 取最多 `limit` 条待处理登录
//! 3. 地址 -> 经纬度 -> 海拔，全部成功才写入坐标
//! 4. 无结果或服务故障：标记永久失败，继续下一条
//! 5. 配额耗尽：立即中止整批运行，当前登录保持待处理

use std::sync::Arc;
use std::time::{Duration, Instant};

use kit_shared::config::EnrichmentConfig;
use kit_shared::observability::metrics;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{KitError, Result};
use crate::geocode::{GeocodeQuery, Geocoder, LookupResult};
use crate::models::{GeoPoint, GeocodeUpdate, Login};
use crate::repository::KitStore;

/// 一次补全运行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentReport {
    /// 重试扫描前被清除失败标记的登录数
    pub cleared: usize,
    pub attempted: usize,
    pub resolved: usize,
    pub unresolvable: usize,
    /// 因运行时限提前结束
    pub deadline_reached: bool,
}

/// 单条登录的处理结果
enum LoginOutcome {
    Resolved(GeoPoint),
    Unresolvable(String),
    QuotaExceeded,
}

/// 地址补全调度器
pub struct EnrichmentScheduler<S: KitStore, G: Geocoder> {
    store: Arc<S>,
    geocoder: Arc<G>,
    max_run: Option<Duration>,
}

impl<S: KitStore, G: Geocoder> EnrichmentScheduler<S, G> {
    pub fn new(store: Arc<S>, geocoder: Arc<G>) -> Self {
        Self {
            store,
            geocoder,
            max_run: None,
        }
    }

    pub fn from_config(store: Arc<S>, geocoder: Arc<G>, config: &EnrichmentConfig) -> Self {
        Self::new(store, geocoder).with_max_run(config.max_run_duration())
    }

    /// 运行时限，只在两条登录之间检查
    pub fn with_max_run(mut self, max_run: Option<Duration>) -> Self {
        self.max_run = max_run;
        self
    }

    /// 执行一次补全运行
    ///
    /// `limit` 限制的是尝试条数而非成功条数。配额耗尽时返回
    /// `KitError::QuotaExceeded`，调用方应等待配额恢复后再调度。
    #[instrument(skip(self))]
    pub async fn run(&self, limit: Option<usize>, retry_failed: bool) -> Result<EnrichmentReport> {
        let started = Instant::now();
        let mut report = EnrichmentReport::default();

        if retry_failed {
            for login in self.store.logins_marked_unresolvable().await? {
                self.store.clear_geocode_failure(login.id).await?;
                report.cleared += 1;
            }
            if report.cleared > 0 {
                info!(cleared = report.cleared, "已清除永久失败标记");
            }
        }

        let pending = self.store.logins_pending_geocode(limit).await?;
        info!(pending = pending.len(), ?limit, "开始地址补全");

        for login in pending {
            if let Some(max_run) = self.max_run
                && started.elapsed() >= max_run
            {
                warn!(
                    attempted = report.attempted,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "达到运行时限，剩余登录留待下次处理"
                );
                report.deadline_reached = true;
                break;
            }

            report.attempted += 1;
            match self.enrich(&login).await {
                LoginOutcome::Resolved(point) => {
                    self.store
                        .set_geocode_result(login.id, GeocodeUpdate::Resolved(point))
                        .await?;
                    report.resolved += 1;
                    metrics::record_geocode_login("resolved");
                    debug!(login_id = %login.id, "地址补全成功");
                }
                LoginOutcome::Unresolvable(reason) => {
                    self.store
                        .set_geocode_result(login.id, GeocodeUpdate::Unresolvable)
                        .await?;
                    report.unresolvable += 1;
                    metrics::record_geocode_login("unresolvable");
                    debug!(login_id = %login.id, %reason, "地址无法补全，标记永久失败");
                }
                LoginOutcome::QuotaExceeded => {
                    metrics::record_geocode_run("quota_exceeded");
                    warn!(
                        login_id = %login.id,
                        attempted = report.attempted,
                        resolved = report.resolved,
                        "地理编码配额耗尽，中止本次运行"
                    );
                    return Err(KitError::QuotaExceeded {
                        attempted: report.attempted,
                        resolved: report.resolved,
                    });
                }
            }
        }

        metrics::record_geocode_run(if report.deadline_reached {
            "deadline"
        } else {
            "completed"
        });
        info!(
            attempted = report.attempted,
            resolved = report.resolved,
            unresolvable = report.unresolvable,
            "地址补全完成"
        );
        Ok(report)
    }

    async fn enrich(&self, login: &Login) -> LoginOutcome {
        let coordinates = match self
            .geocoder
            .forward_geocode(&GeocodeQuery::address(login))
            .await
        {
            LookupResult::Found(c) => c,
            LookupResult::QuotaExceeded => return LoginOutcome::QuotaExceeded,
            LookupResult::NotFound => {
                return LoginOutcome::Unresolvable("地址无结果".to_string());
            }
            LookupResult::TransientError(msg) => return LoginOutcome::Unresolvable(msg),
        };

        let query = GeocodeQuery::elevation(coordinates.latitude, coordinates.longitude);
        match self.geocoder.elevation(&query).await {
            LookupResult::Found(elevation) => LoginOutcome::Resolved(GeoPoint {
                latitude: coordinates.latitude,
                longitude: coordinates.longitude,
                elevation,
            }),
            LookupResult::QuotaExceeded => LoginOutcome::QuotaExceeded,
            LookupResult::NotFound => LoginOutcome::Unresolvable("海拔无结果".to_string()),
            LookupResult::TransientError(msg) => LoginOutcome::Unresolvable(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::{Coordinates, MockGeocoder};
    use crate::models::NewLogin;
    use crate::repository::InMemoryKitStore;

    async fn seed(store: &InMemoryKitStore, n: usize) {
        for i in 0..n {
            store
                .ensure_login(
                    NewLogin::new(format!("p{i}@example.org"))
                        .with_address("La Jolla", "CA", "92093", "USA"),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_elevation_quota_leaves_login_pending() {
        let store = Arc::new(InMemoryKitStore::new());
        seed(&store, 2).await;

        let mut geocoder = MockGeocoder::new();
        geocoder.expect_forward_geocode().times(1).returning(|_| {
            LookupResult::Found(Coordinates {
                latitude: 32.88,
                longitude: -117.23,
            })
        });
        geocoder
            .expect_elevation()
            .times(1)
            .returning(|_| LookupResult::QuotaExceeded);

        let scheduler = EnrichmentScheduler::new(store.clone(), Arc::new(geocoder));
        let err = scheduler.run(None, false).await.unwrap_err();
        assert!(matches!(
            err,
            KitError::QuotaExceeded {
                attempted: 1,
                resolved: 0
            }
        ));
        assert_eq!(store.logins_pending_geocode(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_elevation_error_marks_unresolvable() {
        let store = Arc::new(InMemoryKitStore::new());
        seed(&store, 1).await;

        let mut geocoder = MockGeocoder::new();
        geocoder.expect_forward_geocode().returning(|_| {
            LookupResult::Found(Coordinates {
                latitude: 1.0,
                longitude: 2.0,
            })
        });
        geocoder
            .expect_elevation()
            .returning(|_| LookupResult::TransientError("结果缺少 elevation 字段".to_string()));

        let scheduler = EnrichmentScheduler::new(store.clone(), Arc::new(geocoder));
        let report = scheduler.run(None, false).await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.unresolvable, 1);

        let login = &store.logins()[0];
        assert_eq!(login.cannot_geocode, Some(true));
        assert!(login.latitude.is_none() && login.longitude.is_none());
    }

    #[tokio::test]
    async fn test_zero_deadline_attempts_nothing() {
        let store = Arc::new(InMemoryKitStore::new());
        seed(&store, 3).await;

        let mut geocoder = MockGeocoder::new();
        geocoder.expect_forward_geocode().never();

        let scheduler = EnrichmentScheduler::new(store.clone(), Arc::new(geocoder))
            .with_max_run(Some(Duration::ZERO));
        let report = scheduler.run(None, false).await.unwrap();
        assert!(report.deadline_reached);
        assert_eq!(report.attempted, 0);
        assert_eq!(store.logins_pending_geocode(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_address_query_is_built_from_login() {
        let store = Arc::new(InMemoryKitStore::new());
        seed(&store, 1).await;

        let mut geocoder = MockGeocoder::new();
        geocoder
            .expect_forward_geocode()
            .withf(|q: &GeocodeQuery| q.param("address") == Some("La Jolla CA 92093 USA"))
            .returning(|_| LookupResult::NotFound);

        let scheduler = EnrichmentScheduler::new(store, Arc::new(geocoder));
        let report = scheduler.run(None, false).await.unwrap();
        assert_eq!(report.unresolvable, 1);
    }
}
