//! PostgreSQL 采样盒存储
//!
//! 多步写入（认领、新建采样盒、条码状态变更）均在单个事务内完成

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::traits::KitStore;
use crate::error::{KitError, Result, is_serialization_failure, is_unique_violation};
use crate::identifier;
use crate::models::{
    Barcode, BarcodeStatusUpdate, GeocodeUpdate, HandoutKit, Kit, KitDraft, Login, NewLogin,
};

/// 内嵌的数据库迁移
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// PostgreSQL 采样盒存储
#[derive(Clone)]
pub struct PgKitStore {
    pool: PgPool,
}

impl PgKitStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 事务内辅助操作 ====================

    async fn kit_ids_in_tx(conn: &mut PgConnection) -> Result<HashSet<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT supplied_kit_id FROM ag_kit
            UNION
            SELECT kit_id FROM ag_handout_kits
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(ids.into_iter().collect())
    }

    /// 从条码序列分配 `count` 个新条码，初始状态为 WAITING
    async fn allocate_barcodes_in_tx(
        conn: &mut PgConnection,
        count: u32,
        width: usize,
    ) -> Result<Vec<String>> {
        let sequences = sqlx::query_scalar::<_, i64>(
            "SELECT nextval('barcode_seq') FROM generate_series(1, $1::BIGINT)",
        )
        .bind(i64::from(count))
        .fetch_all(&mut *conn)
        .await?;

        let barcodes: Vec<String> = sequences
            .into_iter()
            .map(|n| identifier::format_barcode(n, width))
            .collect();

        sqlx::query("INSERT INTO barcode (barcode) SELECT UNNEST($1::VARCHAR[])")
            .bind(&barcodes)
            .execute(&mut *conn)
            .await?;

        Ok(barcodes)
    }

    async fn insert_handout_in_tx(
        conn: &mut PgConnection,
        kit_id: String,
        draft: KitDraft,
    ) -> Result<HandoutKit> {
        let barcodes = Self::allocate_barcodes_in_tx(conn, draft.swabs_per_kit, draft.barcode_width)
            .await
            .map_err(|e| match e {
                KitError::Database(err) => collision_or(err, &kit_id),
                other => other,
            })?;

        let mut handout = sqlx::query_as::<_, HandoutKit>(
            r#"
            INSERT INTO ag_handout_kits (kit_id, password, verification_code, swabs_per_kit, print_results)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING kit_id, password, verification_code, swabs_per_kit, print_results, created_at
            "#,
        )
        .bind(&kit_id)
        .bind(&draft.password_hash)
        .bind(&draft.verification_code)
        .bind(i64::from(draft.swabs_per_kit))
        .bind(draft.print_results)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| collision_or(e, &kit_id))?;

        sqlx::query(
            "INSERT INTO ag_handout_barcodes (kit_id, barcode) SELECT $1, UNNEST($2::VARCHAR[])",
        )
        .bind(&kit_id)
        .bind(&barcodes)
        .execute(&mut *conn)
        .await
        .map_err(|e| collision_or(e, &kit_id))?;

        handout.barcodes = barcodes;
        Ok(handout)
    }

    async fn login_exists_in_tx(conn: &mut PgConnection, login_id: Uuid) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM ag_login WHERE ag_login_id = $1)",
        )
        .bind(login_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(exists)
    }

    async fn barcodes_of_kit(&self, ag_kit_id: Uuid) -> Result<Vec<String>> {
        let barcodes = sqlx::query_scalar::<_, String>(
            "SELECT barcode FROM ag_kit_barcodes WHERE ag_kit_id = $1 ORDER BY barcode",
        )
        .bind(ag_kit_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(barcodes)
    }
}

/// 插入阶段的唯一约束冲突与串行化冲突都视为可重试的标识符冲突
fn collision_or(err: sqlx::Error, kit_id: &str) -> KitError {
    if is_unique_violation(&err) || is_serialization_failure(&err) {
        KitError::IdentifierCollision(kit_id.to_string())
    } else {
        KitError::Database(err)
    }
}

#[async_trait]
impl KitStore for PgKitStore {
    #[instrument(skip(self, login), fields(email = %login.email))]
    async fn ensure_login(&self, login: NewLogin) -> Result<Uuid> {
        let email = login.normalized_email();
        if email.is_empty() {
            return Err(KitError::Validation("邮箱不能为空".to_string()));
        }

        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO ag_login (email, name, address, city, state, zip, country)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ((LOWER(email))) DO NOTHING
            RETURNING ag_login_id
            "#,
        )
        .bind(&email)
        .bind(&login.name)
        .bind(&login.address)
        .bind(&login.city)
        .bind(&login.state)
        .bind(&login.zip)
        .bind(&login.country)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            info!(login_id = %id, "新建登录");
            return Ok(id);
        }

        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT ag_login_id FROM ag_login WHERE LOWER(email) = $1",
        )
        .bind(&email)
        .fetch_one(&self.pool)
        .await?;

        debug!(login_id = %existing, "邮箱已注册，返回已有登录");
        Ok(existing)
    }

    async fn get_login(&self, login_id: Uuid) -> Result<Option<Login>> {
        let login = sqlx::query_as::<_, Login>(
            r#"
            SELECT ag_login_id, email, name, address, city, state, zip, country,
                   latitude, longitude, elevation, cannot_geocode, created_at
            FROM ag_login
            WHERE ag_login_id = $1
            "#,
        )
        .bind(login_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(login)
    }

    async fn all_kit_ids(&self) -> Result<HashSet<String>> {
        let mut conn = self.pool.acquire().await?;
        Self::kit_ids_in_tx(&mut conn).await
    }

    #[instrument(skip(self, drafts), fields(count = drafts.len()))]
    async fn create_handout_kits(&self, drafts: Vec<KitDraft>) -> Result<Vec<HandoutKit>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let mut taken = Self::kit_ids_in_tx(&mut tx).await?;
        let mut handouts = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let kit_id = identifier::ensure_unique_kit_id(&taken, draft.kit_id_length)?;
            taken.insert(kit_id.clone());
            handouts.push(Self::insert_handout_in_tx(&mut tx, kit_id, draft).await?);
        }

        let first = handouts.first().map(|h| h.kit_id.clone()).unwrap_or_default();
        tx.commit().await.map_err(|e| collision_or(e, &first))?;

        info!(count = handouts.len(), "预印采样盒已创建");
        Ok(handouts)
    }

    #[instrument(skip(self, draft), fields(login_id = %login_id))]
    async fn create_kit(&self, login_id: Uuid, draft: KitDraft) -> Result<Kit> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        if !Self::login_exists_in_tx(&mut tx, login_id).await? {
            return Err(KitError::LoginNotFound(login_id));
        }

        let existing = Self::kit_ids_in_tx(&mut tx).await?;
        let kit_id = identifier::ensure_unique_kit_id(&existing, draft.kit_id_length)?;
        let barcodes =
            Self::allocate_barcodes_in_tx(&mut tx, draft.swabs_per_kit, draft.barcode_width)
                .await
                .map_err(|e| match e {
                    KitError::Database(err) => collision_or(err, &kit_id),
                    other => other,
                })?;

        let mut kit = sqlx::query_as::<_, Kit>(
            r#"
            INSERT INTO ag_kit (ag_login_id, supplied_kit_id, kit_password, kit_verification_code,
                                swabs_per_kit, kit_verified, print_results)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
            RETURNING ag_kit_id, ag_login_id, supplied_kit_id, kit_password, kit_verification_code,
                      swabs_per_kit, kit_verified, print_results, created_at
            "#,
        )
        .bind(login_id)
        .bind(&kit_id)
        .bind(&draft.password_hash)
        .bind(&draft.verification_code)
        .bind(i64::from(draft.swabs_per_kit))
        .bind(draft.print_results)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| collision_or(e, &kit_id))?;

        sqlx::query("INSERT INTO ag_kit_barcodes (ag_kit_id, barcode) SELECT $1, UNNEST($2::VARCHAR[])")
            .bind(kit.id)
            .bind(&barcodes)
            .execute(&mut *tx)
            .await
            .map_err(|e| collision_or(e, &kit_id))?;

        tx.commit().await.map_err(|e| collision_or(e, &kit_id))?;

        kit.barcodes = barcodes;
        info!(supplied_kit_id = %kit.supplied_kit_id, "采样盒已注册");
        Ok(kit)
    }

    async fn get_kit(&self, supplied_kit_id: &str) -> Result<Option<Kit>> {
        let kit = sqlx::query_as::<_, Kit>(
            r#"
            SELECT ag_kit_id, ag_login_id, supplied_kit_id, kit_password, kit_verification_code,
                   swabs_per_kit, kit_verified, print_results, created_at
            FROM ag_kit
            WHERE supplied_kit_id = $1
            "#,
        )
        .bind(supplied_kit_id)
        .fetch_optional(&self.pool)
        .await?;

        match kit {
            Some(mut kit) => {
                kit.barcodes = self.barcodes_of_kit(kit.id).await?;
                Ok(Some(kit))
            }
            None => Ok(None),
        }
    }

    async fn kits_by_login(&self, login_id: Uuid) -> Result<Vec<Kit>> {
        let mut kits = sqlx::query_as::<_, Kit>(
            r#"
            SELECT ag_kit_id, ag_login_id, supplied_kit_id, kit_password, kit_verification_code,
                   swabs_per_kit, kit_verified, print_results, created_at
            FROM ag_kit
            WHERE ag_login_id = $1
            ORDER BY created_at, supplied_kit_id
            "#,
        )
        .bind(login_id)
        .fetch_all(&self.pool)
        .await?;

        for kit in &mut kits {
            kit.barcodes = self.barcodes_of_kit(kit.id).await?;
        }
        Ok(kits)
    }

    async fn get_handout_kit(&self, kit_id: &str) -> Result<Option<HandoutKit>> {
        let handout = sqlx::query_as::<_, HandoutKit>(
            r#"
            SELECT kit_id, password, verification_code, swabs_per_kit, print_results, created_at
            FROM ag_handout_kits
            WHERE kit_id = $1
            "#,
        )
        .bind(kit_id)
        .fetch_optional(&self.pool)
        .await?;

        match handout {
            Some(mut handout) => {
                handout.barcodes = sqlx::query_scalar::<_, String>(
                    "SELECT barcode FROM ag_handout_barcodes WHERE kit_id = $1 ORDER BY barcode",
                )
                .bind(kit_id)
                .fetch_all(&self.pool)
                .await?;
                Ok(Some(handout))
            }
            None => Ok(None),
        }
    }

    async fn handout_credentials(&self, kit_id: &str) -> Result<Option<String>> {
        let hash = sqlx::query_scalar::<_, String>(
            "SELECT password FROM ag_handout_kits WHERE kit_id = $1",
        )
        .bind(kit_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(hash)
    }

    #[instrument(skip(self, password_hash))]
    async fn update_kit_password(&self, supplied_kit_id: &str, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE ag_kit SET kit_password = $2 WHERE supplied_kit_id = $1")
            .bind(supplied_kit_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(KitError::KitNotFound(supplied_kit_id.to_string()));
        }
        info!("采样盒密码已更新");
        Ok(())
    }

    #[instrument(skip(self, password_hash))]
    async fn update_handout_password(&self, kit_id: &str, password_hash: &str) -> Result<()> {
        let result = sqlx::query("UPDATE ag_handout_kits SET password = $2 WHERE kit_id = $1")
            .bind(kit_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(KitError::HandoutKitNotFound(kit_id.to_string()));
        }
        info!("预印采样盒密码已更新");
        Ok(())
    }

    #[instrument(skip(self, verification_code))]
    async fn verify_kit(&self, supplied_kit_id: &str, verification_code: &str) -> Result<bool> {
        let code = sqlx::query_scalar::<_, String>(
            "SELECT kit_verification_code FROM ag_kit WHERE supplied_kit_id = $1",
        )
        .bind(supplied_kit_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| KitError::KitNotFound(supplied_kit_id.to_string()))?;

        if code != verification_code {
            return Ok(false);
        }

        sqlx::query("UPDATE ag_kit SET kit_verified = TRUE WHERE supplied_kit_id = $1")
            .bind(supplied_kit_id)
            .execute(&self.pool)
            .await?;

        Ok(true)
    }

    #[instrument(skip(self), fields(login_id = %login_id))]
    async fn promote_handout_kit(&self, handout_id: &str, login_id: Uuid) -> Result<Kit> {
        let mut tx = self.pool.begin().await?;

        if !Self::login_exists_in_tx(&mut tx, login_id).await? {
            return Err(KitError::LoginNotFound(login_id));
        }

        // 行锁：并发认领同一预印采样盒时，后到者在前者提交后读不到该行
        let handout = sqlx::query_as::<_, HandoutKit>(
            r#"
            SELECT kit_id, password, verification_code, swabs_per_kit, print_results, created_at
            FROM ag_handout_kits
            WHERE kit_id = $1
            FOR UPDATE
            "#,
        )
        .bind(handout_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| KitError::HandoutKitNotFound(handout_id.to_string()))?;

        let mut kit = sqlx::query_as::<_, Kit>(
            r#"
            INSERT INTO ag_kit (ag_login_id, supplied_kit_id, kit_password, kit_verification_code,
                                swabs_per_kit, kit_verified, print_results)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
            RETURNING ag_kit_id, ag_login_id, supplied_kit_id, kit_password, kit_verification_code,
                      swabs_per_kit, kit_verified, print_results, created_at
            "#,
        )
        .bind(login_id)
        .bind(&handout.kit_id)
        .bind(&handout.password_hash)
        .bind(&handout.verification_code)
        .bind(handout.swabs_per_kit)
        .bind(handout.print_results.unwrap_or(false))
        .fetch_one(&mut *tx)
        .await?;

        let barcodes = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO ag_kit_barcodes (ag_kit_id, barcode, sample_barcode_file)
            SELECT $1, barcode, barcode || '.jpg'
            FROM ag_handout_barcodes
            WHERE kit_id = $2
            RETURNING barcode
            "#,
        )
        .bind(kit.id)
        .bind(&handout.kit_id)
        .fetch_all(&mut *tx)
        .await?;

        // 级联删除预印条码关联
        sqlx::query("DELETE FROM ag_handout_kits WHERE kit_id = $1")
            .bind(&handout.kit_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        kit.barcodes = barcodes;
        kit.barcodes.sort();
        info!(
            supplied_kit_id = %kit.supplied_kit_id,
            barcodes = kit.barcodes.len(),
            "预印采样盒已认领"
        );
        Ok(kit)
    }

    async fn kit_barcodes(&self, supplied_kit_id: &str) -> Result<Vec<Barcode>> {
        let kit_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT ag_kit_id FROM ag_kit WHERE supplied_kit_id = $1",
        )
        .bind(supplied_kit_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| KitError::KitNotFound(supplied_kit_id.to_string()))?;

        let barcodes = sqlx::query_as::<_, Barcode>(
            r#"
            SELECT b.barcode, b.create_date_time, b.status, b.scan_date, b.sample_postmark_date,
                   b.biomass_remaining, b.sequencing_status, b.obsolete
            FROM barcode b
            JOIN ag_kit_barcodes kb ON kb.barcode = b.barcode
            WHERE kb.ag_kit_id = $1
            ORDER BY b.barcode
            "#,
        )
        .bind(kit_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(barcodes)
    }

    #[instrument(skip(self, update))]
    async fn update_barcode_status(
        &self,
        barcode: &str,
        update: BarcodeStatusUpdate,
    ) -> Result<Barcode> {
        let mut tx = self.pool.begin().await?;

        let mut current = sqlx::query_as::<_, Barcode>(
            r#"
            SELECT barcode, create_date_time, status, scan_date, sample_postmark_date,
                   biomass_remaining, sequencing_status, obsolete
            FROM barcode
            WHERE barcode = $1
            FOR UPDATE
            "#,
        )
        .bind(barcode)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| KitError::BarcodeNotFound(barcode.to_string()))?;

        if let Some(next) = update.sequencing_status
            && !current.sequencing_status.can_transition_to(next)
        {
            return Err(KitError::InvalidStatusTransition {
                barcode: barcode.to_string(),
                from: current.sequencing_status,
                to: next,
            });
        }

        current.apply(&update);

        sqlx::query(
            r#"
            UPDATE barcode
            SET status = $2, scan_date = $3, sample_postmark_date = $4,
                biomass_remaining = $5, sequencing_status = $6, obsolete = $7
            WHERE barcode = $1
            "#,
        )
        .bind(barcode)
        .bind(&current.status)
        .bind(current.scan_date)
        .bind(current.sample_postmark_date)
        .bind(current.biomass_remaining)
        .bind(current.sequencing_status)
        .bind(current.obsolete)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(status = %current.sequencing_status, "条码状态已更新");
        Ok(current)
    }

    async fn logins_pending_geocode(&self, limit: Option<usize>) -> Result<Vec<Login>> {
        // LIMIT NULL 表示不限制
        let limit = limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX));

        let logins = sqlx::query_as::<_, Login>(
            r#"
            SELECT ag_login_id, email, name, address, city, state, zip, country,
                   latitude, longitude, elevation, cannot_geocode, created_at
            FROM ag_login
            WHERE latitude IS NULL AND longitude IS NULL AND elevation IS NULL
              AND cannot_geocode IS NOT TRUE
            ORDER BY created_at, ag_login_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logins)
    }

    async fn logins_marked_unresolvable(&self) -> Result<Vec<Login>> {
        let logins = sqlx::query_as::<_, Login>(
            r#"
            SELECT ag_login_id, email, name, address, city, state, zip, country,
                   latitude, longitude, elevation, cannot_geocode, created_at
            FROM ag_login
            WHERE cannot_geocode IS TRUE
            ORDER BY created_at, ag_login_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(logins)
    }

    async fn clear_geocode_failure(&self, login_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE ag_login SET cannot_geocode = NULL WHERE ag_login_id = $1")
            .bind(login_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(KitError::LoginNotFound(login_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_geocode_result(&self, login_id: Uuid, update: GeocodeUpdate) -> Result<()> {
        let result = match update {
            GeocodeUpdate::Resolved(point) => {
                sqlx::query(
                    r#"
                    UPDATE ag_login
                    SET latitude = $2, longitude = $3, elevation = $4, cannot_geocode = NULL
                    WHERE ag_login_id = $1
                    "#,
                )
                .bind(login_id)
                .bind(point.latitude)
                .bind(point.longitude)
                .bind(point.elevation)
                .execute(&self.pool)
                .await?
            }
            GeocodeUpdate::Unresolvable => {
                sqlx::query(
                    r#"
                    UPDATE ag_login
                    SET latitude = NULL, longitude = NULL, elevation = NULL, cannot_geocode = TRUE
                    WHERE ag_login_id = $1
                    "#,
                )
                .bind(login_id)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(KitError::LoginNotFound(login_id));
        }
        Ok(())
    }
}
