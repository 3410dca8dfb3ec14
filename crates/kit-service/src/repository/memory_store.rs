//! 内存采样盒存储
//!
//! 所有表放在同一把锁后面，每个操作持锁期间完成全部读写，
//! 因此与 PostgreSQL 实现具有相同的原子性。适用于测试和本地开发。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::KitStore;
use crate::error::{KitError, Result};
use crate::identifier;
use crate::models::{
    Barcode, BarcodeStatusUpdate, GeocodeUpdate, HandoutKit, Kit, KitDraft, Login, NewLogin,
    normalize_email,
};

#[derive(Debug, Default)]
struct Tables {
    /// 按插入顺序保存
    logins: Vec<Login>,
    kits: Vec<Kit>,
    handouts: BTreeMap<String, HandoutKit>,
    barcodes: HashMap<String, Barcode>,
    barcode_seq: i64,
}

impl Tables {
    fn login_mut(&mut self, login_id: Uuid) -> Result<&mut Login> {
        self.logins
            .iter_mut()
            .find(|l| l.id == login_id)
            .ok_or(KitError::LoginNotFound(login_id))
    }

    fn kit_ids(&self) -> HashSet<String> {
        self.kits
            .iter()
            .map(|k| k.supplied_kit_id.clone())
            .chain(self.handouts.keys().cloned())
            .collect()
    }

    fn allocate_barcodes(&mut self, count: u32, width: usize) -> Vec<String> {
        (0..count)
            .map(|_| {
                self.barcode_seq += 1;
                let code = identifier::format_barcode(self.barcode_seq, width);
                self.barcodes
                    .insert(code.clone(), Barcode::new(code.clone()));
                code
            })
            .collect()
    }
}

/// 内存采样盒存储
#[derive(Debug, Clone, Default)]
pub struct InMemoryKitStore {
    tables: Arc<Mutex<Tables>>,
    /// 接下来若干次新建采样盒时模拟标识符冲突
    pending_collisions: Arc<AtomicUsize>,
}

impl InMemoryKitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来 `count` 次新建采样盒返回 `IdentifierCollision`
    pub fn inject_collisions(&self, count: usize) {
        self.pending_collisions.store(count, Ordering::SeqCst);
    }

    fn take_collision(&self) -> bool {
        self.pending_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// 按 id 读取登录快照
    pub fn login(&self, login_id: Uuid) -> Option<Login> {
        self.tables
            .lock()
            .logins
            .iter()
            .find(|l| l.id == login_id)
            .cloned()
    }

    /// 全部登录快照（插入顺序）
    pub fn logins(&self) -> Vec<Login> {
        self.tables.lock().logins.clone()
    }

    pub fn handout_count(&self) -> usize {
        self.tables.lock().handouts.len()
    }

    pub fn kit_count(&self) -> usize {
        self.tables.lock().kits.len()
    }
}

#[async_trait]
impl KitStore for InMemoryKitStore {
    async fn ensure_login(&self, login: NewLogin) -> Result<Uuid> {
        let email = login.normalized_email();
        if email.is_empty() {
            return Err(KitError::Validation("邮箱不能为空".to_string()));
        }

        let mut tables = self.tables.lock();
        if let Some(existing) = tables
            .logins
            .iter()
            .find(|l| normalize_email(&l.email) == email)
        {
            return Ok(existing.id);
        }

        let id = Uuid::new_v4();
        tables.logins.push(Login {
            id,
            email,
            name: login.name,
            address: login.address,
            city: login.city,
            state: login.state,
            zip: login.zip,
            country: login.country,
            latitude: None,
            longitude: None,
            elevation: None,
            cannot_geocode: None,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_login(&self, login_id: Uuid) -> Result<Option<Login>> {
        Ok(self.login(login_id))
    }

    async fn all_kit_ids(&self) -> Result<HashSet<String>> {
        Ok(self.tables.lock().kit_ids())
    }

    async fn create_handout_kits(&self, drafts: Vec<KitDraft>) -> Result<Vec<HandoutKit>> {
        let mut tables = self.tables.lock();

        // 先选定全部编号，失败时表未被改动
        let mut taken = tables.kit_ids();
        let mut kit_ids = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let kit_id = identifier::ensure_unique_kit_id(&taken, draft.kit_id_length)?;
            taken.insert(kit_id.clone());
            kit_ids.push(kit_id);
        }
        if let Some(first) = kit_ids.first()
            && self.take_collision()
        {
            return Err(KitError::IdentifierCollision(first.clone()));
        }

        let now = Utc::now();
        let handouts: Vec<HandoutKit> = drafts
            .into_iter()
            .zip(kit_ids)
            .map(|(draft, kit_id)| HandoutKit {
                barcodes: tables.allocate_barcodes(draft.swabs_per_kit, draft.barcode_width),
                kit_id,
                password_hash: draft.password_hash,
                verification_code: draft.verification_code,
                swabs_per_kit: i64::from(draft.swabs_per_kit),
                print_results: Some(draft.print_results),
                created_at: now,
            })
            .collect();

        for handout in &handouts {
            tables.handouts.insert(handout.kit_id.clone(), handout.clone());
        }
        Ok(handouts)
    }

    async fn create_kit(&self, login_id: Uuid, draft: KitDraft) -> Result<Kit> {
        let mut tables = self.tables.lock();
        tables.login_mut(login_id)?;

        let kit_id = identifier::ensure_unique_kit_id(&tables.kit_ids(), draft.kit_id_length)?;
        if self.take_collision() {
            return Err(KitError::IdentifierCollision(kit_id));
        }

        let barcodes = tables.allocate_barcodes(draft.swabs_per_kit, draft.barcode_width);
        let kit = Kit {
            id: Uuid::new_v4(),
            login_id,
            supplied_kit_id: kit_id,
            password_hash: draft.password_hash,
            verification_code: draft.verification_code,
            swabs_per_kit: i64::from(draft.swabs_per_kit),
            kit_verified: false,
            print_results: draft.print_results,
            created_at: Utc::now(),
            barcodes,
        };
        tables.kits.push(kit.clone());
        Ok(kit)
    }

    async fn get_kit(&self, supplied_kit_id: &str) -> Result<Option<Kit>> {
        Ok(self
            .tables
            .lock()
            .kits
            .iter()
            .find(|k| k.supplied_kit_id == supplied_kit_id)
            .cloned())
    }

    async fn kits_by_login(&self, login_id: Uuid) -> Result<Vec<Kit>> {
        Ok(self
            .tables
            .lock()
            .kits
            .iter()
            .filter(|k| k.login_id == login_id)
            .cloned()
            .collect())
    }

    async fn get_handout_kit(&self, kit_id: &str) -> Result<Option<HandoutKit>> {
        Ok(self.tables.lock().handouts.get(kit_id).cloned())
    }

    async fn handout_credentials(&self, kit_id: &str) -> Result<Option<String>> {
        Ok(self
            .tables
            .lock()
            .handouts
            .get(kit_id)
            .map(|h| h.password_hash.clone()))
    }

    async fn update_kit_password(&self, supplied_kit_id: &str, password_hash: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let kit = tables
            .kits
            .iter_mut()
            .find(|k| k.supplied_kit_id == supplied_kit_id)
            .ok_or_else(|| KitError::KitNotFound(supplied_kit_id.to_string()))?;
        kit.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn update_handout_password(&self, kit_id: &str, password_hash: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let handout = tables
            .handouts
            .get_mut(kit_id)
            .ok_or_else(|| KitError::HandoutKitNotFound(kit_id.to_string()))?;
        handout.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn verify_kit(&self, supplied_kit_id: &str, verification_code: &str) -> Result<bool> {
        let mut tables = self.tables.lock();
        let kit = tables
            .kits
            .iter_mut()
            .find(|k| k.supplied_kit_id == supplied_kit_id)
            .ok_or_else(|| KitError::KitNotFound(supplied_kit_id.to_string()))?;

        if kit.verification_code != verification_code {
            return Ok(false);
        }
        kit.kit_verified = true;
        Ok(true)
    }

    async fn promote_handout_kit(&self, handout_id: &str, login_id: Uuid) -> Result<Kit> {
        let mut tables = self.tables.lock();
        tables.login_mut(login_id)?;

        let handout = tables
            .handouts
            .remove(handout_id)
            .ok_or_else(|| KitError::HandoutKitNotFound(handout_id.to_string()))?;

        let mut barcodes = handout.barcodes;
        barcodes.sort();
        let kit = Kit {
            id: Uuid::new_v4(),
            login_id,
            supplied_kit_id: handout.kit_id,
            password_hash: handout.password_hash,
            verification_code: handout.verification_code,
            swabs_per_kit: handout.swabs_per_kit,
            kit_verified: false,
            print_results: handout.print_results.unwrap_or(false),
            created_at: Utc::now(),
            barcodes,
        };
        tables.kits.push(kit.clone());
        Ok(kit)
    }

    async fn kit_barcodes(&self, supplied_kit_id: &str) -> Result<Vec<Barcode>> {
        let tables = self.tables.lock();
        let kit = tables
            .kits
            .iter()
            .find(|k| k.supplied_kit_id == supplied_kit_id)
            .ok_or_else(|| KitError::KitNotFound(supplied_kit_id.to_string()))?;

        let mut barcodes: Vec<Barcode> = kit
            .barcodes
            .iter()
            .filter_map(|code| tables.barcodes.get(code).cloned())
            .collect();
        barcodes.sort_by(|a, b| a.barcode.cmp(&b.barcode));
        Ok(barcodes)
    }

    async fn update_barcode_status(
        &self,
        barcode: &str,
        update: BarcodeStatusUpdate,
    ) -> Result<Barcode> {
        let mut tables = self.tables.lock();
        let current = tables
            .barcodes
            .get_mut(barcode)
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
        Ok(current.clone())
    }

    async fn logins_pending_geocode(&self, limit: Option<usize>) -> Result<Vec<Login>> {
        let tables = self.tables.lock();
        let pending = tables.logins.iter().filter(|l| l.is_pending_geocode());
        Ok(match limit {
            Some(n) => pending.take(n).cloned().collect(),
            None => pending.cloned().collect(),
        })
    }

    async fn logins_marked_unresolvable(&self) -> Result<Vec<Login>> {
        Ok(self
            .tables
            .lock()
            .logins
            .iter()
            .filter(|l| l.cannot_geocode == Some(true))
            .cloned()
            .collect())
    }

    async fn clear_geocode_failure(&self, login_id: Uuid) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.login_mut(login_id)?.cannot_geocode = None;
        Ok(())
    }

    async fn set_geocode_result(&self, login_id: Uuid, update: GeocodeUpdate) -> Result<()> {
        let mut tables = self.tables.lock();
        let login = tables.login_mut(login_id)?;
        match update {
            GeocodeUpdate::Resolved(point) => {
                login.latitude = Some(point.latitude);
                login.longitude = Some(point.longitude);
                login.elevation = Some(point.elevation);
                login.cannot_geocode = None;
            }
            GeocodeUpdate::Unresolvable => {
                login.latitude = None;
                login.longitude = None;
                login.elevation = None;
                login.cannot_geocode = Some(true);
            }
        }
        Ok(())
    }
}
