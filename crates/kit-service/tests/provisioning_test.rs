//! 采样盒发放流程集成测试
//!
//! 使用内存存储，无需外部依赖

use std::sync::Arc;

use futures::future::join_all;
use kit_provisioning::KitError;
use kit_provisioning::models::{BarcodeStatusUpdate, NewLogin, SequencingStatus};
use kit_provisioning::repository::{InMemoryKitStore, KitStore};
use kit_provisioning::service::ProvisioningWorkflow;
use kit_shared::config::ProvisioningConfig;

fn workflow(store: Arc<InMemoryKitStore>) -> ProvisioningWorkflow<InMemoryKitStore> {
    ProvisioningWorkflow::new(
        store,
        ProvisioningConfig {
            bcrypt_cost: 4,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_claim_once_then_already_claimed() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = workflow(store.clone());
    let login = store
        .ensure_login(NewLogin::new("first@example.org"))
        .await
        .unwrap();

    let printed = workflow
        .create_handout_kits(1, Some(3), true)
        .await
        .unwrap()
        .remove(0);
    let handout = store.get_handout_kit(&printed.kit_id).await.unwrap().unwrap();

    let kit = workflow
        .claim_handout_kit(&printed.kit_id, login)
        .await
        .unwrap();
    assert_eq!(kit.supplied_kit_id, printed.kit_id);
    assert_eq!(kit.login_id, login);
    assert_eq!(kit.verification_code, printed.verification_code);
    assert!(kit.print_results);
    assert!(!kit.kit_verified);
    assert_eq!(kit.barcodes.len(), handout.barcodes.len());
    assert_eq!(kit.barcodes, printed.barcodes);

    for _ in 0..3 {
        let err = workflow
            .claim_handout_kit(&printed.kit_id, login)
            .await
            .unwrap_err();
        assert!(matches!(err, KitError::AlreadyClaimed(_)));
    }

    // 不会重复生成采样盒或条码
    assert_eq!(store.kit_count(), 1);
    assert_eq!(
        store.kit_barcodes(&printed.kit_id).await.unwrap().len(),
        3
    );
}

#[tokio::test]
async fn test_concurrent_claims_single_winner() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = Arc::new(workflow(store.clone()));
    let printed = workflow
        .create_handout_kits(1, None, false)
        .await
        .unwrap()
        .remove(0);

    let mut logins = Vec::new();
    for i in 0..16 {
        logins.push(
            store
                .ensure_login(NewLogin::new(format!("racer{i}@example.org")))
                .await
                .unwrap(),
        );
    }

    let tasks = logins.into_iter().map(|login| {
        let workflow = workflow.clone();
        let kit_id = printed.kit_id.clone();
        tokio::spawn(async move { workflow.claim_handout_kit(&kit_id, login).await })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(KitError::AlreadyClaimed(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(store.kit_count(), 1);
    assert_eq!(store.handout_count(), 0);
}

#[tokio::test]
async fn test_created_handouts_are_unique_and_checkable() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = workflow(store.clone());

    let printed = workflow.create_handout_kits(20, Some(2), false).await.unwrap();
    assert_eq!(printed.len(), 20);

    let ids = store.all_kit_ids().await.unwrap();
    assert_eq!(ids.len(), 20);

    let mut barcodes: Vec<&String> = printed.iter().flat_map(|p| &p.barcodes).collect();
    barcodes.sort();
    barcodes.dedup();
    assert_eq!(barcodes.len(), 40);
    assert!(barcodes.iter().all(|b| b.len() == 9));

    let first = &printed[0];
    assert_eq!(first.kit_id.len(), 8);
    assert!(!first.kit_id.contains(['i', 'l', 'o']));
    assert_ne!(first.password.as_bytes()[0], b'0');
    assert!(workflow
        .check_handout_credentials(&first.kit_id, &first.password)
        .await
        .unwrap());
    assert!(!workflow
        .check_handout_credentials(&first.kit_id, "00000000")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_collision_is_retried() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = workflow(store.clone());
    store.inject_collisions(2);

    let printed = workflow.create_handout_kits(1, None, false).await.unwrap();
    assert_eq!(printed.len(), 1);
    assert_eq!(store.handout_count(), 1);
}

#[tokio::test]
async fn test_register_and_verify_kit() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = workflow(store.clone());
    let login = store
        .ensure_login(NewLogin::new("direct@example.org"))
        .await
        .unwrap();

    let (kit, credentials) = workflow.register_new_kit(login, Some(1)).await.unwrap();
    assert_eq!(kit.barcodes.len(), 1);

    let err = workflow
        .verify_kit(&kit.supplied_kit_id, "00000")
        .await
        .unwrap_err();
    assert!(matches!(err, KitError::VerificationCodeMismatch(_)));

    workflow
        .verify_kit(&kit.supplied_kit_id, &credentials.verification_code)
        .await
        .unwrap();
    assert!(store
        .get_kit(&kit.supplied_kit_id)
        .await
        .unwrap()
        .unwrap()
        .kit_verified);

    let err = workflow.register_new_kit(uuid::Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(err, KitError::LoginNotFound(_)));
}

#[tokio::test]
async fn test_barcode_lifecycle_after_claim() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = workflow(store.clone());
    let login = store
        .ensure_login(NewLogin::new("lab@example.org"))
        .await
        .unwrap();
    let printed = workflow
        .create_handout_kits(1, Some(1), false)
        .await
        .unwrap()
        .remove(0);
    workflow
        .claim_handout_kit(&printed.kit_id, login)
        .await
        .unwrap();

    let barcode = &printed.barcodes[0];
    let updated = store
        .update_barcode_status(
            barcode,
            BarcodeStatusUpdate {
                status: Some("Received".to_string()),
                sequencing_status: Some(SequencingStatus::Success),
                biomass_remaining: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.sequencing_status, SequencingStatus::Success);

    let err = store
        .update_barcode_status(
            barcode,
            BarcodeStatusUpdate {
                sequencing_status: Some(SequencingStatus::FailedSequencing),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, KitError::InvalidStatusTransition { .. }));

    let barcodes = store.kit_barcodes(&printed.kit_id).await.unwrap();
    assert_eq!(barcodes[0].status.as_deref(), Some("Received"));
    assert_eq!(barcodes[0].biomass_remaining, Some(true));
}

#[tokio::test]
async fn test_failed_batch_leaves_no_handouts() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = ProvisioningWorkflow::new(
        store.clone(),
        ProvisioningConfig {
            bcrypt_cost: 4,
            kit_id_length: 1,
            ..Default::default()
        },
    );

    // 长度为 1 的编号空间只有 23 个
    let err = workflow
        .create_handout_kits(24, Some(1), false)
        .await
        .unwrap_err();
    assert!(matches!(err, KitError::Validation(_)));
    assert_eq!(store.handout_count(), 0);
    assert!(store.all_kit_ids().await.unwrap().is_empty());

    let printed = workflow.create_handout_kits(23, Some(1), false).await.unwrap();
    assert_eq!(printed.len(), 23);
    assert_eq!(store.handout_count(), 23);
}

#[tokio::test]
async fn test_collision_retries_whole_batch() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = workflow(store.clone());
    store.inject_collisions(1);

    let printed = workflow.create_handout_kits(5, Some(1), false).await.unwrap();
    assert_eq!(printed.len(), 5);
    assert_eq!(store.handout_count(), 5);
    for credentials in &printed {
        assert!(workflow
            .check_handout_credentials(&credentials.kit_id, &credentials.password)
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn test_change_handout_password() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = workflow(store.clone());
    let printed = workflow
        .create_handout_kits(1, Some(1), false)
        .await
        .unwrap()
        .remove(0);

    workflow
        .change_handout_password(&printed.kit_id, "24681357")
        .await
        .unwrap();
    assert!(!workflow
        .check_handout_credentials(&printed.kit_id, &printed.password)
        .await
        .unwrap());
    assert!(workflow
        .check_handout_credentials(&printed.kit_id, "24681357")
        .await
        .unwrap());

    let err = workflow
        .change_handout_password("zzzzzzzz", "24681357")
        .await
        .unwrap_err();
    assert!(matches!(err, KitError::HandoutKitNotFound(_)));
}

#[tokio::test]
async fn test_change_kit_password_and_list_kits() {
    let store = Arc::new(InMemoryKitStore::new());
    let workflow = workflow(store.clone());
    let login = store
        .ensure_login(NewLogin::new("owner@example.org"))
        .await
        .unwrap();

    let (registered, _) = workflow.register_new_kit(login, Some(1)).await.unwrap();
    let printed = workflow
        .create_handout_kits(1, Some(2), false)
        .await
        .unwrap()
        .remove(0);
    workflow
        .claim_handout_kit(&printed.kit_id, login)
        .await
        .unwrap();

    let kits = workflow.kits_for_login(login).await.unwrap();
    let ids: Vec<&str> = kits.iter().map(|k| k.supplied_kit_id.as_str()).collect();
    assert_eq!(ids, vec![registered.supplied_kit_id.as_str(), printed.kit_id.as_str()]);
    assert_eq!(kits[1].barcodes.len(), 2);

    workflow
        .change_kit_password(&registered.supplied_kit_id, "13572468")
        .await
        .unwrap();
    let stored = store
        .get_kit(&registered.supplied_kit_id)
        .await
        .unwrap()
        .unwrap();
    assert!(bcrypt::verify("13572468", &stored.password_hash).unwrap());

    assert!(workflow
        .kits_for_login(uuid::Uuid::new_v4())
        .await
        .unwrap()
        .is_empty());
}
