//! Offline queue and job cache persistence.

mod common;

use std::sync::Arc;

use common::Harness;
use fieldsync::client::{FieldClient, InProcessTransport, JobCache, OfflineQueue};
use fieldsync::config::ClientConfig;
use fieldsync::model::*;
use fieldsync::store::Store;

#[tokio::test]
async fn queue_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    let id = WorkOrderId::new();
    let now = chrono::Utc::now();

    let first_key = {
        let mut queue = OfflineQueue::open(&path).unwrap();
        queue
            .enqueue(
                id,
                Mutation::Timer(TimerCommand::new(TimerAction::Start).at(now)),
                None,
                now,
            )
            .unwrap();
        queue
            .enqueue(
                id,
                Mutation::Status(StatusCommand {
                    status: WorkOrderStatus::InProgress,
                }),
                None,
                now,
            )
            .unwrap();
        queue.front(id).unwrap().idempotency_key.clone()
    };

    let reopened = OfflineQueue::open(&path).unwrap();
    assert_eq!(reopened.len(), 2);
    let pending: Vec<_> = reopened.pending(id).collect();
    assert_eq!(pending[0].kind(), MutationKind::Timer);
    assert_eq!(pending[0].idempotency_key, first_key);
    assert_eq!(pending[1].kind(), MutationKind::Status);
}

#[tokio::test]
async fn acknowledged_entries_are_gone_after_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");
    let id = WorkOrderId::new();
    let now = chrono::Utc::now();

    let mut queue = OfflineQueue::open(&path).unwrap();
    queue
        .enqueue(
            id,
            Mutation::Parts(PartAdjustment::new(
                ProductId::new("X"),
                QtyChange::Target(1),
            )),
            None,
            now,
        )
        .unwrap();
    let key = queue.front(id).unwrap().idempotency_key.clone();
    queue.ack(id, &key).unwrap();
    drop(queue);

    assert!(OfflineQueue::open(&path).unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_entry_is_removed() {
    let id = WorkOrderId::new();
    let now = chrono::Utc::now();
    let mut queue = OfflineQueue::in_memory();
    let local_id = queue
        .enqueue(
            id,
            Mutation::Timer(TimerCommand::new(TimerAction::Start)),
            None,
            now,
        )
        .unwrap();
    assert!(queue.cancel(local_id).unwrap().is_some());
    assert!(queue.is_empty());
    assert!(queue.work_orders().is_empty());
}

#[tokio::test]
async fn field_client_resumes_from_its_state_dir() {
    let h = Harness::new();
    let (id, asg) = h.job(&["Ana"]).await;
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig::from_toml(&format!(
        "server_url = \"http://unused\"\nstate_dir = \"{}\"\n",
        dir.path().join("state").display()
    ))
    .unwrap();

    {
        let transport =
            InProcessTransport::new(Arc::clone(&h.sync)).with_token(id, asg[0].token.as_str());
        let mut client = FieldClient::open(&config, transport).unwrap();
        client.refresh(id).await.unwrap();
        client
            .save_inspection_draft(id, InspectionSubmission::default())
            .unwrap();
    }

    // A second process: queue and cache come back from disk without
    // touching the network.
    let cache = JobCache::open(config.state_dir.join("cache.json")).unwrap();
    assert_eq!(cache.view(id).unwrap().work_order.id, id);
    assert!(cache.draft(id).unwrap().dirty);
    assert!(
        OfflineQueue::open(config.state_dir.join("queue.json"))
            .unwrap()
            .is_empty()
    );
    assert!(h.sync.store().load(id).await.unwrap().unwrap().inspection.is_none());
}
