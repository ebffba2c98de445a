//! Field client over real HTTP against the axum router.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::Harness;
use fieldsync::api::build_router;
use fieldsync::client::{ClientOptions, FieldClient, HttpTransport, JobCache, OfflineQueue};
use fieldsync::config::secrets::SecretString;
use fieldsync::error::Error;
use fieldsync::model::*;
use fieldsync::store::Store;

async fn serve(h: &Harness) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(Arc::clone(&h.sync));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn http_client(
    h: &Harness,
    base_url: String,
    id: WorkOrderId,
    token: &str,
) -> FieldClient<HttpTransport> {
    let mut tokens = HashMap::new();
    tokens.insert(id, SecretString::from(token.to_string()));
    let c = h.clock.clone();
    FieldClient::new(
        HttpTransport::new(base_url, tokens),
        OfflineQueue::in_memory(),
        JobCache::in_memory(),
        ClientOptions::default(),
    )
    .with_clock(move || c.now())
}

fn direct(action: TimerAction) -> MutationRequest {
    MutationRequest::new(Mutation::Timer(TimerCommand::new(action)))
}

#[tokio::test]
async fn client_acks_rebases_and_drops_over_http() {
    let h = Harness::new();
    let (id, asg) = h.job(&["Ana", "Ben"]).await;
    let base_url = serve(&h).await;
    let ben = asg[1].token.as_str();
    let belt = ProductId::new("BELT-7");

    let mut client = http_client(&h, base_url, id, asg[0].token.as_str());
    client.refresh(id).await.unwrap();

    // Acknowledged.
    let report = client.timer(id, TimerAction::Start, None).await.unwrap();
    assert_eq!(report.acked, 1);
    let report = client
        .adjust_part(id, belt.clone(), QtyChange::Delta(2), Some(1250))
        .await
        .unwrap();
    assert_eq!(report.acked, 1);
    let job = h.sync.store().load(id).await.unwrap().unwrap();
    assert_eq!(job.line_items[&belt].qty, 2);
    assert_eq!(job.line_items[&belt].rate_cents, 1250);
    assert_eq!(
        client.view(id).unwrap().assignment.as_ref().unwrap().state,
        TimerState::InProgress
    );

    // Ben moves the job on; Ana's details edit carries a stale If-Match.
    h.sync
        .apply(
            ben,
            id,
            MutationRequest::new(Mutation::Parts(PartAdjustment::new(
                ProductId::new("WIPER-22"),
                QtyChange::Delta(1),
            ))),
        )
        .await
        .unwrap();
    let patch = DetailsPatch {
        cause: Some("glazed belt".into()),
        ..Default::default()
    };
    let report = client.edit_details(id, patch).await.unwrap();
    assert_eq!(report.rebased, 1);
    assert_eq!(report.acked, 1);
    let view = client.view(id).unwrap();
    assert_eq!(view.work_order.cause.as_deref(), Some("glazed belt"));
    assert!(view.line_item(&ProductId::new("WIPER-22")).is_some());

    // Ben completes; Ana's next part change is refused with 403 and dropped.
    h.sync.apply(ben, id, direct(TimerAction::Start)).await.unwrap();
    h.sync.apply(ben, id, direct(TimerAction::Complete)).await.unwrap();
    let report = client
        .adjust_part(id, belt.clone(), QtyChange::Delta(1), None)
        .await
        .unwrap();
    assert_eq!(report.rejected.len(), 1);
    let error = &report.rejected[0].error;
    assert!(matches!(error, Error::PermissionDenied(_)), "{error:?}");
    assert_eq!(
        error.to_string(),
        format!("permission denied: work order {id} is completed and read-only")
    );
    assert!(client.queue().is_empty());
    let view = client.view(id).unwrap();
    assert!(view.read_only);
    assert_eq!(view.line_item(&belt).unwrap().qty, 2);
}

#[tokio::test]
async fn unknown_token_is_refused_once_without_a_doubled_prefix() {
    let h = Harness::new();
    let (id, _) = h.job(&["Ana"]).await;
    let base_url = serve(&h).await;

    let mut client = http_client(&h, base_url, id, "asg_nope");
    let err = client.refresh(id).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)), "{err:?}");
    assert_eq!(err.to_string(), "permission denied: unknown token");
}
