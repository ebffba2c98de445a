//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use fieldsync::client::{
    ClientOptions, FieldClient, InProcessTransport, JobCache, OfflineMutation, OfflineQueue,
    SendOutcome, Transport,
};
use fieldsync::error::{Error, Result};
use fieldsync::model::{Assignment, JobSnapshot, NewWorkOrder, WorkOrderId};
use fieldsync::store::MemoryStore;
use fieldsync::sync::{SyncConfig, SyncController};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

pub fn minutes(n: i64) -> Duration {
    Duration::minutes(n)
}

/// A clock the test moves by hand, shared by server and client.
#[derive(Clone)]
pub struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(at)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap() = at;
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

pub struct Harness {
    pub sync: Arc<SyncController<MemoryStore>>,
    pub clock: TestClock,
}

impl Harness {
    pub fn new() -> Self {
        let clock = TestClock::new(t0());
        let c = clock.clone();
        let sync = SyncController::new(Arc::new(MemoryStore::new()), SyncConfig::default())
            .with_clock(move || c.now());
        Self {
            sync: Arc::new(sync),
            clock,
        }
    }

    /// A fresh work order with one assignment per mechanic name.
    pub async fn job(&self, mechanics: &[&str]) -> (WorkOrderId, Vec<Assignment>) {
        let job = self
            .sync
            .create_job(NewWorkOrder::new("ACME Freight", "PM service, unit 42"))
            .await
            .unwrap();
        let mut assignments = Vec::new();
        for name in mechanics {
            let a = self
                .sync
                .assign(job.id(), &name.to_lowercase(), name)
                .await
                .unwrap();
            assignments.push(a);
        }
        (job.id(), assignments)
    }

    /// A field client for `assignment` talking to this server in-process,
    /// behind a switch that can take it offline.
    pub async fn client(
        &self,
        id: WorkOrderId,
        assignment: &Assignment,
    ) -> (FieldClient<FlakyTransport<InProcessTransport<MemoryStore>>>, Switch) {
        let inner = InProcessTransport::new(Arc::clone(&self.sync))
            .with_token(id, assignment.token.as_str());
        let (transport, switch) = FlakyTransport::new(inner);
        let c = self.clock.clone();
        let mut client = FieldClient::new(
            transport,
            OfflineQueue::in_memory(),
            JobCache::in_memory(),
            ClientOptions::default(),
        )
        .with_clock(move || c.now());
        client.refresh(id).await.unwrap();
        (client, switch)
    }
}

/// Handles for breaking a [`FlakyTransport`] from the outside.
#[derive(Clone, Default)]
pub struct Switch {
    offline: Arc<AtomicBool>,
    lose_responses: Arc<AtomicBool>,
    sends: Arc<AtomicUsize>,
}

impl Switch {
    pub fn offline(&self, on: bool) {
        self.offline.store(on, Ordering::SeqCst);
    }

    /// Requests reach the server but the answers never come back.
    pub fn lose_responses(&self, on: bool) {
        self.lose_responses.store(on, Ordering::SeqCst);
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

pub struct FlakyTransport<T> {
    inner: T,
    switch: Switch,
}

impl<T: Transport> FlakyTransport<T> {
    pub fn new(inner: T) -> (Self, Switch) {
        let switch = Switch::default();
        (
            Self {
                inner,
                switch: switch.clone(),
            },
            switch,
        )
    }
}

impl<T: Transport> Transport for FlakyTransport<T> {
    async fn send(&self, entry: &OfflineMutation) -> SendOutcome {
        self.switch.sends.fetch_add(1, Ordering::SeqCst);
        if self.switch.offline.load(Ordering::SeqCst) {
            return SendOutcome::Network("offline".to_string());
        }
        let outcome = self.inner.send(entry).await;
        if self.switch.lose_responses.load(Ordering::SeqCst) {
            return SendOutcome::Network("connection reset".to_string());
        }
        outcome
    }

    async fn fetch(&self, id: WorkOrderId) -> Result<JobSnapshot> {
        if self.switch.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("offline".to_string()));
        }
        self.inner.fetch(id).await
    }
}
