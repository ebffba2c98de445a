//! # fieldsync
//!
//! Work order execution and field synchronization for mechanics who work
//! with intermittent connectivity.
//!
//! The server side is a [`sync::SyncController`] over a [`store::Store`]
//! (Postgres via [`db::Db`], or in memory), exposed over HTTP by [`api`].
//! The field side is a [`client::FieldClient`]: an optimistic local cache
//! plus a persistent offline queue that replays in order once the network
//! comes back.

pub mod api;
pub mod client;
pub mod collab;
pub mod config;
pub mod db;
pub mod error;
pub mod inspection;
pub mod line_items;
pub mod model;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod timer;
