//! Inbound replication: reading other devices' batches from rooms.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tessera_engine::{EventFilter, IngestResult, ReplicationBatch, REPLICATION_EVENT};

use crate::error::Result;
use crate::transport::Transport;
use crate::{now_millis, SharedStore};

const PAGE_SIZE: u32 = 100;

/// Outcome of syncing one room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    pub room_id: String,
    /// Token to continue from next time
    pub next_since: u64,
    pub events: usize,
    /// Events that could not be decoded or applied
    pub skipped: usize,
    pub result: IngestResult,
}

/// Follows replication rooms and loads what other nodes published.
pub struct Inbound {
    store: SharedStore,
    transport: Arc<dyn Transport>,
    /// room id -> last seen event position
    tokens: DashMap<String, u64>,
}

impl Inbound {
    pub fn new(store: SharedStore, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            tokens: DashMap::new(),
        }
    }

    /// Resume from previously persisted sync tokens.
    pub fn with_tokens(self, tokens: BTreeMap<String, u64>) -> Self {
        for (room_id, since) in tokens {
            self.tokens.insert(room_id, since);
        }
        self
    }

    pub fn tokens(&self) -> BTreeMap<String, u64> {
        self.tokens
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Sync the room of the current database, if it has one.
    pub async fn sync_current(&self) -> Result<Option<SyncOutcome>> {
        let room_id = {
            let store = self.store.lock().await;
            store
                .current_database()
                .and_then(|db| db.room_id().map(str::to_string))
        };
        match room_id {
            Some(room_id) => self.sync_room(&room_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Read every replication event after the room's token and ingest it.
    ///
    /// Events that fail to decode or apply are skipped with a warning so one
    /// bad batch cannot wedge the room.
    pub async fn sync_room(&self, room_id: &str) -> Result<SyncOutcome> {
        let mut since = self.tokens.get(room_id).map(|t| *t);
        let filter = EventFilter::of_type(REPLICATION_EVENT).with_limit(PAGE_SIZE);
        let mut outcome = SyncOutcome {
            room_id: room_id.to_string(),
            next_since: since.unwrap_or(0),
            ..SyncOutcome::default()
        };

        loop {
            let page = self.transport.read_events(room_id, &filter, since).await?;
            for event in &page.events {
                outcome.events += 1;
                let batch: ReplicationBatch = match serde_json::from_value(event.content.clone()) {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::warn!(room_id = %room_id, event_id = %event.event_id, error = %e, "undecodable batch skipped");
                        outcome.skipped += 1;
                        continue;
                    }
                };

                let ingested = self.store.lock().await.ingest(&batch, now_millis());
                match ingested {
                    Ok(result) => {
                        if !result.own_origin && !result.applied.is_empty() {
                            tracing::debug!(
                                room_id = %room_id,
                                txn_id = %batch.txn_id,
                                origin = %batch.origin,
                                applied = result.applied.len(),
                                "batch ingested"
                            );
                        }
                        outcome.result.merge(result);
                    }
                    Err(e) => {
                        tracing::warn!(room_id = %room_id, txn_id = %batch.txn_id, error = %e, "batch rejected");
                        outcome.skipped += 1;
                    }
                }
            }

            outcome.next_since = page.next_since;
            since = Some(page.next_since);
            self.tokens.insert(room_id.to_string(), page.next_since);
            if !page.has_more {
                break;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use tessera_engine::{Record, Schema, Store, VersionedEntity};
    use tokio::sync::Mutex;

    fn shared(node_id: &str) -> SharedStore {
        Arc::new(Mutex::new(Store::new(Schema::new(1), node_id)))
    }

    fn batch(origin: &str, txn: &str, title: &str, version: u64) -> serde_json::Value {
        let mut record = Record::new("r-1", "db-1", "todos", json!({ "title": title }), 1000);
        record.meta.version = version;
        let entity = record.into_entity();
        serde_json::to_value(ReplicationBatch {
            txn_id: txn.into(),
            origin: origin.into(),
            entries: vec![tessera_engine::BatchEntry {
                entity: entity.entity_ref(),
                snapshot: entity.snapshot().unwrap(),
            }],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn applies_foreign_batches_and_advances_token() {
        let transport = MemoryTransport::new();
        let room = transport.create_room(None, None).await.unwrap();
        transport
            .publish(&room, REPLICATION_EVENT, batch("other", "other:1", "a", 0))
            .await
            .unwrap();
        transport
            .publish(&room, REPLICATION_EVENT, batch("me", "me:1", "mine", 5))
            .await
            .unwrap();
        transport
            .publish(&room, REPLICATION_EVENT, json!({"not": "a batch"}))
            .await
            .unwrap();

        let store = shared("me");
        let inbound = Inbound::new(Arc::clone(&store), Arc::new(transport.clone()));
        let outcome = inbound.sync_room(&room).await.unwrap();

        assert_eq!(outcome.events, 3);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.result.applied.len(), 1);
        assert_eq!(outcome.next_since, 3);
        assert_eq!(inbound.tokens().get(&room), Some(&3));

        let record = store.lock().await.get::<Record>("r-1").unwrap();
        assert_eq!(record.payload["title"], "a");

        // Nothing new to read.
        let again = inbound.sync_room(&room).await.unwrap();
        assert_eq!(again.events, 0);
    }

    #[tokio::test]
    async fn pages_through_long_histories() {
        let transport = MemoryTransport::new();
        let room = transport.create_room(None, None).await.unwrap();
        for i in 0..250u64 {
            transport
                .publish(&room, REPLICATION_EVENT, batch("other", &format!("other:{i}"), "x", i))
                .await
                .unwrap();
        }

        let store = shared("me");
        let inbound = Inbound::new(Arc::clone(&store), Arc::new(transport));
        let outcome = inbound.sync_room(&room).await.unwrap();

        assert_eq!(outcome.events, 250);
        assert_eq!(outcome.next_since, 250);
        let record = store.lock().await.get::<Record>("r-1").unwrap();
        assert_eq!(record.meta.version, 249);
    }
}
