//! Creating the project database, or joining one that already exists.
//!
//! A new database needs a room, and a room only exists once the database has
//! been represented on its primary target. Bootstrap therefore persists the
//! database and its targets without scheduling, then schedules them
//! explicitly as newly created in the same transaction. The first flush
//! creates the room and the rest of the loop follows.

use tessera_engine::{
    Credentials, Database, Device, Entity, EntityKind, ReplicationTarget, SaveOptions,
    StateFixture, VersionedEntity, DATABASE_STATE, TARGET_STATE,
};

use crate::error::{NodeError, Result};
use crate::ingest::{Inbound, SyncOutcome};
use crate::replicator::{CommitReport, Replicator};
use crate::targets::TRANSPORT_TARGET_KIND;
use crate::transport::MemberAccount;

/// Result of [`bootstrap`].
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub database_id: String,
    /// A new database was created by this call
    pub created: bool,
    pub report: CommitReport,
}

/// Open the project database, creating it on first run.
///
/// With an account, the database gets a primary transport target, and the
/// local device and its credentials are stored. Rerunning against a store
/// that already holds the project only retries pending flushes.
pub async fn bootstrap(
    replicator: &Replicator,
    project: &str,
    device_name: &str,
    account: Option<&MemberAccount>,
) -> Result<BootstrapOutcome> {
    let existing = {
        let store = replicator.store();
        let store = store.lock().await;
        match store.config() {
            Some(config) => Some(store.current_database().ok_or_else(|| {
                NodeError::Bootstrap(format!(
                    "configured database {} is missing",
                    config.database_id
                ))
            })?),
            None => None,
        }
    };

    if let Some(database) = existing {
        if database.name != project {
            return Err(NodeError::Bootstrap(format!(
                "store belongs to database '{}', not '{project}'",
                database.name
            )));
        }
        tracing::info!(database_id = %database.meta.id, "resuming existing database");
        let report = replicator.retry_pending().await?;
        return Ok(BootstrapOutcome {
            database_id: database.meta.id,
            created: false,
            report,
        });
    }

    let now = crate::now_millis();
    let database_id = uuid::Uuid::new_v4().to_string();
    let mut database = Database::new(database_id.clone(), project, now);
    let mut dummy = ReplicationTarget::dummy(&database_id, now);
    let mut primary = account.map(|_| {
        ReplicationTarget::new(
            uuid::Uuid::new_v4().to_string(),
            database_id.clone(),
            TRANSPORT_TARGET_KIND,
            TRANSPORT_TARGET_KIND,
            now,
        )
        .with_primary(true)
    });
    let mut device = account.map(|_| {
        Device::new(uuid::Uuid::new_v4().to_string(), database_id.clone(), device_name, now)
    });
    if let Some(device) = &device {
        database.add_device(device.meta.id.clone());
    }

    let ((), report) = replicator
        .write(|tx| {
            let nested = SaveOptions::top_level().nested();
            tx.save_with(&mut database, nested)?;
            tx.set_current_database(&database.meta.id)?;
            tx.save_with(&mut dummy, nested)?;
            if let Some(target) = primary.as_mut() {
                tx.save_with(target, nested)?;
            }
            if let Some(device) = device.as_mut() {
                tx.save_with(device, nested)?;
            }
            if let (Some(account), Some(target), Some(device)) = (account, &primary, &device) {
                tx.set_credentials(Credentials {
                    device_id: device.meta.id.clone(),
                    target_id: target.meta.id.clone(),
                    member_id: account.member_id.clone(),
                    access_token: account.access_token.clone(),
                });
            }

            tx.schedule_replication(&database.entity_ref(), true)?;
            tx.schedule_replication(&dummy.entity_ref(), true)?;
            if let Some(target) = &primary {
                tx.schedule_replication(&target.entity_ref(), true)?;
            }
            if let Some(device) = &device {
                tx.schedule_replication(&device.entity_ref(), true)?;
            }
            Ok(())
        })
        .await?;

    tracing::info!(
        database_id = %database_id,
        project = %project,
        transport = account.is_some(),
        "database created"
    );
    Ok(BootstrapOutcome {
        database_id,
        created: true,
        report,
    })
}

/// Result of [`join_database`].
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub database_id: String,
    pub synced: SyncOutcome,
}

/// Adopt the database published in a room, then load the room's history.
///
/// The database and primary target fixtures are loaded raw, so joining never
/// schedules replication of its own.
pub async fn join_database(
    replicator: &Replicator,
    inbound: &Inbound,
    room_id: &str,
    credentials: Option<Credentials>,
) -> Result<JoinOutcome> {
    let transport = replicator.transport();
    let database = read_fixture(transport.get_room_state(room_id, DATABASE_STATE).await?, EntityKind::Database)?
        .ok_or_else(|| NodeError::Bootstrap(format!("room {room_id} has no database state")))?;
    let target = read_fixture(
        transport.get_room_state(room_id, TARGET_STATE).await?,
        EntityKind::ReplicationTarget,
    )?;
    let database_id = database.id().clone();

    replicator
        .write(|tx| {
            tx.load_fixture(database)?;
            if let Some(target) = target {
                tx.load_fixture(target)?;
            }
            tx.set_current_database(&database_id)?;
            if let Some(credentials) = credentials {
                tx.set_credentials(credentials);
            }
            Ok(())
        })
        .await?;

    let synced = inbound.sync_room(room_id).await?;
    tracing::info!(
        database_id = %database_id,
        room_id = %room_id,
        applied = synced.result.applied.len(),
        "joined database"
    );
    Ok(JoinOutcome {
        database_id,
        synced,
    })
}

fn read_fixture(state: Option<serde_json::Value>, kind: EntityKind) -> Result<Option<Entity>> {
    let Some(state) = state else {
        return Ok(None);
    };
    let StateFixture { fixture } = serde_json::from_value(state)?;
    Ok(Some(Entity::from_snapshot(kind, fixture)?))
}
