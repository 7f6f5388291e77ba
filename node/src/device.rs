//! Registering devices on the current database.

use tessera_engine::{Credentials, Database, Device, EntityKind, EntityRef, Error};

use crate::error::{NodeError, Result};
use crate::replicator::{CommitReport, Replicator};

/// A device added to the database, with the credentials it must use.
#[derive(Debug, Clone)]
pub struct DeviceRegistration {
    pub device: Device,
    pub credentials: Credentials,
    /// Room the device was joined to
    pub room_id: String,
    pub report: CommitReport,
}

/// Register a transport member for a new device and admit it to the database.
///
/// The device row and its addition to the database are one replicated
/// change. The member is then invited to the database room and the invite is
/// accepted with the device's own credentials.
pub async fn register_device(
    replicator: &Replicator,
    name: &str,
    display_name: Option<&str>,
) -> Result<DeviceRegistration> {
    let (database_id, target_id, room_id) = {
        let store = replicator.store();
        let store = store.lock().await;
        let database = store
            .current_database()
            .ok_or_else(|| NodeError::Bootstrap("no current database".into()))?;
        let primary = store.primary_target(&database.meta.id).ok_or_else(|| {
            NodeError::Bootstrap(format!("database {} has no primary target", database.meta.id))
        })?;
        let room_id = primary
            .room_id()
            .ok_or_else(|| NodeError::Bootstrap(format!("target {} has no room", primary.meta.id)))?
            .to_string();
        (database.meta.id, primary.meta.id, room_id)
    };

    let device_id = uuid::Uuid::new_v4().to_string();
    let username = format!("{name}-{}", &device_id[..8]);
    let transport = replicator.transport();
    let account = transport.register_member(&username, display_name).await?;

    let mut device = Device::new(device_id.clone(), database_id.clone(), name, crate::now_millis());
    if let Some(display_name) = display_name {
        device = device.with_display_name(display_name);
    }
    let credentials = Credentials {
        device_id,
        target_id,
        member_id: account.member_id.clone(),
        access_token: account.access_token.clone(),
    };

    let ((), report) = replicator
        .write(|tx| {
            tx.save(&mut device)?;
            let mut database = tx.get::<Database>(&database_id).ok_or_else(|| {
                Error::EntityNotFound(EntityRef::new(EntityKind::Database, database_id.clone()))
            })?;
            database.add_device(device.meta.id.clone());
            tx.save(&mut database)?;
            tx.set_credentials(credentials.clone());
            Ok(())
        })
        .await?;

    transport.invite(&room_id, &account.member_id).await?;
    transport.join_room(&room_id, &account.access_token).await?;
    tracing::info!(
        device_id = %device.meta.id,
        member_id = %account.member_id,
        room_id = %room_id,
        "device registered"
    );

    Ok(DeviceRegistration {
        device,
        credentials,
        room_id,
        report,
    })
}
