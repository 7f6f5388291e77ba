//! Save pipeline: turning a persisted write into replication intents.
//!
//! Planning is pure. [`plan_replication`] looks at the saved entity and the
//! database's targets and returns the work to do, in order, without touching
//! the store. The transaction then executes the intents.

use crate::{
    error::Result, Entity, EntityId, EntityRef, MetadataMap, ReplicationTarget, TargetKinds,
};

/// Options controlling one save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveOptions {
    /// Nesting level. Only depth 0 schedules replication; saves performed while
    /// scheduling (such as creating the fallback target) run one level deeper.
    pub depth: u32,
}

impl SaveOptions {
    pub fn top_level() -> Self {
        Self::default()
    }

    pub fn nested(self) -> Self {
        Self {
            depth: self.depth + 1,
        }
    }

    pub fn schedules(&self) -> bool {
        self.depth == 0
    }
}

/// A unit of work produced by the save pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    CreateRepresentationLog {
        target_id: EntityId,
        entity: EntityRef,
        method: String,
        metadata: MetadataMap,
    },
    CreateReplicationLog {
        target_id: EntityId,
        entity: EntityRef,
        payload: serde_json::Value,
    },
    RegisterFlush {
        target: ReplicationTarget,
    },
}

/// Plan replication of `entity` to each target.
///
/// Per target the order is fixed: representation log (only for a newly created
/// entity that has a strategy, on a target kind that supports representations),
/// then the replication log, then the flush registration.
pub fn plan_replication(
    entity: &Entity,
    created: bool,
    strategy: Option<&str>,
    targets: &[ReplicationTarget],
    kinds: &TargetKinds,
) -> Result<Vec<Intent>> {
    let entity_ref = entity.entity_ref();
    let payload = entity.snapshot()?;
    let mut intents = Vec::with_capacity(targets.len() * 3);

    for target in targets {
        let capabilities = kinds.get(&target.kind)?;

        if let (true, Some(method), true) = (created, strategy, capabilities.represents) {
            intents.push(Intent::CreateRepresentationLog {
                target_id: target.meta.id.clone(),
                entity: entity_ref.clone(),
                method: method.to_string(),
                metadata: entity.representation_metadata(),
            });
        }

        intents.push(Intent::CreateReplicationLog {
            target_id: target.meta.id.clone(),
            entity: entity_ref.clone(),
            payload: payload.clone(),
        });

        intents.push(Intent::RegisterFlush {
            target: target.clone(),
        });
    }

    Ok(intents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, Error, TargetCapabilities, VersionedEntity};

    fn kinds() -> TargetKinds {
        TargetKinds::default().with_kind("transport", TargetCapabilities { represents: true })
    }

    fn intent_names(intents: &[Intent]) -> Vec<String> {
        intents
            .iter()
            .map(|i| match i {
                Intent::CreateRepresentationLog { target_id, .. } => format!("repr:{target_id}"),
                Intent::CreateReplicationLog { target_id, .. } => format!("repl:{target_id}"),
                Intent::RegisterFlush { target } => format!("flush:{}", target.meta.id),
            })
            .collect()
    }

    #[test]
    fn created_entity_on_representing_target() {
        let db = Database::new("db-1", "notes", 1000).into_entity();
        let targets = vec![
            ReplicationTarget::new("t-1", "db-1", "main", "transport", 1000),
            ReplicationTarget::dummy("db-1", 1000),
        ];

        let intents = plan_replication(&db, true, Some("room"), &targets, &kinds()).unwrap();
        assert_eq!(
            intent_names(&intents),
            vec![
                "repr:t-1",
                "repl:t-1",
                "flush:t-1",
                "repl:db-1.dummy",
                "flush:db-1.dummy"
            ]
        );

        match &intents[0] {
            Intent::CreateRepresentationLog {
                method, metadata, ..
            } => {
                assert_eq!(method, "room");
                assert_eq!(metadata["name"], "notes");
            }
            other => panic!("unexpected intent {other:?}"),
        }
    }

    #[test]
    fn updates_are_not_represented() {
        let db = Database::new("db-1", "notes", 1000).into_entity();
        let targets = vec![ReplicationTarget::new("t-1", "db-1", "main", "transport", 1000)];

        let intents = plan_replication(&db, false, Some("room"), &targets, &kinds()).unwrap();
        assert_eq!(intent_names(&intents), vec!["repl:t-1", "flush:t-1"]);
    }

    #[test]
    fn unknown_kind_fails_planning() {
        let db = Database::new("db-1", "notes", 1000).into_entity();
        let targets = vec![ReplicationTarget::new("t-1", "db-1", "main", "carrier-pigeon", 1000)];

        let result = plan_replication(&db, true, None, &targets, &kinds());
        assert_eq!(result, Err(Error::UnknownTargetKind("carrier-pigeon".into())));
    }

    #[test]
    fn payload_is_entity_snapshot() {
        let db = Database::new("db-1", "notes", 1000);
        let targets = vec![ReplicationTarget::dummy("db-1", 1000)];
        let intents =
            plan_replication(&db.clone().into_entity(), true, None, &targets, &kinds()).unwrap();

        match &intents[0] {
            Intent::CreateReplicationLog {
                entity, payload, ..
            } => {
                assert_eq!(entity, &db.entity_ref());
                assert_eq!(payload["name"], "notes");
            }
            other => panic!("unexpected intent {other:?}"),
        }
    }

    #[test]
    fn nested_options_do_not_schedule() {
        let top = SaveOptions::top_level();
        assert!(top.schedules());
        assert!(!top.nested().schedules());
        assert_eq!(top.nested().nested().depth, 2);
    }
}
