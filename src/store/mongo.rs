//! `StoreHandle` backed by a MongoDB replica set.
//!
//! Durability maps to write concern, routing to read preference and
//! consistency to read concern. Every call is one driver operation with the
//! driver's own retry logic left at its defaults.

use super::{CausalSession, StoreHandle};
use crate::error::{AdminError, StoreError};
use crate::types::{
    ClusterStatus, Durability, MemberRole, MemberStatus, ProbeRecord, ReadConsistency,
    ReadRouting, WriteDurability,
};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    Acknowledgment, CollectionOptions, ReadConcern, ReadPreference, ReadPreferenceOptions,
    SelectionCriteria, SessionOptions, WriteConcern,
};
use mongodb::{Client, ClientSession, Collection, Database};
use std::time::Duration;
use tracing::{debug, info};

/// Server error codes meaning the addressed member is not (or no longer)
/// primary.
const NOT_PRIMARY_CODES: [i32; 6] = [10107, 13435, 11602, 189, 91, 11600];

const WRITE_CONCERN_TIMEOUT_CODE: i32 = 64;
const UNAUTHORIZED_CODE: i32 = 13;

/// A replica set reached through the official driver.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
    /// Member count used for `w:all`.
    members: u32,
}

impl MongoStore {
    /// Connect and discover the replica set size.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await.map_err(|e| map_error(e, None))?;
        let mut store = Self {
            database: client.database(database),
            client,
            members: 1,
        };

        match store.cluster_status().await {
            Ok(status) if !status.members.is_empty() => {
                store.members = status.members.len() as u32;
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "replica set size unknown, w:all degrades to w:1"),
        }
        info!(database, members = store.members, "connected to mongodb");
        Ok(store)
    }

    fn write_concern(&self, durability: WriteDurability) -> WriteConcern {
        let w = match durability.level {
            Durability::Unacknowledged => Acknowledgment::Nodes(0),
            Durability::Acknowledged => Acknowledgment::Nodes(1),
            Durability::Majority => Acknowledgment::Majority,
            Durability::All => Acknowledgment::Nodes(self.members),
        };
        WriteConcern::builder()
            .w(w)
            .w_timeout(durability.timeout)
            .build()
    }

    fn writer(&self, namespace: &str, durability: WriteDurability) -> Collection<Document> {
        self.database.collection_with_options(
            namespace,
            CollectionOptions::builder()
                .write_concern(self.write_concern(durability))
                .build(),
        )
    }

    fn reader(
        &self,
        namespace: &str,
        routing: ReadRouting,
        consistency: ReadConsistency,
    ) -> Collection<Document> {
        self.database.collection_with_options(
            namespace,
            CollectionOptions::builder()
                .selection_criteria(selection(routing))
                .read_concern(read_concern(consistency))
                .build(),
        )
    }

    async fn admin_command(&self, command: Document) -> Result<Document, mongodb::error::Error> {
        self.client.database("admin").run_command(command, None).await
    }
}

fn selection(routing: ReadRouting) -> SelectionCriteria {
    let pref = match routing {
        ReadRouting::Primary => ReadPreference::Primary,
        ReadRouting::PrimaryPreferred => ReadPreference::PrimaryPreferred {
            options: ReadPreferenceOptions::default(),
        },
        ReadRouting::Secondary => ReadPreference::Secondary {
            options: ReadPreferenceOptions::default(),
        },
    };
    SelectionCriteria::ReadPreference(pref)
}

fn read_concern(consistency: ReadConsistency) -> ReadConcern {
    match consistency {
        ReadConsistency::Default => ReadConcern::local(),
        ReadConsistency::Majority => ReadConcern::majority(),
    }
}

fn to_document(record: &ProbeRecord) -> Document {
    let mut doc = doc! {
        "_id": record.id.as_str(),
        "owner": record.owner.as_str(),
        "seq": record.sequence as i64,
        "created_at_ms": record.created_at_ms,
    };
    if let Some(dep) = &record.depends_on {
        doc.insert("depends_on", dep.as_str());
    }
    doc
}

fn from_document(doc: &Document) -> Result<ProbeRecord, StoreError> {
    let id = doc
        .get_str("_id")
        .map_err(|e| StoreError::Internal(format!("malformed record: {}", e)))?;
    let int = |field: &str| {
        doc.get(field)
            .and_then(|v| v.as_i64().or_else(|| v.as_i32().map(i64::from)))
            .unwrap_or_default()
    };
    Ok(ProbeRecord {
        id: id.to_string(),
        owner: doc.get_str("owner").unwrap_or_default().to_string(),
        sequence: int("seq").max(0) as u64,
        created_at_ms: int("created_at_ms"),
        depends_on: doc.get_str("depends_on").ok().map(str::to_string),
    })
}

fn map_error(err: mongodb::error::Error, wtimeout: Option<Duration>) -> StoreError {
    let wc_timeout = || StoreError::WriteConcernTimeout {
        elapsed: wtimeout.unwrap_or_default(),
    };
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteConcernError(wc))
            if wc.code == WRITE_CONCERN_TIMEOUT_CODE =>
        {
            wc_timeout()
        }
        ErrorKind::BulkWrite(failure)
            if failure
                .write_concern_error
                .as_ref()
                .is_some_and(|wc| wc.code == WRITE_CONCERN_TIMEOUT_CODE) =>
        {
            wc_timeout()
        }
        ErrorKind::Write(WriteFailure::WriteConcernError(wc))
            if NOT_PRIMARY_CODES.contains(&wc.code) =>
        {
            StoreError::NotPrimary
        }
        ErrorKind::Command(cmd) if NOT_PRIMARY_CODES.contains(&cmd.code) => StoreError::NotPrimary,
        ErrorKind::ServerSelection { .. } => StoreError::Timeout,
        ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } => {
            StoreError::Network(err.to_string())
        }
        _ => StoreError::Internal(err.to_string()),
    }
}

fn map_admin_error(err: mongodb::error::Error) -> AdminError {
    match err.kind.as_ref() {
        ErrorKind::Command(cmd) if cmd.code == UNAUTHORIZED_CODE => {
            AdminError::PermissionDenied(cmd.message.clone())
        }
        ErrorKind::Command(cmd) => AdminError::StepDownRejected(cmd.message.clone()),
        _ => AdminError::Unavailable(err.to_string()),
    }
}

#[async_trait]
impl StoreHandle for MongoStore {
    async fn prepare_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        let _ = self
            .database
            .collection::<Document>(namespace)
            .drop(None)
            .await;
        self.database
            .create_collection(namespace, None)
            .await
            .map_err(|e| map_error(e, None))
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.database
            .collection::<Document>(namespace)
            .drop(None)
            .await
            .map_err(|e| map_error(e, None))
    }

    async fn clear_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.database
            .collection::<Document>(namespace)
            .delete_many(doc! {}, None)
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, None))
    }

    async fn write(
        &self,
        namespace: &str,
        record: &ProbeRecord,
        durability: WriteDurability,
    ) -> Result<(), StoreError> {
        self.writer(namespace, durability)
            .insert_one(to_document(record), None)
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, durability.timeout))
    }

    async fn write_batch(
        &self,
        namespace: &str,
        records: &[ProbeRecord],
        durability: WriteDurability,
    ) -> Result<(), StoreError> {
        self.writer(namespace, durability)
            .insert_many(records.iter().map(to_document), None)
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, durability.timeout))
    }

    async fn read(
        &self,
        namespace: &str,
        key: &str,
        routing: ReadRouting,
        consistency: ReadConsistency,
    ) -> Result<Option<ProbeRecord>, StoreError> {
        let found = self
            .reader(namespace, routing, consistency)
            .find_one(doc! { "_id": key }, None)
            .await
            .map_err(|e| map_error(e, None))?;
        found.as_ref().map(from_document).transpose()
    }

    async fn causal_session(
        &self,
        namespace: &str,
    ) -> Result<Box<dyn CausalSession>, StoreError> {
        let session = self
            .client
            .start_session(Some(
                SessionOptions::builder().causal_consistency(true).build(),
            ))
            .await
            .map_err(|e| map_error(e, None))?;
        Ok(Box::new(MongoSession {
            store: self.clone(),
            namespace: namespace.to_string(),
            session,
        }))
    }

    async fn cluster_status(&self) -> Result<ClusterStatus, AdminError> {
        let reply = self
            .admin_command(doc! { "replSetGetStatus": 1 })
            .await
            .map_err(map_admin_error)?;

        let members = reply
            .get_array("members")
            .map(|members| {
                members
                    .iter()
                    .filter_map(Bson::as_document)
                    .map(|m| MemberStatus {
                        name: m.get_str("name").unwrap_or("?").to_string(),
                        role: MemberRole::from_state(
                            m.get("state")
                                .and_then(|s| s.as_i32().map(i64::from).or_else(|| s.as_i64()))
                                .unwrap_or(-1),
                        ),
                        healthy: m
                            .get("health")
                            .and_then(|h| h.as_f64().or_else(|| h.as_i32().map(f64::from)))
                            .is_some_and(|h| h >= 1.0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ClusterStatus {
            set_name: reply.get_str("set").ok().map(str::to_string),
            members,
        })
    }

    async fn step_down(&self, grace: Duration) -> Result<(), AdminError> {
        self.admin_command(doc! {
            "replSetStepDown": grace.as_secs() as i64,
            "force": true,
        })
        .await
        .map(|_| ())
        .map_err(map_admin_error)
    }
}

/// A driver session opened with causal consistency.
struct MongoSession {
    store: MongoStore,
    namespace: String,
    session: ClientSession,
}

#[async_trait]
impl CausalSession for MongoSession {
    async fn write(
        &mut self,
        record: &ProbeRecord,
        durability: WriteDurability,
    ) -> Result<(), StoreError> {
        self.store
            .writer(&self.namespace, durability)
            .insert_one_with_session(to_document(record), None, &mut self.session)
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, durability.timeout))
    }
}
