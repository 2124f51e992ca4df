//! The live roster: one process-wide session of enrolled identities.
//!
//! Readers take an `Arc<Session>` snapshot and use it for a whole frame; writers
//! build a complete new `Session` and swap the pointer. The lock only guards the
//! swap, so no reader ever observes a half-loaded roster.

use crate::types::{Embedding, EnrolledIdentity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Embedding as it arrives on the wire: a plain array, or an object keyed by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Sequence(Vec<f32>),
    Keyed(BTreeMap<String, f32>),
}

impl EmbeddingInput {
    /// Normalize to an ordered vector. Keyed form orders numeric keys numerically,
    /// any non-numeric keys after them in lexical order.
    pub fn into_values(self) -> Vec<f32> {
        match self {
            Self::Sequence(values) => values,
            Self::Keyed(map) => {
                let mut entries: Vec<(Option<u64>, String, f32)> = map
                    .into_iter()
                    .map(|(k, v)| (k.parse::<u64>().ok(), k, v))
                    .collect();
                entries.sort_by(|a, b| match (a.0, b.0) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => a.1.cmp(&b.1),
                });
                entries.into_iter().map(|(_, _, v)| v).collect()
            }
        }
    }
}

/// One identity as supplied by the caller when loading a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "student_number")]
    pub student_number: Option<String>,
    #[serde(default)]
    pub embedding: Option<EmbeddingInput>,
}

/// A loaded roster.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub active: bool,
    pub section_id: Option<String>,
    pub identities: Vec<EnrolledIdentity>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Embedding dimension of this roster, if it has any identities.
    pub fn dimension(&self) -> Option<usize> {
        self.identities.first().map(|i| i.embedding.dimension())
    }
}

/// Holder of the single live [`Session`].
#[derive(Debug, Default)]
pub struct RosterCache {
    current: RwLock<Arc<Session>>,
}

impl RosterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session. Hold on to it for the duration of one frame.
    pub fn snapshot(&self) -> Arc<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, session: Session) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(session);
    }

    /// Replace the whole roster. Returns how many identities were accepted.
    ///
    /// Records without an embedding, with an empty or non-finite one, or with
    /// a dimension different from the first accepted record are skipped.
    pub fn load_session(
        &self,
        section_id: impl Into<String>,
        records: Vec<IdentityRecord>,
    ) -> usize {
        let section_id = section_id.into();
        let submitted = records.len();
        let mut identities: Vec<EnrolledIdentity> = Vec::with_capacity(submitted);

        for record in records {
            let values = record.embedding.map(EmbeddingInput::into_values).unwrap_or_default();
            if values.is_empty() {
                tracing::warn!(
                    id = %record.id,
                    name = %record.name,
                    "skipping identity without embedding"
                );
                continue;
            }
            if values.iter().any(|v| !v.is_finite()) {
                tracing::warn!(
                    id = %record.id,
                    name = %record.name,
                    "skipping identity with non-finite embedding"
                );
                continue;
            }
            if let Some(expected) = identities.first().map(|i| i.embedding.dimension()) {
                if values.len() != expected {
                    tracing::warn!(
                        id = %record.id,
                        dimension = values.len(),
                        expected,
                        "skipping identity with mismatched embedding dimension"
                    );
                    continue;
                }
            }
            identities.push(EnrolledIdentity {
                id: record.id,
                display_name: record.name,
                external_number: record.student_number,
                embedding: Embedding::new(values),
            });
        }

        let loaded = identities.len();
        self.replace(Session {
            active: true,
            section_id: Some(section_id.clone()),
            identities,
            loaded_at: Some(Utc::now()),
        });

        tracing::info!(
            section_id = %section_id,
            loaded,
            skipped = submitted - loaded,
            "session loaded"
        );
        loaded
    }

    /// Reset to an empty, inactive session. Frames already holding a snapshot
    /// finish against the roster they captured.
    pub fn clear_session(&self) {
        self.replace(Session::default());
        tracing::info!("session cleared");
    }

    pub fn is_active(&self) -> bool {
        self.snapshot().active
    }

    pub fn identity_count(&self) -> usize {
        self.snapshot().identities.len()
    }
}
