use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Change notification as delivered by the backend, record still untyped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub id: String,
    #[serde(default)]
    pub record: Option<Value>,
}

impl RawChange {
    pub fn new(kind: ChangeKind, id: impl Into<String>, record: Option<Value>) -> Self {
        Self {
            kind,
            id: id.into(),
            record,
        }
    }
}

/// Parsed change handed to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<E> {
    pub kind: ChangeKind,
    pub id: String,
    pub record: Option<E>,
    /// Synthesized from the last known record rather than received from
    /// the backend.
    pub replayed: bool,
}

impl<E: DeserializeOwned> ChangeEvent<E> {
    pub fn parse(raw: RawChange) -> Result<Self, serde_json::Error> {
        let record = raw.record.map(serde_json::from_value::<E>).transpose()?;
        Ok(Self {
            kind: raw.kind,
            id: raw.id,
            record,
            replayed: false,
        })
    }
}
