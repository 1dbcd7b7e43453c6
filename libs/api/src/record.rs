use bson::{Bson, DateTime, Document, doc};
use serde::{Deserialize, Serialize};

/// Wire field names of a `PersonRecord`.
pub mod field {
    pub const ID: &str = "_id";
    pub const FIRST_NAME: &str = "firstname";
    pub const LAST_NAME: &str = "lastname";
    pub const CREATED: &str = "created";
    pub const MODIFIED: &str = "modified";
}

/// `lastname` of a freshly inserted record, before any update.
pub const INITIAL_LAST_NAME: &str = "LastName";

/// `firstname` of the record produced at zero-based `index`.
pub fn first_name_for(index: usize) -> String {
    format!("FirstName{}", index + 1)
}

/// `lastname` written by the one-based update `ordinal`.
pub fn last_name_for(ordinal: usize) -> String {
    format!("{INITIAL_LAST_NAME}{ordinal}")
}

// ═══════════════════════════════════════════════════════════════
//  RecordId
// ═══════════════════════════════════════════════════════════════

/// Store-assigned identity of a record. Opaque to the workload: it is
/// only echoed back to the store as the `_id` filter of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Bson);

impl RecordId {
    pub fn as_bson(&self) -> &Bson {
        &self.0
    }

    /// Equality filter targeting this record.
    pub fn filter(&self) -> Document {
        doc! { "_id": self.0.clone() }
    }
}

impl From<Bson> for RecordId {
    fn from(value: Bson) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Bson::ObjectId(oid) => write!(f, "{}", oid.to_hex()),
            Bson::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  PersonRecord
// ═══════════════════════════════════════════════════════════════

/// The synthetic entity the producer writes and the consumer observes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    /// Absent until the store assigns it on insert.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(rename = "firstname")]
    pub first_name: String,
    #[serde(rename = "lastname")]
    pub last_name: String,
    pub created: DateTime,
    pub modified: DateTime,
}

impl PersonRecord {
    /// Record produced at zero-based `index`, stamped with `now`.
    pub fn new(index: usize, now: DateTime) -> Self {
        Self {
            id: None,
            first_name: first_name_for(index),
            last_name: INITIAL_LAST_NAME.to_string(),
            created: now,
            modified: now,
        }
    }

    pub fn to_document(&self) -> Result<Document, bson::ser::Error> {
        bson::to_document(self)
    }

    pub fn from_document(doc: Document) -> Result<Self, bson::de::Error> {
        bson::from_document(doc)
    }
}

// ═══════════════════════════════════════════════════════════════
//  RecordPatch
// ═══════════════════════════════════════════════════════════════

/// Field patch applied by one update cycle: `lastname` and `modified`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    pub last_name: String,
    pub modified: DateTime,
}

impl RecordPatch {
    /// Patch for the one-based update `ordinal`, stamped with `now`.
    pub fn for_update(ordinal: usize, now: DateTime) -> Self {
        Self {
            last_name: last_name_for(ordinal),
            modified: now,
        }
    }

    /// Fields under `$set`.
    pub fn set_fields(&self) -> Document {
        doc! {
            "lastname": self.last_name.clone(),
            "modified": self.modified,
        }
    }

    /// Partial-document update: `{ "$set": { lastname, modified } }`.
    pub fn to_update(&self) -> Document {
        doc! { "$set": self.set_fields() }
    }

    pub fn apply(&self, record: &mut PersonRecord) {
        record.last_name = self.last_name.clone();
        record.modified = self.modified;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    #[test]
    fn names_follow_ordinals() {
        assert_eq!(first_name_for(0), "FirstName1");
        assert_eq!(first_name_for(41), "FirstName42");
        assert_eq!(last_name_for(3), "LastName3");
    }

    #[test]
    fn new_record_has_no_id_on_the_wire() {
        let now = DateTime::from_millis(1_700_000_000_000);
        let doc = PersonRecord::new(0, now).to_document().unwrap();
        assert!(!doc.contains_key(field::ID));
        assert_eq!(doc.get_str(field::FIRST_NAME).unwrap(), "FirstName1");
        assert_eq!(doc.get_str(field::LAST_NAME).unwrap(), INITIAL_LAST_NAME);
        assert_eq!(doc.get_datetime(field::CREATED).unwrap(), &now);
        assert_eq!(doc.get_datetime(field::MODIFIED).unwrap(), &now);
    }

    #[test]
    fn stored_document_reads_back_with_id() {
        let oid = ObjectId::new();
        let now = DateTime::now();
        let doc = doc! {
            "_id": oid,
            "firstname": "FirstName2",
            "lastname": "LastName7",
            "created": now,
            "modified": now,
        };
        let record = PersonRecord::from_document(doc).unwrap();
        assert_eq!(record.id, Some(RecordId(Bson::ObjectId(oid))));
        assert_eq!(record.last_name, "LastName7");
        assert_eq!(record.id.unwrap().to_string(), oid.to_hex());
    }

    #[test]
    fn patch_is_a_set_of_lastname_and_modified() {
        let now = DateTime::from_millis(42);
        let patch = RecordPatch::for_update(2, now);
        assert_eq!(
            patch.to_update(),
            doc! { "$set": { "lastname": "LastName2", "modified": now } }
        );

        let mut record = PersonRecord::new(0, DateTime::from_millis(1));
        patch.apply(&mut record);
        assert_eq!(record.last_name, "LastName2");
        assert_eq!(record.modified, now);
        assert_eq!(record.created, DateTime::from_millis(1));
    }
}
