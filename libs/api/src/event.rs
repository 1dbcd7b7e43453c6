use bson::{Bson, Document, RawDocument, Timestamp};
use serde_json::json;

use crate::error::DecodeError;
use crate::record::{PersonRecord, RecordId};

/// `(db, coll)` a change event belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    pub db: String,
    pub coll: Option<String>,
}

/// Envelope fields shared by every event kind.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventMeta {
    /// Resume token. Kept for logging only, never persisted.
    pub resume_token: Option<Bson>,
    pub namespace: Option<Namespace>,
    pub cluster_time: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertEvent {
    pub meta: EventMeta,
    pub id: RecordId,
    pub full_document: Document,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub meta: EventMeta,
    pub id: RecordId,
    /// Post-image from the lookup. `None` when the document was deleted
    /// before the lookup ran.
    pub full_document: Option<Document>,
    pub updated_fields: Document,
    pub removed_fields: Vec<String>,
}

/// Any other operation (replace, delete, drop, invalidate, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct OtherEvent {
    pub meta: EventMeta,
    pub operation: String,
    pub id: Option<RecordId>,
    /// Present on `replace`, absent on most other kinds.
    pub full_document: Option<Document>,
}

/// Decoded change-feed event.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(InsertEvent),
    Update(UpdateEvent),
    Other(OtherEvent),
}

impl ChangeEvent {
    /// Decode a raw change event, dispatching on `operationType`.
    ///
    /// Only the fields guaranteed for the kind are required; everything
    /// else in the envelope is ignored.
    pub fn decode(raw: &RawDocument) -> Result<Self, DecodeError> {
        let doc = Document::try_from(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let operation = match doc.get("operationType") {
            Some(Bson::String(op)) => op.clone(),
            Some(other) => {
                return Err(DecodeError::InvalidField {
                    field: "operationType",
                    detail: format!("expected string, got {:?}", other.element_type()),
                });
            }
            None => {
                return Err(DecodeError::MissingField {
                    operation: "unknown".into(),
                    field: "operationType",
                });
            }
        };

        let meta = decode_meta(&doc)?;
        let id = document_key(&doc)?;

        match operation.as_str() {
            "insert" => {
                let id = id.ok_or_else(|| missing(&operation, "documentKey._id"))?;
                let full_document = full_document(&doc)?.ok_or_else(|| missing(&operation, "fullDocument"))?;
                Ok(ChangeEvent::Insert(InsertEvent { meta, id, full_document }))
            }
            "update" => {
                let id = id.ok_or_else(|| missing(&operation, "documentKey._id"))?;
                let full_document = full_document(&doc)?;
                let (updated_fields, removed_fields) = update_description(&doc)?;
                Ok(ChangeEvent::Update(UpdateEvent {
                    meta,
                    id,
                    full_document,
                    updated_fields,
                    removed_fields,
                }))
            }
            _ => {
                let full_document = full_document(&doc)?;
                Ok(ChangeEvent::Other(OtherEvent { meta, operation, id, full_document }))
            }
        }
    }

    pub fn operation(&self) -> &str {
        match self {
            ChangeEvent::Insert(_) => "insert",
            ChangeEvent::Update(_) => "update",
            ChangeEvent::Other(e) => &e.operation,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            ChangeEvent::Insert(e) => &e.meta,
            ChangeEvent::Update(e) => &e.meta,
            ChangeEvent::Other(e) => &e.meta,
        }
    }

    pub fn id(&self) -> Option<&RecordId> {
        match self {
            ChangeEvent::Insert(e) => Some(&e.id),
            ChangeEvent::Update(e) => Some(&e.id),
            ChangeEvent::Other(e) => e.id.as_ref(),
        }
    }

    pub fn full_document(&self) -> Option<&Document> {
        match self {
            ChangeEvent::Insert(e) => Some(&e.full_document),
            ChangeEvent::Update(e) => e.full_document.as_ref(),
            ChangeEvent::Other(e) => e.full_document.as_ref(),
        }
    }

    /// Full document viewed as a `PersonRecord`, if the event carries one.
    pub fn person(&self) -> Option<Result<PersonRecord, bson::de::Error>> {
        self.full_document().map(|doc| PersonRecord::from_document(doc.clone()))
    }

    /// Relaxed extended JSON rendering, used as the structured log payload.
    pub fn to_json(&self) -> serde_json::Value {
        let meta = self.meta();
        let mut out = serde_json::Map::new();
        if let Some(token) = &meta.resume_token {
            out.insert("_id".into(), token.clone().into_relaxed_extjson());
        }
        out.insert("operationType".into(), json!(self.operation()));
        if let Some(ns) = &meta.namespace {
            out.insert("ns".into(), json!({ "db": ns.db, "coll": ns.coll }));
        }
        if let Some(ts) = meta.cluster_time {
            out.insert("clusterTime".into(), json!({ "t": ts.time, "i": ts.increment }));
        }
        if let Some(id) = self.id() {
            out.insert("documentKey".into(), json!({ "_id": id.as_bson().clone().into_relaxed_extjson() }));
        }
        match self {
            ChangeEvent::Insert(e) => {
                out.insert("fullDocument".into(), extjson(&e.full_document));
            }
            ChangeEvent::Update(e) => {
                let full = e.full_document.as_ref().map(extjson).unwrap_or(serde_json::Value::Null);
                out.insert("fullDocument".into(), full);
                out.insert(
                    "updateDescription".into(),
                    json!({
                        "updatedFields": extjson(&e.updated_fields),
                        "removedFields": e.removed_fields,
                    }),
                );
            }
            ChangeEvent::Other(e) => {
                if let Some(full) = &e.full_document {
                    out.insert("fullDocument".into(), extjson(full));
                }
            }
        }
        serde_json::Value::Object(out)
    }
}

fn extjson(doc: &Document) -> serde_json::Value {
    Bson::Document(doc.clone()).into_relaxed_extjson()
}

fn missing(operation: &str, field: &'static str) -> DecodeError {
    DecodeError::MissingField { operation: operation.to_string(), field }
}

fn invalid(field: &'static str, expected: &str, got: &Bson) -> DecodeError {
    DecodeError::InvalidField {
        field,
        detail: format!("expected {expected}, got {:?}", got.element_type()),
    }
}

fn decode_meta(doc: &Document) -> Result<EventMeta, DecodeError> {
    let namespace = match doc.get("ns") {
        None | Some(Bson::Null) => None,
        Some(Bson::Document(ns)) => match ns.get("db") {
            Some(Bson::String(db)) => Some(Namespace {
                db: db.clone(),
                coll: ns.get_str("coll").ok().map(str::to_string),
            }),
            Some(other) => return Err(invalid("ns.db", "string", other)),
            None => None,
        },
        Some(other) => return Err(invalid("ns", "document", other)),
    };

    let cluster_time = match doc.get("clusterTime") {
        Some(Bson::Timestamp(ts)) => Some(*ts),
        _ => None,
    };

    Ok(EventMeta {
        resume_token: doc.get("_id").cloned(),
        namespace,
        cluster_time,
    })
}

fn document_key(doc: &Document) -> Result<Option<RecordId>, DecodeError> {
    match doc.get("documentKey") {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Document(key)) => Ok(key.get("_id").cloned().map(RecordId)),
        Some(other) => Err(invalid("documentKey", "document", other)),
    }
}

fn full_document(doc: &Document) -> Result<Option<Document>, DecodeError> {
    match doc.get("fullDocument") {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Document(full)) => Ok(Some(full.clone())),
        Some(other) => Err(invalid("fullDocument", "document", other)),
    }
}

fn update_description(doc: &Document) -> Result<(Document, Vec<String>), DecodeError> {
    let desc = match doc.get("updateDescription") {
        None | Some(Bson::Null) => return Ok((Document::new(), Vec::new())),
        Some(Bson::Document(desc)) => desc,
        Some(other) => return Err(invalid("updateDescription", "document", other)),
    };

    let updated = match desc.get("updatedFields") {
        None => Document::new(),
        Some(Bson::Document(fields)) => fields.clone(),
        Some(other) => return Err(invalid("updateDescription.updatedFields", "document", other)),
    };

    let removed = match desc.get("removedFields") {
        None => Vec::new(),
        Some(Bson::Array(items)) => items
            .iter()
            .map(|item| match item {
                Bson::String(name) => Ok(name.clone()),
                other => Err(invalid("updateDescription.removedFields", "string", other)),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(invalid("updateDescription.removedFields", "array", other)),
    };

    Ok((updated, removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use bson::{DateTime, RawDocumentBuf, doc};

    fn raw(doc: Document) -> RawDocumentBuf {
        RawDocumentBuf::from_document(&doc).unwrap()
    }

    fn person(oid: ObjectId, last: &str) -> Document {
        doc! {
            "_id": oid,
            "firstname": "FirstName1",
            "lastname": last,
            "created": DateTime::from_millis(1),
            "modified": DateTime::from_millis(2),
        }
    }

    #[test]
    fn decodes_insert_with_full_document() {
        let oid = ObjectId::new();
        let event = ChangeEvent::decode(&raw(doc! {
            "_id": { "_data": "8264" },
            "operationType": "insert",
            "clusterTime": Timestamp { time: 10, increment: 1 },
            "ns": { "db": "myNewDB", "coll": "people" },
            "documentKey": { "_id": oid },
            "fullDocument": person(oid, "LastName"),
        }))
        .unwrap();

        let ChangeEvent::Insert(insert) = &event else {
            panic!("expected insert, got {event:?}");
        };
        assert_eq!(insert.id, RecordId(Bson::ObjectId(oid)));
        assert_eq!(insert.meta.namespace.as_ref().unwrap().db, "myNewDB");
        assert_eq!(insert.meta.cluster_time, Some(Timestamp { time: 10, increment: 1 }));
        assert_eq!(insert.meta.resume_token, Some(Bson::Document(doc! { "_data": "8264" })));
        assert_eq!(event.person().unwrap().unwrap().last_name, "LastName");
    }

    #[test]
    fn decodes_update_with_description() {
        let oid = ObjectId::new();
        let event = ChangeEvent::decode(&raw(doc! {
            "operationType": "update",
            "documentKey": { "_id": oid },
            "updateDescription": {
                "updatedFields": { "lastname": "LastName3" },
                "removedFields": ["nickname"],
            },
            "fullDocument": person(oid, "LastName3"),
        }))
        .unwrap();

        let ChangeEvent::Update(update) = &event else {
            panic!("expected update, got {event:?}");
        };
        assert_eq!(update.updated_fields.get_str("lastname").unwrap(), "LastName3");
        assert_eq!(update.removed_fields, vec!["nickname".to_string()]);
        assert_eq!(event.person().unwrap().unwrap().last_name, "LastName3");
    }

    #[test]
    fn update_lookup_may_race_a_delete() {
        let event = ChangeEvent::decode(&raw(doc! {
            "operationType": "update",
            "documentKey": { "_id": 7 },
            "fullDocument": Bson::Null,
        }))
        .unwrap();
        assert_eq!(event.operation(), "update");
        assert!(event.full_document().is_none());
        assert!(event.person().is_none());
    }

    #[test]
    fn unknown_kinds_become_other() {
        let event = ChangeEvent::decode(&raw(doc! {
            "operationType": "delete",
            "documentKey": { "_id": 7 },
        }))
        .unwrap();
        assert_eq!(
            event,
            ChangeEvent::Other(OtherEvent {
                meta: EventMeta { resume_token: None, namespace: None, cluster_time: None },
                operation: "delete".into(),
                id: Some(RecordId(Bson::Int32(7))),
                full_document: None,
            })
        );

        let invalidate = ChangeEvent::decode(&raw(doc! { "operationType": "invalidate" })).unwrap();
        assert_eq!(invalidate.operation(), "invalidate");
        assert!(invalidate.id().is_none());
    }

    #[test]
    fn rejects_missing_operation_type() {
        let err = ChangeEvent::decode(&raw(doc! { "documentKey": { "_id": 1 } })).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField { field: "operationType", .. }));
    }

    #[test]
    fn rejects_non_string_operation_type() {
        let err = ChangeEvent::decode(&raw(doc! { "operationType": 7 })).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "operationType", .. }));
    }

    #[test]
    fn insert_requires_full_document_and_key() {
        let err = ChangeEvent::decode(&raw(doc! {
            "operationType": "insert",
            "documentKey": { "_id": 1 },
        }))
        .unwrap_err();
        assert_eq!(err, missing("insert", "fullDocument"));

        let err = ChangeEvent::decode(&raw(doc! {
            "operationType": "insert",
            "fullDocument": { "a": 1 },
        }))
        .unwrap_err();
        assert_eq!(err, missing("insert", "documentKey._id"));
    }

    #[test]
    fn rejects_ill_typed_envelope_fields() {
        let err = ChangeEvent::decode(&raw(doc! {
            "operationType": "update",
            "documentKey": { "_id": 1 },
            "updateDescription": { "removedFields": [1, 2] },
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidField { field: "updateDescription.removedFields", .. }
        ));

        let err = ChangeEvent::decode(&raw(doc! {
            "operationType": "insert",
            "documentKey": "oops",
        }))
        .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "documentKey", .. }));
    }

    #[test]
    fn rejects_malformed_bytes() {
        // Length header is consistent, the string element inside is not.
        let bytes = vec![0x0c, 0, 0, 0, 0x02, b'a', 0, 0xff, 0xff, 0xff, 0x7f, 0];
        let raw = RawDocumentBuf::from_bytes(bytes).unwrap();
        let err = ChangeEvent::decode(&raw).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn json_rendering_keeps_the_post_image() {
        let oid = ObjectId::new();
        let event = ChangeEvent::decode(&raw(doc! {
            "operationType": "update",
            "ns": { "db": "myNewDB", "coll": "people" },
            "documentKey": { "_id": oid },
            "updateDescription": { "updatedFields": { "lastname": "LastName1" } },
            "fullDocument": person(oid, "LastName1"),
        }))
        .unwrap();

        let json = event.to_json();
        assert_eq!(json["operationType"], "update");
        assert_eq!(json["ns"]["coll"], "people");
        assert_eq!(json["documentKey"]["_id"]["$oid"], oid.to_hex());
        assert_eq!(json["fullDocument"]["lastname"], "LastName1");
        assert_eq!(json["updateDescription"]["updatedFields"]["lastname"], "LastName1");
    }

    #[test]
    fn json_rendering_keeps_resume_token_and_replacement() {
        let oid = ObjectId::new();
        let event = ChangeEvent::decode(&raw(doc! {
            "_id": { "_data": "8264" },
            "operationType": "replace",
            "documentKey": { "_id": oid },
            "fullDocument": person(oid, "LastName9"),
        }))
        .unwrap();

        assert_eq!(event.operation(), "replace");
        assert_eq!(event.person().unwrap().unwrap().last_name, "LastName9");

        let json = event.to_json();
        assert_eq!(json["_id"]["_data"], "8264");
        assert_eq!(json["fullDocument"]["lastname"], "LastName9");
        assert_eq!(json["documentKey"]["_id"]["$oid"], oid.to_hex());
    }

    #[test]
    fn json_rendering_omits_absent_token() {
        let event = ChangeEvent::decode(&raw(doc! {
            "operationType": "delete",
            "documentKey": { "_id": 7 },
        }))
        .unwrap();
        let json = event.to_json();
        assert!(json.get("_id").is_none());
        assert!(json.get("fullDocument").is_none());
    }
}
