use rusqlite::{named_params, OptionalExtension, Row};

use super::{aggregate_to_i64, Repo, StoredEntity};
use crate::core::blob_store::{Payload, PayloadWrite};
use crate::core::error::{Context, Result, StorageError};
use crate::core::identity::{reconcile, resolve_pair, IdentityTable, WriteIntent};
use crate::core::model::{Resource, ResourceAttributes, ResourceData};
use crate::core::statements::CachedStatement;
use crate::core::text::recognition_text;
use crate::core::validation::check_resource;

/// Size column value of a payload body.
fn payload_size(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        StorageError::validation(format!("resource payload of {len} bytes is too large"))
    })
}

fn body_size(data: &ResourceData) -> Result<Option<i32>> {
    match (data.size, &data.body) {
        (Some(size), _) => Ok(Some(size)),
        (None, Some(body)) => payload_size(body.len()).map(Some),
        (None, None) => Ok(None),
    }
}

fn payload_metadata(size: Option<i32>, hash: Option<Vec<u8>>) -> Option<ResourceData> {
    (size.is_some() || hash.is_some()).then_some(ResourceData {
        body: None,
        size,
        hash,
    })
}

impl StoredEntity for Resource {
    const IDENTITY: IdentityTable = IdentityTable::RESOURCE;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let recognition_body: Option<String> = row.get("recognitionDataBody")?;
        let recognition_size: Option<i32> = row.get("recognitionDataSize")?;
        let recognition_hash: Option<Vec<u8>> = row.get("recognitionDataHash")?;
        let recognition = (recognition_body.is_some()
            || recognition_size.is_some()
            || recognition_hash.is_some())
        .then(|| ResourceData {
            body: recognition_body.map(String::into_bytes),
            size: recognition_size,
            hash: recognition_hash,
        });

        Ok(Resource {
            local_id: row.get("localUid")?,
            guid: row.get("guid")?,
            note_local_id: row.get("noteLocalUid")?,
            note_guid: row.get("noteGuid")?,
            update_sequence_number: row.get("updateSequenceNumber")?,
            data: payload_metadata(row.get("dataSize")?, row.get("dataHash")?),
            alternate_data: payload_metadata(
                row.get("alternateDataSize")?,
                row.get("alternateDataHash")?,
            ),
            recognition,
            mime: row.get("mime")?,
            width: row.get("width")?,
            height: row.get("height")?,
            attributes: None,
            index_in_note: row.get("indexInNote")?,
            is_dirty: row.get("isDirty")?,
            is_local: row.get("isLocal")?,
            is_favorited: row.get("isFavorited")?,
        })
    }
}

fn map_attributes_row(row: &Row<'_>) -> rusqlite::Result<ResourceAttributes> {
    Ok(ResourceAttributes {
        source_url: row.get("sourceURL")?,
        timestamp: row.get("timestamp")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        altitude: row.get("altitude")?,
        camera_make: row.get("cameraMake")?,
        camera_model: row.get("cameraModel")?,
        client_will_index: row.get("clientWillIndex")?,
        file_name: row.get("fileName")?,
        attachment: row.get("isAttachment")?,
        application_data: None,
    })
}

impl Repo<'_> {
    /// Writes a resource row with its attributes and recognition text.
    ///
    /// Payload bytes are staged for the blob store only when `write_binary`
    /// is set; a payload without a body leaves its file untouched. Moving a
    /// resource to another note also moves its payload files.
    pub fn put_resource(
        &self,
        resource: &Resource,
        intent: WriteIntent,
        write_binary: bool,
    ) -> Result<Resource> {
        check_resource(resource)?;
        let (note_local_id, note_guid) = resolve_pair(
            self.conn,
            IdentityTable::NOTE,
            Some(resource.note_local_id.as_str()),
            resource.note_guid.as_deref(),
        )?;
        let local_id = reconcile(
            self.conn,
            IdentityTable::RESOURCE,
            intent,
            &resource.local_id,
            resource.guid.as_deref(),
        )?;
        let previous_note: Option<String> = match intent {
            WriteIntent::Add => None,
            WriteIntent::Update => self
                .conn
                .query_row(
                    "SELECT noteLocalUid FROM Resources WHERE localUid = ?1",
                    [&local_id],
                    |row| row.get(0),
                )
                .optional()
                .context("can't look up resource note")?,
        };

        let data = resource.data.clone().unwrap_or_default();
        let alternate = resource.alternate_data.clone().unwrap_or_default();
        let data_size = body_size(&data)?;
        let alternate_size = body_size(&alternate)?;
        let recognition = resource.recognition.clone().unwrap_or_default();
        let recognition_body = recognition
            .body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned());

        let statement = match intent {
            WriteIntent::Add => CachedStatement::InsertResource,
            WriteIntent::Update => CachedStatement::UpdateResource,
        };
        self.stmts
            .prepare(self.conn, statement)?
            .execute(named_params! {
                ":localUid": local_id,
                ":guid": resource.guid,
                ":noteLocalUid": note_local_id,
                ":noteGuid": note_guid,
                ":updateSequenceNumber": resource.update_sequence_number,
                ":isDirty": resource.is_dirty,
                ":isLocal": resource.is_local,
                ":isFavorited": resource.is_favorited,
                ":dataSize": data_size,
                ":dataHash": data.hash,
                ":mime": resource.mime,
                ":width": resource.width,
                ":height": resource.height,
                ":recognitionDataBody": recognition_body,
                ":recognitionDataSize": recognition.size,
                ":recognitionDataHash": recognition.hash,
                ":alternateDataSize": alternate_size,
                ":alternateDataHash": alternate.hash,
                ":indexInNote": resource.index_in_note,
            })
            .context("can't write resource")?;

        self.put_resource_side_records(&local_id, &note_local_id, resource)?;

        if let Some(previous) = previous_note.filter(|n| *n != note_local_id) {
            self.staged.relocate(&previous, &note_local_id, &local_id);
        }
        if write_binary {
            self.staged.write(
                &note_local_id,
                &local_id,
                PayloadWrite {
                    data: resource.data_body(),
                    alternate_data: resource.alternate_data_body(),
                },
            );
        }

        Ok(Resource {
            local_id,
            note_local_id,
            note_guid,
            ..resource.clone()
        })
    }

    fn put_resource_side_records(
        &self,
        local_id: &str,
        note_local_id: &str,
        resource: &Resource,
    ) -> Result<()> {
        for table in [
            "ResourceAttributes",
            "ResourceAttributesApplicationDataKeysOnly",
            "ResourceAttributesApplicationDataFullMap",
            "ResourceRecognitionData",
        ] {
            self.conn
                .execute(
                    &format!("DELETE FROM {table} WHERE resourceLocalUid = ?1"),
                    [local_id],
                )
                .context("can't clear resource side records")?;
        }

        if let Some(a) = &resource.attributes {
            self.stmts
                .prepare(self.conn, CachedStatement::ReplaceResourceAttributes)?
                .execute(named_params! {
                    ":resourceLocalUid": local_id,
                    ":sourceURL": a.source_url,
                    ":timestamp": a.timestamp,
                    ":latitude": a.latitude,
                    ":longitude": a.longitude,
                    ":altitude": a.altitude,
                    ":cameraMake": a.camera_make,
                    ":cameraModel": a.camera_model,
                    ":clientWillIndex": a.client_will_index,
                    ":fileName": a.file_name,
                    ":isAttachment": a.attachment,
                })
                .context("can't write resource attributes")?;

            if let Some(app_data) = &a.application_data {
                let mut keys = self
                    .stmts
                    .prepare(self.conn, CachedStatement::InsertResourceApplicationDataKey)?;
                for key in app_data.keys_only.iter().flatten() {
                    keys.execute(named_params! { ":resourceLocalUid": local_id, ":key": key })
                        .context("can't write resource application data")?;
                }
                let mut entries = self
                    .stmts
                    .prepare(self.conn, CachedStatement::InsertResourceApplicationDataEntry)?;
                for (key, value) in app_data.full_map.iter().flatten() {
                    entries
                        .execute(named_params! {
                            ":resourceLocalUid": local_id,
                            ":key": key,
                            ":value": value,
                        })
                        .context("can't write resource application data")?;
                }
            }
        }

        let text = resource
            .recognition
            .as_ref()
            .and_then(|r| r.body.as_deref())
            .and_then(recognition_text);
        if let Some(text) = text {
            self.stmts
                .prepare(self.conn, CachedStatement::ReplaceResourceRecognitionData)?
                .execute(named_params! {
                    ":resourceLocalUid": local_id,
                    ":noteLocalUid": note_local_id,
                    ":recognitionData": text,
                })
                .context("can't write resource recognition data")?;
        }
        Ok(())
    }

    fn hydrate_resource(&self, mut resource: Resource, with_binary_data: bool) -> Result<Resource> {
        let id = resource.local_id.clone();
        let mut attributes = self
            .conn
            .query_row(
                "SELECT * FROM ResourceAttributes WHERE resourceLocalUid = ?1",
                [&id],
                map_attributes_row,
            )
            .optional()
            .context("can't read resource attributes")?;

        if let Some(app_data) = self.read_lazy_map(
            "ResourceAttributesApplicationDataKeysOnly",
            "ResourceAttributesApplicationDataFullMap",
            "resourceLocalUid",
            &id,
        )? {
            attributes.get_or_insert_with(ResourceAttributes::default).application_data =
                Some(app_data);
        }
        resource.attributes = attributes;

        if with_binary_data {
            let note = resource.note_local_id.clone();
            if let Some(body) = self.blobs.read(Payload::Data, &note, &id)? {
                resource.data.get_or_insert_with(ResourceData::default).body = Some(body);
            }
            if let Some(body) = self.blobs.read(Payload::AlternateData, &note, &id)? {
                resource
                    .alternate_data
                    .get_or_insert_with(ResourceData::default)
                    .body = Some(body);
            }
        }
        Ok(resource)
    }

    pub fn find_resource(&self, local_id: &str, with_binary_data: bool) -> Result<Option<Resource>> {
        self.find_by_local_id::<Resource>(local_id)?
            .map(|r| self.hydrate_resource(r, with_binary_data))
            .transpose()
    }

    /// Resources of one note in their in-note order.
    pub fn list_resources_per_note(
        &self,
        note_local_id: &str,
        with_binary_data: bool,
    ) -> Result<Vec<Resource>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT * FROM Resources WHERE noteLocalUid = ?1 ORDER BY indexInNote, rowid",
            )
            .context("can't list note resources")?;
        let rows = stmt
            .query_map([note_local_id], Resource::from_row)
            .context("can't list note resources")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("can't list note resources")?;
        rows.into_iter()
            .map(|r| self.hydrate_resource(r, with_binary_data))
            .collect()
    }

    pub fn resource_count_per_note(&self, note_local_id: &str) -> Result<i64> {
        let value = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM Resources WHERE noteLocalUid = ?1",
                [note_local_id],
                |row| row.get(0),
            )
            .context("can't count note resources")?;
        aggregate_to_i64(value, "can't count note resources")
    }

    /// Deletes the resource row and returns the local id of its note; the
    /// payload files are left to the caller once the transaction commits.
    pub fn expunge_resource(&self, local_id: &str) -> Result<String> {
        let note: Option<String> = self
            .conn
            .query_row(
                "SELECT noteLocalUid FROM Resources WHERE localUid = ?1",
                [local_id],
                |row| row.get(0),
            )
            .optional()
            .context("can't find resource")?;
        let Some(note) = note else {
            return Err(StorageError::not_found("Resource", local_id));
        };
        self.conn
            .execute("DELETE FROM Resources WHERE localUid = ?1", [local_id])
            .context("can't expunge resource")?;
        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_size_fits_column() {
        assert_eq!(payload_size(0).unwrap(), 0);
        assert_eq!(payload_size(i32::MAX as usize).unwrap(), i32::MAX);
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let err = payload_size(i32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn test_declared_size_wins_over_body_length() {
        let data = ResourceData {
            body: Some(b"abc".to_vec()),
            size: Some(10),
            hash: None,
        };
        assert_eq!(body_size(&data).unwrap(), Some(10));
        assert_eq!(body_size(&ResourceData::from_body(b"abc".to_vec())).unwrap(), Some(3));
        assert_eq!(body_size(&ResourceData::default()).unwrap(), None);
    }
}
