use serde::{Deserialize, Serialize};

use super::LazyMap;

/// A binary attachment belonging to exactly one note.
///
/// Metadata lives in the relational row; the bytes of `data` and
/// `alternate_data` live in the resource blob store and are only loaded when
/// binary data is explicitly requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub local_id: String,
    pub guid: Option<String>,
    pub note_local_id: String,
    pub note_guid: Option<String>,
    pub update_sequence_number: Option<i32>,
    pub data: Option<ResourceData>,
    pub alternate_data: Option<ResourceData>,
    pub recognition: Option<ResourceData>,
    pub mime: Option<String>,
    pub width: Option<i16>,
    pub height: Option<i16>,
    pub attributes: Option<ResourceAttributes>,
    pub index_in_note: Option<i32>,
    pub is_dirty: bool,
    pub is_local: bool,
    pub is_favorited: bool,
}

impl Resource {
    pub fn new(note_local_id: impl Into<String>) -> Self {
        Self {
            local_id: crate::core::identity::new_local_id(),
            note_local_id: note_local_id.into(),
            is_dirty: true,
            ..Default::default()
        }
    }

    pub(crate) fn data_body(&self) -> Option<&[u8]> {
        self.data.as_ref().and_then(|d| d.body.as_deref())
    }

    pub(crate) fn alternate_data_body(&self) -> Option<&[u8]> {
        self.alternate_data.as_ref().and_then(|d| d.body.as_deref())
    }
}

/// One payload of a resource with its declared size and hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceData {
    pub body: Option<Vec<u8>>,
    pub size: Option<i32>,
    pub hash: Option<Vec<u8>>,
}

impl ResourceData {
    pub fn from_body(body: Vec<u8>) -> Self {
        Self {
            size: i32::try_from(body.len()).ok(),
            body: Some(body),
            hash: None,
        }
    }

    /// Same payload with the body dropped.
    pub(crate) fn metadata_only(&self) -> Self {
        Self {
            body: None,
            size: self.size,
            hash: self.hash.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAttributes {
    pub source_url: Option<String>,
    pub timestamp: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub client_will_index: Option<bool>,
    pub file_name: Option<String>,
    pub attachment: Option<bool>,
    pub application_data: Option<LazyMap>,
}
