use serde::{Deserialize, Serialize};

/// A label attachable to notes; tags form a forest through their parent link.
///
/// The parent may be addressed by guid, by local id, or both. Whichever one is
/// given, the other is resolved before the row is written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub local_id: String,
    pub guid: Option<String>,
    pub linked_notebook_guid: Option<String>,
    pub update_sequence_number: Option<i32>,
    pub name: Option<String>,
    pub parent_guid: Option<String>,
    pub parent_local_id: Option<String>,
    pub is_dirty: bool,
    pub is_local: bool,
    pub is_favorited: bool,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            local_id: crate::core::identity::new_local_id(),
            name: Some(name.into()),
            is_dirty: true,
            ..Default::default()
        }
    }
}
