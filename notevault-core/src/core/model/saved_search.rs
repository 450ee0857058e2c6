use serde::{Deserialize, Serialize};

/// A named search query, unique per account by case-insensitive name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSearch {
    pub local_id: String,
    pub guid: Option<String>,
    pub name: Option<String>,
    pub query: Option<String>,
    pub query_format: Option<i32>,
    pub update_sequence_number: Option<i32>,
    pub include_account: Option<bool>,
    pub include_personal_linked_notebooks: Option<bool>,
    pub include_business_linked_notebooks: Option<bool>,
    pub is_dirty: bool,
    pub is_local: bool,
    pub is_favorited: bool,
}

impl SavedSearch {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            local_id: crate::core::identity::new_local_id(),
            name: Some(name.into()),
            query: Some(query.into()),
            query_format: Some(1),
            is_dirty: true,
            ..Default::default()
        }
    }
}
