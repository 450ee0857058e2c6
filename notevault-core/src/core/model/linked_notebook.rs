use serde::{Deserialize, Serialize};

/// A reference to another user's notebook shared with this account.
///
/// Linked notebooks are identified by guid only; the notebooks and tags that
/// sync down from them point back through `linked_notebook_guid`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedNotebook {
    pub guid: String,
    pub update_sequence_number: Option<i32>,
    pub share_name: Option<String>,
    pub username: Option<String>,
    pub shard_id: Option<String>,
    pub shared_notebook_global_id: Option<String>,
    pub uri: Option<String>,
    pub note_store_url: Option<String>,
    pub web_api_url_prefix: Option<String>,
    pub stack: Option<String>,
    pub business_id: Option<i32>,
    pub is_dirty: bool,
}
