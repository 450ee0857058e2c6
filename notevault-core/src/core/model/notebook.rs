use serde::{Deserialize, Serialize};

/// A container of notes, either in the user's own account or inside a
/// linked (shared) notebook.
///
/// `is_default` and `is_last_used` are account-wide singletons: at most one
/// notebook may carry each flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub local_id: String,
    pub guid: Option<String>,
    pub linked_notebook_guid: Option<String>,
    pub update_sequence_number: Option<i32>,
    pub name: Option<String>,
    pub creation_timestamp: Option<i64>,
    pub modification_timestamp: Option<i64>,
    pub is_default: bool,
    pub is_last_used: bool,
    pub publishing: Option<Publishing>,
    pub published: Option<bool>,
    pub stack: Option<String>,
    pub business_notebook: Option<BusinessNotebook>,
    pub contact_id: Option<i64>,
    pub recipient_settings: Option<NotebookRecipientSettings>,
    pub restrictions: Option<NotebookRestrictions>,
    pub shared_notebooks: Vec<SharedNotebook>,
    pub is_dirty: bool,
    pub is_local: bool,
    pub is_favorited: bool,
}

impl Notebook {
    /// Creates a local, dirty notebook with a fresh local id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            local_id: crate::core::identity::new_local_id(),
            name: Some(name.into()),
            is_dirty: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Publishing {
    pub uri: Option<String>,
    pub order: Option<i32>,
    pub ascending: Option<bool>,
    pub public_description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessNotebook {
    pub notebook_description: Option<String>,
    pub privilege: Option<i32>,
    pub recommended: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookRecipientSettings {
    pub reminder_notify_email: Option<bool>,
    pub reminder_notify_in_app: Option<bool>,
    pub in_my_list: Option<bool>,
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookRestrictions {
    pub no_read_notes: Option<bool>,
    pub no_create_notes: Option<bool>,
    pub no_update_notes: Option<bool>,
    pub no_expunge_notes: Option<bool>,
    pub no_share_notes: Option<bool>,
    pub no_email_notes: Option<bool>,
    pub no_send_message_to_recipients: Option<bool>,
    pub no_update_notebook: Option<bool>,
    pub no_expunge_notebook: Option<bool>,
    pub no_set_default_notebook: Option<bool>,
    pub no_set_notebook_stack: Option<bool>,
    pub no_publish_to_public: Option<bool>,
    pub no_publish_to_business_library: Option<bool>,
    pub no_create_tags: Option<bool>,
    pub no_update_tags: Option<bool>,
    pub no_expunge_tags: Option<bool>,
    pub no_set_parent_tag: Option<bool>,
    pub no_create_shared_notebooks: Option<bool>,
    pub update_which_shared_notebook_restrictions: Option<i32>,
    pub expunge_which_shared_notebook_restrictions: Option<i32>,
}

/// One share of a notebook with another user.
///
/// Shares are only stored for notebooks that carry a guid; their order within
/// the notebook is kept in `index_in_notebook`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedNotebook {
    pub id: i64,
    pub user_id: Option<i32>,
    pub notebook_guid: Option<String>,
    pub email: Option<String>,
    pub creation_timestamp: Option<i64>,
    pub modification_timestamp: Option<i64>,
    pub global_id: Option<String>,
    pub username: Option<String>,
    pub privilege: Option<i32>,
    pub reminder_notify_email: Option<bool>,
    pub reminder_notify_in_app: Option<bool>,
    pub sharer_user_id: Option<i32>,
    pub recipient_username: Option<String>,
    pub recipient_user_id: Option<i32>,
    pub recipient_identity_id: Option<i64>,
    pub assignment_timestamp: Option<i64>,
    pub index_in_notebook: Option<i32>,
}
