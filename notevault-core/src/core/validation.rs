//! Structural checks run on entities before any statement executes.
//!
//! Every validator returns [`StorageError::Validation`] (or
//! [`StorageError::InvalidGuid`] for guid fields) on failure.

use crate::core::error::{Result, StorageError};
use crate::core::identity::check_guid;
use crate::core::model::{LinkedNotebook, Note, Notebook, Resource, SavedSearch, Tag, User};

pub const MIN_NAME_LENGTH: usize = 1;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_NOTE_TITLE_LENGTH: usize = 255;
pub const MAX_NOTE_CONTENT_LENGTH: usize = 5 * 1024 * 1024;
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1024;
pub const MIN_MIME_LENGTH: usize = 3;
pub const MAX_MIME_LENGTH: usize = 255;
pub const MAX_TAGS_PER_NOTE: usize = 100;
pub const MAX_RESOURCES_PER_NOTE: usize = 1000;

/// Validates a display name: bounded length, no control characters, no
/// surrounding whitespace.
pub fn validate_name(field: &str, value: &str, max_len: usize) -> Result<()> {
    let len = value.chars().count();
    if len < MIN_NAME_LENGTH || len > max_len {
        return Err(StorageError::validation(format!(
            "{field} must be between {MIN_NAME_LENGTH} and {max_len} characters, got {len}"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(StorageError::validation(format!(
            "{field} must not contain control characters"
        )));
    }
    if value.trim() != value {
        return Err(StorageError::validation(format!(
            "{field} must not start or end with whitespace"
        )));
    }
    Ok(())
}

fn validate_usn(field: &str, usn: Option<i32>) -> Result<()> {
    match usn {
        Some(v) if v < 0 => Err(StorageError::validation(format!(
            "{field} update sequence number must not be negative, got {v}"
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn require_local_id(field: &str, local_id: &str) -> Result<()> {
    if local_id.is_empty() {
        return Err(StorageError::validation(format!("{field} local id is empty")));
    }
    Ok(())
}

pub fn validate_mime(mime: &str) -> Result<()> {
    let len = mime.chars().count();
    if !(MIN_MIME_LENGTH..=MAX_MIME_LENGTH).contains(&len) {
        return Err(StorageError::validation(format!(
            "mime type must be between {MIN_MIME_LENGTH} and {MAX_MIME_LENGTH} characters, got {len}"
        )));
    }
    Ok(())
}

pub fn check_user(user: &User) -> Result<()> {
    if user.id < 0 {
        return Err(StorageError::validation(format!(
            "user id must not be negative, got {}",
            user.id
        )));
    }
    if let Some(username) = user.username.as_deref() {
        validate_name("username", username, MAX_NAME_LENGTH)?;
    }
    Ok(())
}

pub fn check_notebook(notebook: &Notebook) -> Result<()> {
    check_guid(notebook.guid.as_deref())?;
    check_guid(notebook.linked_notebook_guid.as_deref())?;
    validate_usn("notebook", notebook.update_sequence_number)?;
    match notebook.name.as_deref() {
        Some(name) => validate_name("notebook name", name, MAX_NAME_LENGTH)?,
        None => return Err(StorageError::validation("notebook name is not set")),
    }
    if notebook.is_local && notebook.guid.is_some() {
        return Err(StorageError::validation("local notebook can't have a guid"));
    }
    for shared in &notebook.shared_notebooks {
        if let (Some(nb_guid), Some(guid)) = (shared.notebook_guid.as_deref(), notebook.guid.as_deref())
        {
            if nb_guid != guid {
                return Err(StorageError::validation(format!(
                    "shared notebook {} points to another notebook",
                    shared.id
                )));
            }
        }
    }
    if !notebook.shared_notebooks.is_empty() && notebook.guid.is_none() {
        return Err(StorageError::validation(
            "shared notebooks require the notebook to have a guid",
        ));
    }
    Ok(())
}

pub fn check_linked_notebook(linked: &LinkedNotebook) -> Result<()> {
    if linked.guid.is_empty() {
        return Err(StorageError::validation("linked notebook guid is not set"));
    }
    check_guid(Some(&linked.guid))?;
    validate_usn("linked notebook", linked.update_sequence_number)?;
    if let Some(name) = linked.share_name.as_deref() {
        validate_name("linked notebook share name", name, MAX_NAME_LENGTH)?;
    }
    Ok(())
}

pub fn check_tag(tag: &Tag) -> Result<()> {
    check_guid(tag.guid.as_deref())?;
    check_guid(tag.parent_guid.as_deref())?;
    check_guid(tag.linked_notebook_guid.as_deref())?;
    validate_usn("tag", tag.update_sequence_number)?;
    match tag.name.as_deref() {
        Some(name) => {
            validate_name("tag name", name, MAX_NAME_LENGTH)?;
            if name.contains(',') {
                return Err(StorageError::validation("tag name must not contain commas"));
            }
        }
        None => return Err(StorageError::validation("tag name is not set")),
    }
    if tag.is_local && tag.guid.is_some() {
        return Err(StorageError::validation("local tag can't have a guid"));
    }
    if !tag.local_id.is_empty() && tag.parent_local_id.as_deref() == Some(tag.local_id.as_str()) {
        return Err(StorageError::validation("tag can't be its own parent"));
    }
    Ok(())
}

pub fn check_saved_search(search: &SavedSearch) -> Result<()> {
    check_guid(search.guid.as_deref())?;
    validate_usn("saved search", search.update_sequence_number)?;
    match search.name.as_deref() {
        Some(name) => validate_name("saved search name", name, MAX_NAME_LENGTH)?,
        None => return Err(StorageError::validation("saved search name is not set")),
    }
    match search.query.as_deref() {
        Some(q) => {
            let len = q.chars().count();
            if len == 0 || len > MAX_SEARCH_QUERY_LENGTH {
                return Err(StorageError::validation(format!(
                    "saved search query must be between 1 and {MAX_SEARCH_QUERY_LENGTH} characters, got {len}"
                )));
            }
        }
        None => return Err(StorageError::validation("saved search query is not set")),
    }
    Ok(())
}

/// Validates a resource on its own; `check_note` covers the owning note.
pub fn check_resource(resource: &Resource) -> Result<()> {
    check_guid(resource.guid.as_deref())?;
    check_guid(resource.note_guid.as_deref())?;
    validate_usn("resource", resource.update_sequence_number)?;
    if resource.note_local_id.is_empty() && resource.note_guid.is_none() {
        return Err(StorageError::validation(
            "resource must reference a note by local id or guid",
        ));
    }
    if let Some(mime) = resource.mime.as_deref() {
        validate_mime(mime)?;
    }
    for (label, data) in [
        ("data", resource.data.as_ref()),
        ("alternate data", resource.alternate_data.as_ref()),
    ] {
        if let Some(d) = data {
            if let (Some(body), Some(size)) = (d.body.as_ref(), d.size) {
                if body.len() as i64 != i64::from(size) {
                    return Err(StorageError::validation(format!(
                        "resource {label} size {size} does not match body length {}",
                        body.len()
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Validates a note together with its resources.
///
/// Run before writing and again on the freshly written composite before the
/// transaction commits.
pub fn check_note(note: &Note) -> Result<()> {
    check_guid(note.guid.as_deref())?;
    check_guid(note.notebook_guid.as_deref())?;
    validate_usn("note", note.update_sequence_number)?;
    if note.notebook_local_id.is_empty() && note.notebook_guid.is_none() {
        return Err(StorageError::validation(
            "note must reference a notebook by local id or guid",
        ));
    }
    if let Some(title) = note.title.as_deref() {
        validate_name("note title", title, MAX_NOTE_TITLE_LENGTH)?;
    }
    if let Some(content) = note.content.as_deref() {
        if content.len() > MAX_NOTE_CONTENT_LENGTH {
            return Err(StorageError::validation(format!(
                "note content exceeds {MAX_NOTE_CONTENT_LENGTH} bytes"
            )));
        }
    }
    for guid in &note.tag_guids {
        check_guid(Some(guid))?;
    }
    let tag_count = note.tag_local_ids.len().max(note.tag_guids.len());
    if tag_count > MAX_TAGS_PER_NOTE {
        return Err(StorageError::validation(format!(
            "note has {tag_count} tags, at most {MAX_TAGS_PER_NOTE} are allowed"
        )));
    }
    if note.resources.len() > MAX_RESOURCES_PER_NOTE {
        return Err(StorageError::validation(format!(
            "note has {} resources, at most {MAX_RESOURCES_PER_NOTE} are allowed",
            note.resources.len()
        )));
    }
    for resource in &note.resources {
        check_resource(resource)?;
        if !note.local_id.is_empty()
            && !resource.note_local_id.is_empty()
            && resource.note_local_id != note.local_id
        {
            return Err(StorageError::validation(format!(
                "resource {} belongs to another note",
                resource.local_id
            )));
        }
    }
    Ok(())
}

/// Guid removal is only allowed while none of the note's resources still
/// carries server identity.
pub fn check_guid_clearing(note: &Note) -> Result<()> {
    for resource in &note.resources {
        if resource.guid.is_some() || resource.note_guid.is_some() {
            return Err(StorageError::validation(format!(
                "can't clear the guid of note {}: resource {} still has a guid or note guid",
                note.local_id, resource.local_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ResourceData;

    #[test]
    fn test_validate_name_rules() {
        assert!(validate_name("name", "Work", MAX_NAME_LENGTH).is_ok());
        assert!(validate_name("name", "", MAX_NAME_LENGTH).is_err());
        assert!(validate_name("name", " padded", MAX_NAME_LENGTH).is_err());
        assert!(validate_name("name", "bell\u{7}", MAX_NAME_LENGTH).is_err());
        assert!(validate_name("name", &"x".repeat(101), MAX_NAME_LENGTH).is_err());
    }

    #[test]
    fn test_tag_name_rejects_comma() {
        let tag = Tag::new("a,b");
        assert!(matches!(check_tag(&tag), Err(StorageError::Validation(_))));
    }

    #[test]
    fn test_notebook_bad_guid() {
        let mut nb = Notebook::new("Inbox");
        nb.guid = Some("bogus".into());
        assert!(matches!(check_notebook(&nb), Err(StorageError::InvalidGuid(_))));
    }

    #[test]
    fn test_note_requires_notebook() {
        let note = Note::new("");
        assert!(check_note(&note).is_err());
        let note = Note::new("nb-1");
        assert!(check_note(&note).is_ok());
    }

    #[test]
    fn test_resource_size_mismatch() {
        let mut res = Resource::new("note-1");
        res.data = Some(ResourceData {
            body: Some(vec![1, 2, 3]),
            size: Some(5),
            hash: None,
        });
        assert!(check_resource(&res).is_err());
    }

    #[test]
    fn test_guid_clearing_blocked_by_resource_guid() {
        let mut note = Note::new("nb-1");
        let mut res = Resource::new(note.local_id.clone());
        res.note_guid = Some("11111111-2222-3333-4444-555555555555".into());
        note.resources.push(res);
        assert!(check_guid_clearing(&note).is_err());
        note.resources[0].note_guid = None;
        assert!(check_guid_clearing(&note).is_ok());
    }

    #[test]
    fn test_saved_search_query_length() {
        let mut search = SavedSearch::new("Recent", "created:day-1");
        assert!(check_saved_search(&search).is_ok());
        search.query = Some(String::new());
        assert!(check_saved_search(&search).is_err());
    }
}
