//! Prepared statements for the hot write paths.
//!
//! Each [`CachedStatement`] names one logical operation with fixed SQL text.
//! Statements are prepared through the connection's own LRU statement cache
//! on first use and reused afterwards; [`StatementCache::clear`] drops them
//! all when the storage switches to another account.

use std::cell::RefCell;
use std::collections::HashSet;

use rusqlite::Connection;

use crate::core::error::{Context, Result};

pub const DEFAULT_CAPACITY: usize = 64;

pub(crate) const USER_COLUMNS: &[&str] = &[
    "id", "username", "email", "name", "timezone", "privilege", "serviceLevel",
    "creationTimestamp", "modificationTimestamp", "deletionTimestamp", "isActive",
    "shardId", "photoUrl", "photoLastUpdateTimestamp", "isDirty", "isLocal",
];

pub(crate) const USER_ATTRIBUTES_COLUMNS: &[&str] = &[
    "id", "defaultLocationName", "defaultLatitude", "defaultLongitude", "preactivation",
    "incomingEmailAddress", "comments", "dateAgreedToTermsOfService", "maxReferrals",
    "referralCount", "refererCode", "sentEmailDate", "sentEmailCount", "dailyEmailLimit",
    "emailOptOutDate", "partnerEmailOptInDate", "preferredLanguage", "preferredCountry",
    "clipFullPage", "twitterUserName", "twitterId", "groupName", "recognitionLanguage",
    "referralProof", "educationalDiscount", "businessAddress", "hideSponsorBilling",
    "useEmailAutoFiling", "reminderEmailConfig", "emailAddressLastConfirmed",
    "passwordUpdated", "salesforcePushEnabled", "shouldLogClientEvent",
];

pub(crate) const ACCOUNTING_COLUMNS: &[&str] = &[
    "id", "uploadLimitEnd", "uploadLimitNextMonth", "premiumServiceStatus",
    "premiumOrderNumber", "premiumCommerceService", "premiumServiceStart",
    "premiumServiceSKU", "lastSuccessfulCharge", "lastFailedCharge",
    "lastFailedChargeReason", "nextPaymentDue", "premiumLockUntil", "updated",
    "premiumSubscriptionNumber", "lastRequestedCharge", "currency", "unitPrice",
    "unitDiscount", "nextChargeDate", "availablePoints",
];

pub(crate) const ACCOUNT_LIMITS_COLUMNS: &[&str] = &[
    "id", "userMailLimitDaily", "noteSizeMax", "resourceSizeMax", "userLinkedNotebookMax",
    "uploadLimit", "userNoteCountMax", "userNotebookCountMax", "userTagCountMax",
    "noteTagCountMax", "userSavedSearchesMax", "noteResourceCountMax",
];

pub(crate) const BUSINESS_USER_INFO_COLUMNS: &[&str] =
    &["id", "businessId", "businessName", "role", "email"];

pub(crate) const LINKED_NOTEBOOK_COLUMNS: &[&str] = &[
    "guid", "updateSequenceNumber", "shareName", "username", "shardId",
    "sharedNotebookGlobalId", "uri", "noteStoreUrl", "webApiUrlPrefix", "stack",
    "businessId", "isDirty",
];

pub(crate) const NOTEBOOK_COLUMNS: &[&str] = &[
    "localUid", "guid", "linkedNotebookGuid", "updateSequenceNumber", "name", "nameLower",
    "creationTimestamp", "modificationTimestamp", "isDirty", "isLocal", "isFavorited",
    "isDefault", "isLastUsed", "publishingUri", "publishingNoteSortOrder",
    "publishingAscendingSort", "publicDescription", "isPublished", "stack",
    "businessNotebookDescription", "businessNotebookPrivilegeLevel",
    "businessNotebookIsRecommended", "contactId", "recipientReminderNotifyEmail",
    "recipientReminderNotifyInApp", "recipientInMyList", "recipientStack",
];

pub(crate) const NOTEBOOK_RESTRICTIONS_COLUMNS: &[&str] = &[
    "localUid", "noReadNotes", "noCreateNotes", "noUpdateNotes", "noExpungeNotes",
    "noShareNotes", "noEmailNotes", "noSendMessageToRecipients", "noUpdateNotebook",
    "noExpungeNotebook", "noSetDefaultNotebook", "noSetNotebookStack", "noPublishToPublic",
    "noPublishToBusinessLibrary", "noCreateTags", "noUpdateTags", "noExpungeTags",
    "noSetParentTag", "noCreateSharedNotebooks", "updateWhichSharedNotebookRestrictions",
    "expungeWhichSharedNotebookRestrictions",
];

pub(crate) const SHARED_NOTEBOOK_COLUMNS: &[&str] = &[
    "shareId", "userId", "notebookGuid", "email", "creationTimestamp",
    "modificationTimestamp", "globalId", "username", "privilege", "reminderNotifyEmail",
    "reminderNotifyInApp", "sharerUserId", "recipientUsername", "recipientUserId",
    "recipientIdentityId", "assignmentTimestamp", "indexInNotebook",
];

pub(crate) const NOTE_COLUMNS: &[&str] = &[
    "localUid", "guid", "updateSequenceNumber", "isDirty", "isLocal", "isFavorited",
    "title", "titleNormalized", "content", "contentLength", "contentHash",
    "contentPlainText", "contentListOfWords", "contentContainsFinishedToDo",
    "contentContainsUnfinishedToDo", "contentContainsEncryption", "creationTimestamp",
    "modificationTimestamp", "deletionTimestamp", "isActive", "hasAttributes", "thumbnail",
    "notebookLocalUid", "notebookGuid", "subjectDate", "latitude", "longitude", "altitude",
    "author", "source", "sourceURL", "sourceApplication", "shareDate", "reminderOrder",
    "reminderDoneTime", "reminderTime", "placeName", "contentClass", "lastEditedBy",
    "creatorId", "lastEditorId", "sharedWithBusiness", "conflictSourceNoteGuid",
    "noteTitleQuality", "hasApplicationData", "hasClassifications",
];

pub(crate) const NOTE_RESTRICTIONS_COLUMNS: &[&str] = &[
    "noteLocalUid", "noUpdateNoteTitle", "noUpdateNoteContent", "noEmailNote", "noShareNote",
    "noShareNotePublicly",
];

pub(crate) const NOTE_LIMITS_COLUMNS: &[&str] = &[
    "noteLocalUid", "noteResourceCountMax", "uploadLimit", "resourceSizeMax", "noteSizeMax",
    "uploaded",
];

pub(crate) const SHARED_NOTE_COLUMNS: &[&str] = &[
    "noteLocalUid", "noteGuid", "sharerUserId", "recipientIdentityId", "recipientContactName",
    "recipientContactId", "recipientContactType", "recipientUserId", "privilege",
    "creationTimestamp", "modificationTimestamp", "assignmentTimestamp", "indexInNote",
];

pub(crate) const TAG_COLUMNS: &[&str] = &[
    "localUid", "guid", "linkedNotebookGuid", "updateSequenceNumber", "name", "nameLower",
    "parentGuid", "parentLocalUid", "isDirty", "isLocal", "isFavorited",
];

pub(crate) const RESOURCE_COLUMNS: &[&str] = &[
    "localUid", "guid", "noteLocalUid", "noteGuid", "updateSequenceNumber", "isDirty",
    "isLocal", "isFavorited", "dataSize", "dataHash", "mime", "width", "height",
    "recognitionDataBody", "recognitionDataSize", "recognitionDataHash",
    "alternateDataSize", "alternateDataHash", "indexInNote",
];

pub(crate) const RESOURCE_ATTRIBUTES_COLUMNS: &[&str] = &[
    "resourceLocalUid", "sourceURL", "timestamp", "latitude", "longitude", "altitude",
    "cameraMake", "cameraModel", "clientWillIndex", "fileName", "isAttachment",
];

pub(crate) const SAVED_SEARCH_COLUMNS: &[&str] = &[
    "localUid", "guid", "name", "nameLower", "query", "format", "updateSequenceNumber",
    "isDirty", "isLocal", "isFavorited", "includeAccount", "includePersonalLinkedNotebooks",
    "includeBusinessLinkedNotebooks",
];

/// Logical statements kept prepared across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachedStatement {
    InsertUser,
    UpdateUser,
    ReplaceUserAttributes,
    InsertViewedPromotion,
    InsertRecentMailedAddress,
    ReplaceAccounting,
    ReplaceAccountLimits,
    ReplaceBusinessUserInfo,
    InsertLinkedNotebook,
    UpdateLinkedNotebook,
    InsertNotebook,
    UpdateNotebook,
    ReplaceNotebookRestrictions,
    InsertSharedNotebook,
    InsertNote,
    UpdateNote,
    ReplaceNoteRestrictions,
    ReplaceNoteLimits,
    InsertSharedNote,
    InsertNoteTag,
    InsertNoteApplicationDataKey,
    InsertNoteApplicationDataEntry,
    InsertNoteClassification,
    InsertTag,
    UpdateTag,
    InsertResource,
    UpdateResource,
    ReplaceResourceAttributes,
    InsertResourceApplicationDataKey,
    InsertResourceApplicationDataEntry,
    ReplaceResourceRecognitionData,
    InsertSavedSearch,
    UpdateSavedSearch,
}

fn insert_sql(verb: &str, table: &str, columns: &[&str]) -> String {
    let names = columns.join(", ");
    let params = columns
        .iter()
        .map(|c| format!(":{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{verb} INTO {table} ({names}) VALUES ({params})")
}

fn update_sql(table: &str, columns: &[&str], key: &str) -> String {
    let sets = columns
        .iter()
        .filter(|c| **c != key)
        .map(|c| format!("{c} = :{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {table} SET {sets} WHERE {key} = :{key}")
}

impl CachedStatement {
    pub fn sql(self) -> String {
        use CachedStatement::*;
        match self {
            InsertUser => insert_sql("INSERT", "Users", USER_COLUMNS),
            UpdateUser => update_sql("Users", USER_COLUMNS, "id"),
            ReplaceUserAttributes => insert_sql("INSERT OR REPLACE", "UserAttributes", USER_ATTRIBUTES_COLUMNS),
            InsertViewedPromotion => {
                "INSERT INTO UserAttributesViewedPromotions (id, promotion) VALUES (:id, :promotion)".into()
            }
            InsertRecentMailedAddress => {
                "INSERT INTO UserAttributesRecentMailedAddresses (id, address) VALUES (:id, :address)".into()
            }
            ReplaceAccounting => insert_sql("INSERT OR REPLACE", "Accounting", ACCOUNTING_COLUMNS),
            ReplaceAccountLimits => insert_sql("INSERT OR REPLACE", "AccountLimits", ACCOUNT_LIMITS_COLUMNS),
            ReplaceBusinessUserInfo => {
                insert_sql("INSERT OR REPLACE", "BusinessUserInfo", BUSINESS_USER_INFO_COLUMNS)
            }
            InsertLinkedNotebook => insert_sql("INSERT", "LinkedNotebooks", LINKED_NOTEBOOK_COLUMNS),
            UpdateLinkedNotebook => update_sql("LinkedNotebooks", LINKED_NOTEBOOK_COLUMNS, "guid"),
            InsertNotebook => insert_sql("INSERT", "Notebooks", NOTEBOOK_COLUMNS),
            UpdateNotebook => update_sql("Notebooks", NOTEBOOK_COLUMNS, "localUid"),
            ReplaceNotebookRestrictions => {
                insert_sql("INSERT OR REPLACE", "NotebookRestrictions", NOTEBOOK_RESTRICTIONS_COLUMNS)
            }
            InsertSharedNotebook => insert_sql("INSERT OR REPLACE", "SharedNotebooks", SHARED_NOTEBOOK_COLUMNS),
            InsertNote => insert_sql("INSERT", "Notes", NOTE_COLUMNS),
            UpdateNote => update_sql("Notes", NOTE_COLUMNS, "localUid"),
            ReplaceNoteRestrictions => {
                insert_sql("INSERT OR REPLACE", "NoteRestrictions", NOTE_RESTRICTIONS_COLUMNS)
            }
            ReplaceNoteLimits => insert_sql("INSERT OR REPLACE", "NoteLimits", NOTE_LIMITS_COLUMNS),
            InsertSharedNote => insert_sql("INSERT", "SharedNotes", SHARED_NOTE_COLUMNS),
            InsertNoteTag => "INSERT INTO NoteTags (localNote, note, localTag, tag, tagIndexInNote) \
                              VALUES (:localNote, :note, :localTag, :tag, :tagIndexInNote)"
                .into(),
            InsertNoteApplicationDataKey => {
                "INSERT INTO NoteApplicationDataKeysOnly (noteLocalUid, key) VALUES (:noteLocalUid, :key)".into()
            }
            InsertNoteApplicationDataEntry => "INSERT INTO NoteApplicationDataFullMap (noteLocalUid, key, value) \
                                               VALUES (:noteLocalUid, :key, :value)"
                .into(),
            InsertNoteClassification => "INSERT INTO NoteClassifications (noteLocalUid, key, value) \
                                         VALUES (:noteLocalUid, :key, :value)"
                .into(),
            InsertTag => insert_sql("INSERT", "Tags", TAG_COLUMNS),
            UpdateTag => update_sql("Tags", TAG_COLUMNS, "localUid"),
            InsertResource => insert_sql("INSERT", "Resources", RESOURCE_COLUMNS),
            UpdateResource => update_sql("Resources", RESOURCE_COLUMNS, "localUid"),
            ReplaceResourceAttributes => {
                insert_sql("INSERT OR REPLACE", "ResourceAttributes", RESOURCE_ATTRIBUTES_COLUMNS)
            }
            InsertResourceApplicationDataKey => "INSERT INTO ResourceAttributesApplicationDataKeysOnly \
                                                 (resourceLocalUid, key) VALUES (:resourceLocalUid, :key)"
                .into(),
            InsertResourceApplicationDataEntry => "INSERT INTO ResourceAttributesApplicationDataFullMap \
                                                   (resourceLocalUid, key, value) VALUES (:resourceLocalUid, :key, :value)"
                .into(),
            ReplaceResourceRecognitionData => "INSERT OR REPLACE INTO ResourceRecognitionData \
                                               (resourceLocalUid, noteLocalUid, recognitionData) \
                                               VALUES (:resourceLocalUid, :noteLocalUid, :recognitionData)"
                .into(),
            InsertSavedSearch => insert_sql("INSERT", "SavedSearches", SAVED_SEARCH_COLUMNS),
            UpdateSavedSearch => update_sql("SavedSearches", SAVED_SEARCH_COLUMNS, "localUid"),
        }
    }
}

/// Tracks which logical statements were prepared on the current connection.
#[derive(Debug, Default)]
pub struct StatementCache {
    prepared: RefCell<HashSet<CachedStatement>>,
}

impl StatementCache {
    pub fn new(conn: &Connection, capacity: usize) -> Self {
        conn.set_prepared_statement_cache_capacity(capacity);
        Self::default()
    }

    /// Prepares `statement` or takes it from the connection's cache.
    pub fn prepare<'c>(
        &self,
        conn: &'c Connection,
        statement: CachedStatement,
    ) -> Result<rusqlite::CachedStatement<'c>> {
        let stmt = conn
            .prepare_cached(&statement.sql())
            .context(&format!("can't prepare {statement:?} statement"))?;
        if self.prepared.borrow_mut().insert(statement) {
            log::debug!("Prepared {statement:?}");
        }
        Ok(stmt)
    }

    /// Number of distinct logical statements prepared since the last clear.
    pub fn prepared_count(&self) -> usize {
        self.prepared.borrow().len()
    }

    /// Forgets every prepared statement.
    pub fn clear(&self, conn: &Connection) {
        conn.flush_prepared_statement_cache();
        self.prepared.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_sql_shape() {
        assert_eq!(
            CachedStatement::UpdateTag.sql(),
            "UPDATE Tags SET guid = :guid, linkedNotebookGuid = :linkedNotebookGuid, \
             updateSequenceNumber = :updateSequenceNumber, name = :name, nameLower = :nameLower, \
             parentGuid = :parentGuid, parentLocalUid = :parentLocalUid, isDirty = :isDirty, \
             isLocal = :isLocal, isFavorited = :isFavorited WHERE localUid = :localUid"
        );
        assert!(CachedStatement::InsertNote
            .sql()
            .starts_with("INSERT INTO Notes (localUid, guid,"));
    }

    #[test]
    fn test_prepare_counts_first_use_and_clear_resets() {
        let conn = Connection::open_in_memory().unwrap();
        crate::core::schema::SchemaManager::new(&conn).ensure_schema().unwrap();
        let cache = StatementCache::new(&conn, DEFAULT_CAPACITY);

        cache.prepare(&conn, CachedStatement::UpdateTag).unwrap();
        cache.prepare(&conn, CachedStatement::UpdateTag).unwrap();
        assert_eq!(cache.prepared_count(), 1);

        cache.clear(&conn);
        assert_eq!(cache.prepared_count(), 0);
    }
}
