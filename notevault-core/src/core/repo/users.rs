use rusqlite::{named_params, OptionalExtension, Row};

use super::{aggregate_to_i64, Conditions, Repo};
use crate::core::error::{Context, Result, StorageError};
use crate::core::identity::WriteIntent;
use crate::core::model::{
    AccountLimits, Accounting, BusinessUserInfo, ListFilter, User, UserAttributes,
};
use crate::core::statements::CachedStatement;
use crate::core::validation::check_user;

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        name: row.get("name")?,
        timezone: row.get("timezone")?,
        privilege: row.get("privilege")?,
        service_level: row.get("serviceLevel")?,
        creation_timestamp: row.get("creationTimestamp")?,
        modification_timestamp: row.get("modificationTimestamp")?,
        deletion_timestamp: row.get("deletionTimestamp")?,
        active: row.get("isActive")?,
        shard_id: row.get("shardId")?,
        photo_url: row.get("photoUrl")?,
        photo_last_update_timestamp: row.get("photoLastUpdateTimestamp")?,
        is_dirty: row.get("isDirty")?,
        is_local: row.get("isLocal")?,
        ..User::default()
    })
}

fn map_attributes_row(row: &Row<'_>) -> rusqlite::Result<UserAttributes> {
    Ok(UserAttributes {
        default_location_name: row.get("defaultLocationName")?,
        default_latitude: row.get("defaultLatitude")?,
        default_longitude: row.get("defaultLongitude")?,
        preactivation: row.get("preactivation")?,
        incoming_email_address: row.get("incomingEmailAddress")?,
        comments: row.get("comments")?,
        date_agreed_to_terms_of_service: row.get("dateAgreedToTermsOfService")?,
        max_referrals: row.get("maxReferrals")?,
        referral_count: row.get("referralCount")?,
        referer_code: row.get("refererCode")?,
        sent_email_date: row.get("sentEmailDate")?,
        sent_email_count: row.get("sentEmailCount")?,
        daily_email_limit: row.get("dailyEmailLimit")?,
        email_opt_out_date: row.get("emailOptOutDate")?,
        partner_email_opt_in_date: row.get("partnerEmailOptInDate")?,
        preferred_language: row.get("preferredLanguage")?,
        preferred_country: row.get("preferredCountry")?,
        clip_full_page: row.get("clipFullPage")?,
        twitter_user_name: row.get("twitterUserName")?,
        twitter_id: row.get("twitterId")?,
        group_name: row.get("groupName")?,
        recognition_language: row.get("recognitionLanguage")?,
        referral_proof: row.get("referralProof")?,
        educational_discount: row.get("educationalDiscount")?,
        business_address: row.get("businessAddress")?,
        hide_sponsor_billing: row.get("hideSponsorBilling")?,
        use_email_auto_filing: row.get("useEmailAutoFiling")?,
        reminder_email_config: row.get("reminderEmailConfig")?,
        email_address_last_confirmed: row.get("emailAddressLastConfirmed")?,
        password_updated: row.get("passwordUpdated")?,
        salesforce_push_enabled: row.get("salesforcePushEnabled")?,
        should_log_client_event: row.get("shouldLogClientEvent")?,
        ..UserAttributes::default()
    })
}

fn map_accounting_row(row: &Row<'_>) -> rusqlite::Result<Accounting> {
    Ok(Accounting {
        upload_limit_end: row.get("uploadLimitEnd")?,
        upload_limit_next_month: row.get("uploadLimitNextMonth")?,
        premium_service_status: row.get("premiumServiceStatus")?,
        premium_order_number: row.get("premiumOrderNumber")?,
        premium_commerce_service: row.get("premiumCommerceService")?,
        premium_service_start: row.get("premiumServiceStart")?,
        premium_service_sku: row.get("premiumServiceSKU")?,
        last_successful_charge: row.get("lastSuccessfulCharge")?,
        last_failed_charge: row.get("lastFailedCharge")?,
        last_failed_charge_reason: row.get("lastFailedChargeReason")?,
        next_payment_due: row.get("nextPaymentDue")?,
        premium_lock_until: row.get("premiumLockUntil")?,
        updated: row.get("updated")?,
        premium_subscription_number: row.get("premiumSubscriptionNumber")?,
        last_requested_charge: row.get("lastRequestedCharge")?,
        currency: row.get("currency")?,
        unit_price: row.get("unitPrice")?,
        unit_discount: row.get("unitDiscount")?,
        next_charge_date: row.get("nextChargeDate")?,
        available_points: row.get("availablePoints")?,
    })
}

fn map_limits_row(row: &Row<'_>) -> rusqlite::Result<AccountLimits> {
    Ok(AccountLimits {
        user_mail_limit_daily: row.get("userMailLimitDaily")?,
        note_size_max: row.get("noteSizeMax")?,
        resource_size_max: row.get("resourceSizeMax")?,
        user_linked_notebook_max: row.get("userLinkedNotebookMax")?,
        upload_limit: row.get("uploadLimit")?,
        user_note_count_max: row.get("userNoteCountMax")?,
        user_notebook_count_max: row.get("userNotebookCountMax")?,
        user_tag_count_max: row.get("userTagCountMax")?,
        note_tag_count_max: row.get("noteTagCountMax")?,
        user_saved_searches_max: row.get("userSavedSearchesMax")?,
        note_resource_count_max: row.get("noteResourceCountMax")?,
    })
}

fn map_business_row(row: &Row<'_>) -> rusqlite::Result<BusinessUserInfo> {
    Ok(BusinessUserInfo {
        business_id: row.get("businessId")?,
        business_name: row.get("businessName")?,
        role: row.get("role")?,
        email: row.get("email")?,
    })
}

impl Repo<'_> {
    fn user_exists(&self, id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM Users WHERE id = ?1", [id], |row| row.get(0))
            .optional()
            .context("can't check user existence")?;
        Ok(found.is_some())
    }

    /// Writes a user with all its side records.
    pub fn put_user(&self, user: &User, intent: WriteIntent) -> Result<()> {
        check_user(user)?;
        let exists = self.user_exists(user.id)?;
        let statement = match (intent, exists) {
            (WriteIntent::Add, true) => {
                return Err(StorageError::already_exists("User", user.id.to_string()))
            }
            (WriteIntent::Update, false) => {
                return Err(StorageError::not_found("User", user.id.to_string()))
            }
            (WriteIntent::Add, false) => CachedStatement::InsertUser,
            (WriteIntent::Update, true) => CachedStatement::UpdateUser,
        };

        self.stmts
            .prepare(self.conn, statement)?
            .execute(named_params! {
                ":id": user.id,
                ":username": user.username,
                ":email": user.email,
                ":name": user.name,
                ":timezone": user.timezone,
                ":privilege": user.privilege,
                ":serviceLevel": user.service_level,
                ":creationTimestamp": user.creation_timestamp,
                ":modificationTimestamp": user.modification_timestamp,
                ":deletionTimestamp": user.deletion_timestamp,
                ":isActive": user.active,
                ":shardId": user.shard_id,
                ":photoUrl": user.photo_url,
                ":photoLastUpdateTimestamp": user.photo_last_update_timestamp,
                ":isDirty": user.is_dirty,
                ":isLocal": user.is_local,
            })
            .context("can't write user")?;

        self.put_user_side_records(user)
    }

    fn put_user_side_records(&self, user: &User) -> Result<()> {
        let id = user.id;
        self.conn
            .execute_batch(&format!(
                "DELETE FROM UserAttributes WHERE id = {id};
                 DELETE FROM UserAttributesViewedPromotions WHERE id = {id};
                 DELETE FROM UserAttributesRecentMailedAddresses WHERE id = {id};
                 DELETE FROM Accounting WHERE id = {id};
                 DELETE FROM AccountLimits WHERE id = {id};
                 DELETE FROM BusinessUserInfo WHERE id = {id};"
            ))
            .context("can't clear user side records")?;

        if let Some(a) = &user.attributes {
            self.stmts
                .prepare(self.conn, CachedStatement::ReplaceUserAttributes)?
                .execute(named_params! {
                    ":id": id,
                    ":defaultLocationName": a.default_location_name,
                    ":defaultLatitude": a.default_latitude,
                    ":defaultLongitude": a.default_longitude,
                    ":preactivation": a.preactivation,
                    ":incomingEmailAddress": a.incoming_email_address,
                    ":comments": a.comments,
                    ":dateAgreedToTermsOfService": a.date_agreed_to_terms_of_service,
                    ":maxReferrals": a.max_referrals,
                    ":referralCount": a.referral_count,
                    ":refererCode": a.referer_code,
                    ":sentEmailDate": a.sent_email_date,
                    ":sentEmailCount": a.sent_email_count,
                    ":dailyEmailLimit": a.daily_email_limit,
                    ":emailOptOutDate": a.email_opt_out_date,
                    ":partnerEmailOptInDate": a.partner_email_opt_in_date,
                    ":preferredLanguage": a.preferred_language,
                    ":preferredCountry": a.preferred_country,
                    ":clipFullPage": a.clip_full_page,
                    ":twitterUserName": a.twitter_user_name,
                    ":twitterId": a.twitter_id,
                    ":groupName": a.group_name,
                    ":recognitionLanguage": a.recognition_language,
                    ":referralProof": a.referral_proof,
                    ":educationalDiscount": a.educational_discount,
                    ":businessAddress": a.business_address,
                    ":hideSponsorBilling": a.hide_sponsor_billing,
                    ":useEmailAutoFiling": a.use_email_auto_filing,
                    ":reminderEmailConfig": a.reminder_email_config,
                    ":emailAddressLastConfirmed": a.email_address_last_confirmed,
                    ":passwordUpdated": a.password_updated,
                    ":salesforcePushEnabled": a.salesforce_push_enabled,
                    ":shouldLogClientEvent": a.should_log_client_event,
                })
                .context("can't write user attributes")?;

            let mut promotions = self
                .stmts
                .prepare(self.conn, CachedStatement::InsertViewedPromotion)?;
            for promotion in &a.viewed_promotions {
                promotions
                    .execute(named_params! { ":id": id, ":promotion": promotion })
                    .context("can't write viewed promotion")?;
            }
            let mut addresses = self
                .stmts
                .prepare(self.conn, CachedStatement::InsertRecentMailedAddress)?;
            for address in &a.recent_mailed_addresses {
                addresses
                    .execute(named_params! { ":id": id, ":address": address })
                    .context("can't write recent mailed address")?;
            }
        }

        if let Some(a) = &user.accounting {
            self.stmts
                .prepare(self.conn, CachedStatement::ReplaceAccounting)?
                .execute(named_params! {
                    ":id": id,
                    ":uploadLimitEnd": a.upload_limit_end,
                    ":uploadLimitNextMonth": a.upload_limit_next_month,
                    ":premiumServiceStatus": a.premium_service_status,
                    ":premiumOrderNumber": a.premium_order_number,
                    ":premiumCommerceService": a.premium_commerce_service,
                    ":premiumServiceStart": a.premium_service_start,
                    ":premiumServiceSKU": a.premium_service_sku,
                    ":lastSuccessfulCharge": a.last_successful_charge,
                    ":lastFailedCharge": a.last_failed_charge,
                    ":lastFailedChargeReason": a.last_failed_charge_reason,
                    ":nextPaymentDue": a.next_payment_due,
                    ":premiumLockUntil": a.premium_lock_until,
                    ":updated": a.updated,
                    ":premiumSubscriptionNumber": a.premium_subscription_number,
                    ":lastRequestedCharge": a.last_requested_charge,
                    ":currency": a.currency,
                    ":unitPrice": a.unit_price,
                    ":unitDiscount": a.unit_discount,
                    ":nextChargeDate": a.next_charge_date,
                    ":availablePoints": a.available_points,
                })
                .context("can't write accounting")?;
        }

        if let Some(l) = &user.account_limits {
            self.stmts
                .prepare(self.conn, CachedStatement::ReplaceAccountLimits)?
                .execute(named_params! {
                    ":id": id,
                    ":userMailLimitDaily": l.user_mail_limit_daily,
                    ":noteSizeMax": l.note_size_max,
                    ":resourceSizeMax": l.resource_size_max,
                    ":userLinkedNotebookMax": l.user_linked_notebook_max,
                    ":uploadLimit": l.upload_limit,
                    ":userNoteCountMax": l.user_note_count_max,
                    ":userNotebookCountMax": l.user_notebook_count_max,
                    ":userTagCountMax": l.user_tag_count_max,
                    ":noteTagCountMax": l.note_tag_count_max,
                    ":userSavedSearchesMax": l.user_saved_searches_max,
                    ":noteResourceCountMax": l.note_resource_count_max,
                })
                .context("can't write account limits")?;
        }

        if let Some(b) = &user.business_user_info {
            self.stmts
                .prepare(self.conn, CachedStatement::ReplaceBusinessUserInfo)?
                .execute(named_params! {
                    ":id": id,
                    ":businessId": b.business_id,
                    ":businessName": b.business_name,
                    ":role": b.role,
                    ":email": b.email,
                })
                .context("can't write business user info")?;
        }
        Ok(())
    }

    pub fn find_user(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row("SELECT * FROM Users WHERE id = ?1", [id], map_user_row)
            .optional()
            .context("can't find user")?;
        let Some(mut user) = user else {
            return Ok(None);
        };

        user.attributes = self
            .conn
            .query_row("SELECT * FROM UserAttributes WHERE id = ?1", [id], map_attributes_row)
            .optional()
            .context("can't find user attributes")?;
        if let Some(attributes) = user.attributes.as_mut() {
            attributes.viewed_promotions = self.string_column(
                "SELECT promotion FROM UserAttributesViewedPromotions WHERE id = ?1 ORDER BY rowid",
                id,
            )?;
            attributes.recent_mailed_addresses = self.string_column(
                "SELECT address FROM UserAttributesRecentMailedAddresses WHERE id = ?1 ORDER BY rowid",
                id,
            )?;
        }
        user.accounting = self
            .conn
            .query_row("SELECT * FROM Accounting WHERE id = ?1", [id], map_accounting_row)
            .optional()
            .context("can't find accounting")?;
        user.account_limits = self
            .conn
            .query_row("SELECT * FROM AccountLimits WHERE id = ?1", [id], map_limits_row)
            .optional()
            .context("can't find account limits")?;
        user.business_user_info = self
            .conn
            .query_row("SELECT * FROM BusinessUserInfo WHERE id = ?1", [id], map_business_row)
            .optional()
            .context("can't find business user info")?;
        Ok(Some(user))
    }

    fn string_column(&self, sql: &str, id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(sql).context("can't read user list")?;
        let values = stmt
            .query_map([id], |row| row.get(0))
            .context("can't read user list")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("can't read user list")?;
        Ok(values)
    }

    /// Marks a user deleted without removing the row.
    pub fn mark_user_deleted(&self, id: i64, deletion_timestamp: i64) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE Users SET deletionTimestamp = ?1, isActive = 0, isDirty = 1 WHERE id = ?2",
                rusqlite::params![deletion_timestamp, id],
            )
            .context("can't mark user deleted")?;
        if changed == 0 {
            return Err(StorageError::not_found("User", id.to_string()));
        }
        Ok(())
    }

    pub fn expunge_user(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM Users WHERE id = ?1", [id])
            .context("can't expunge user")?;
        if changed == 0 {
            return Err(StorageError::not_found("User", id.to_string()));
        }
        Ok(())
    }

    /// Counts users that are not marked deleted.
    /// Counts users not marked deleted. Users carry neither a guid nor a
    /// favorite flag, so only the dirty and local parts of `filter` apply.
    pub fn user_count(&self, filter: &ListFilter) -> Result<i64> {
        let mut conditions = Conditions::default();
        conditions.push("deletionTimestamp IS NULL", []);
        conditions.flag("isDirty", filter.dirty);
        conditions.flag("isLocal", filter.local);
        let value = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM Users{}", conditions.sql()),
                conditions.params().as_slice(),
                |row| row.get(0),
            )
            .context("can't count users")?;
        aggregate_to_i64(value, "can't count users")
    }
}
