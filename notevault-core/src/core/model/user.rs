use serde::{Deserialize, Serialize};

/// An account owner or a contact referenced by a shared notebook.
///
/// Users are keyed by their numeric service id rather than by a local id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub timezone: Option<String>,
    pub privilege: Option<i32>,
    pub service_level: Option<i32>,
    pub creation_timestamp: Option<i64>,
    pub modification_timestamp: Option<i64>,
    pub deletion_timestamp: Option<i64>,
    pub active: Option<bool>,
    pub shard_id: Option<String>,
    pub photo_url: Option<String>,
    pub photo_last_update_timestamp: Option<i64>,
    pub attributes: Option<UserAttributes>,
    pub accounting: Option<Accounting>,
    pub account_limits: Option<AccountLimits>,
    pub business_user_info: Option<BusinessUserInfo>,
    pub is_dirty: bool,
    pub is_local: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAttributes {
    pub default_location_name: Option<String>,
    pub default_latitude: Option<f64>,
    pub default_longitude: Option<f64>,
    pub preactivation: Option<bool>,
    pub viewed_promotions: Vec<String>,
    pub incoming_email_address: Option<String>,
    pub recent_mailed_addresses: Vec<String>,
    pub comments: Option<String>,
    pub date_agreed_to_terms_of_service: Option<i64>,
    pub max_referrals: Option<i32>,
    pub referral_count: Option<i32>,
    pub referer_code: Option<String>,
    pub sent_email_date: Option<i64>,
    pub sent_email_count: Option<i32>,
    pub daily_email_limit: Option<i32>,
    pub email_opt_out_date: Option<i64>,
    pub partner_email_opt_in_date: Option<i64>,
    pub preferred_language: Option<String>,
    pub preferred_country: Option<String>,
    pub clip_full_page: Option<bool>,
    pub twitter_user_name: Option<String>,
    pub twitter_id: Option<String>,
    pub group_name: Option<String>,
    pub recognition_language: Option<String>,
    pub referral_proof: Option<String>,
    pub educational_discount: Option<bool>,
    pub business_address: Option<String>,
    pub hide_sponsor_billing: Option<bool>,
    pub use_email_auto_filing: Option<bool>,
    pub reminder_email_config: Option<i32>,
    pub email_address_last_confirmed: Option<i64>,
    pub password_updated: Option<i64>,
    pub salesforce_push_enabled: Option<bool>,
    pub should_log_client_event: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accounting {
    pub upload_limit_end: Option<i64>,
    pub upload_limit_next_month: Option<i64>,
    pub premium_service_status: Option<i32>,
    pub premium_order_number: Option<String>,
    pub premium_commerce_service: Option<String>,
    pub premium_service_start: Option<i64>,
    pub premium_service_sku: Option<String>,
    pub last_successful_charge: Option<i64>,
    pub last_failed_charge: Option<i64>,
    pub last_failed_charge_reason: Option<String>,
    pub next_payment_due: Option<i64>,
    pub premium_lock_until: Option<i64>,
    pub updated: Option<i64>,
    pub premium_subscription_number: Option<String>,
    pub last_requested_charge: Option<i64>,
    pub currency: Option<String>,
    pub unit_price: Option<i32>,
    pub unit_discount: Option<i32>,
    pub next_charge_date: Option<i64>,
    pub available_points: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLimits {
    pub user_mail_limit_daily: Option<i32>,
    pub note_size_max: Option<i64>,
    pub resource_size_max: Option<i64>,
    pub user_linked_notebook_max: Option<i32>,
    pub upload_limit: Option<i64>,
    pub user_note_count_max: Option<i32>,
    pub user_notebook_count_max: Option<i32>,
    pub user_tag_count_max: Option<i32>,
    pub note_tag_count_max: Option<i32>,
    pub user_saved_searches_max: Option<i32>,
    pub note_resource_count_max: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessUserInfo {
    pub business_id: Option<i32>,
    pub business_name: Option<String>,
    pub role: Option<i32>,
    pub email: Option<String>,
}
