//! Parser for the note search language.
//!
//! A query is a whitespace separated list of terms. A term is either a
//! `modifier:value` pair or free text; double quotes group words into one
//! value or phrase, and a leading `-` negates the term. `any:` switches the
//! whole query from "all terms must match" to "any term may match".

use chrono::{DateTime, Datelike, Duration, Local, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::core::error::{Result, StorageError};

/// Values of a list-valued text attribute such as `tag:` or `author:`.
///
/// `any` is set by `modifier:*` (attribute present) and `negated_any` by
/// `-modifier:*` (attribute absent).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFilter {
    pub values: Vec<String>,
    pub negated: Vec<String>,
    pub any: bool,
    pub negated_any: bool,
}

impl TextFilter {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.negated.is_empty() && !self.any && !self.negated_any
    }

    fn push(&mut self, value: String, negated: bool) {
        match (value == "*", negated) {
            (true, false) => self.any = true,
            (true, true) => self.negated_any = true,
            (false, false) => self.values.push(value),
            (false, true) => self.negated.push(value),
        }
    }
}

/// Thresholds of a numeric attribute: `modifier:N` means "at least N",
/// `-modifier:N` means "less than N".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumericFilter<T> {
    pub values: Vec<T>,
    pub negated: Vec<T>,
    pub any: bool,
    pub negated_any: bool,
}

impl<T> NumericFilter<T> {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.negated.is_empty() && !self.any && !self.negated_any
    }
}

/// A parsed search query.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteSearchQuery {
    pub text: String,
    pub any: bool,
    pub notebook: Option<String>,
    pub tags: TextFilter,
    pub resource_mimes: TextFilter,
    pub created: NumericFilter<i64>,
    pub updated: NumericFilter<i64>,
    pub subject_date: NumericFilter<i64>,
    pub latitude: NumericFilter<f64>,
    pub longitude: NumericFilter<f64>,
    pub altitude: NumericFilter<f64>,
    pub author: TextFilter,
    pub source: TextFilter,
    pub source_application: TextFilter,
    pub content_class: TextFilter,
    pub place_name: TextFilter,
    pub application_data: TextFilter,
    pub reminder_order: NumericFilter<i64>,
    pub reminder_time: NumericFilter<i64>,
    pub reminder_done_time: NumericFilter<i64>,
    /// `Some(true)` for `todo:true`, `Some(false)` for `-todo:true`.
    pub finished_todo: Option<bool>,
    /// `Some(true)` for `todo:false`, `Some(false)` for `-todo:false`.
    pub unfinished_todo: Option<bool>,
    /// `Some(true)` for `todo:*`, `Some(false)` for `-todo:*`.
    pub any_todo: Option<bool>,
    pub encryption: Option<bool>,
    pub content_terms: Vec<String>,
    pub negated_content_terms: Vec<String>,
}

fn query_error(message: impl Into<String>) -> StorageError {
    StorageError::SearchQuery(message.into())
}

/// Splits on whitespace outside double quotes; quotes stay in the tokens.
fn tokenize(text: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if quoted {
        return Err(query_error("unmatched quote"));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

fn unquote(value: &str) -> String {
    value.replace('"', "")
}

fn local_millis(naive: NaiveDateTime) -> Result<i64> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| query_error(format!("nonexistent local time {naive}")))
}

/// Parses an absolute (`YYYYMMDD[THHMMSS[Z]]`) or relative
/// (`day|week|month|year[-N]`) date into epoch milliseconds.
fn parse_datetime(value: &str, now: DateTime<Local>) -> Result<i64> {
    let lower = value.to_lowercase();
    let (unit, back) = match lower.split_once('-') {
        Some((unit, n)) => (
            unit,
            n.parse::<u32>()
                .map_err(|_| query_error(format!("invalid relative date {value}")))?,
        ),
        None => (lower.as_str(), 0),
    };

    let today = now.date_naive();
    let relative = match unit {
        "day" => Some(today - Duration::days(i64::from(back))),
        "week" => {
            let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            Some(monday - Duration::weeks(i64::from(back)))
        }
        "month" => today
            .with_day(1)
            .and_then(|first| first.checked_sub_months(Months::new(back))),
        "year" => NaiveDate::from_ymd_opt(today.year() - back as i32, 1, 1),
        _ => None,
    };
    if let Some(date) = relative {
        return local_millis(date.and_hms_opt(0, 0, 0).unwrap_or_default());
    }
    if matches!(unit, "day" | "week" | "month" | "year") {
        return Err(query_error(format!("invalid relative date {value}")));
    }

    if let Some(utc) = value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .map_err(|_| query_error(format!("invalid date {value}")))?;
        return Ok(Utc.from_utc_datetime(&naive).timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return local_millis(naive);
    }
    let date = NaiveDate::parse_from_str(value, "%Y%m%d")
        .map_err(|_| query_error(format!("invalid date {value}")))?;
    local_millis(date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn push_numeric<T>(
    filter: &mut NumericFilter<T>,
    value: &str,
    negated: bool,
    parse: impl FnOnce(&str) -> Result<T>,
) -> Result<()> {
    if value == "*" {
        if negated {
            filter.negated_any = true;
        } else {
            filter.any = true;
        }
        return Ok(());
    }
    let parsed = parse(value)?;
    if negated {
        filter.negated.push(parsed);
    } else {
        filter.values.push(parsed);
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| query_error(format!("invalid number {value}")))
}

impl NoteSearchQuery {
    /// Parses `text` with relative dates anchored at the current local time.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_at(text, Local::now())
    }

    /// Parses `text` with relative dates anchored at `now`.
    pub fn parse_at(text: &str, now: DateTime<Local>) -> Result<Self> {
        let mut query = NoteSearchQuery {
            text: text.to_string(),
            ..Self::default()
        };

        for token in tokenize(text)? {
            if token.eq_ignore_ascii_case("any:") {
                query.any = true;
                continue;
            }
            let (negated, body) = match token.strip_prefix('-') {
                Some(rest) if !rest.is_empty() => (true, rest),
                _ => (false, token.as_str()),
            };

            let Some((modifier, raw_value)) = body.split_once(':').filter(|(m, _)| !m.contains('"'))
            else {
                query.push_term(unquote(body), negated);
                continue;
            };
            let value = unquote(raw_value);
            let modifier = modifier.to_lowercase();
            if !query.apply_modifier(&modifier, &value, negated, now)? {
                query.push_term(unquote(body), negated);
            }
        }
        Ok(query)
    }

    fn push_term(&mut self, term: String, negated: bool) {
        if term.is_empty() {
            return;
        }
        if negated {
            self.negated_content_terms.push(term);
        } else {
            self.content_terms.push(term);
        }
    }

    /// Applies one `modifier:value` term; `Ok(false)` for unknown modifiers.
    fn apply_modifier(
        &mut self,
        modifier: &str,
        value: &str,
        negated: bool,
        now: DateTime<Local>,
    ) -> Result<bool> {
        let known = matches!(
            modifier,
            "notebook"
                | "tag"
                | "resource"
                | "created"
                | "updated"
                | "subjectdate"
                | "latitude"
                | "longitude"
                | "altitude"
                | "author"
                | "source"
                | "sourceapplication"
                | "contentclass"
                | "placename"
                | "applicationdata"
                | "reminderorder"
                | "remindertime"
                | "reminderdonetime"
                | "todo"
                | "encryption"
        );
        if !known {
            return Ok(false);
        }
        if value.is_empty() && modifier != "encryption" {
            return Err(query_error(format!("{modifier}: needs a value")));
        }

        let date = |v: &str| parse_datetime(v, now);
        match modifier {
            "notebook" => {
                if negated {
                    return Err(query_error("notebook: can't be negated"));
                }
                if self.notebook.is_some() {
                    return Err(query_error("only one notebook: is allowed"));
                }
                self.notebook = Some(value.to_string());
            }
            "tag" => self.tags.push(value.to_string(), negated),
            "resource" => self.resource_mimes.push(value.to_string(), negated),
            "created" => push_numeric(&mut self.created, value, negated, date)?,
            "updated" => push_numeric(&mut self.updated, value, negated, date)?,
            "subjectdate" => push_numeric(&mut self.subject_date, value, negated, date)?,
            "latitude" => push_numeric(&mut self.latitude, value, negated, parse_number)?,
            "longitude" => push_numeric(&mut self.longitude, value, negated, parse_number)?,
            "altitude" => push_numeric(&mut self.altitude, value, negated, parse_number)?,
            "author" => self.author.push(value.to_string(), negated),
            "source" => self.source.push(value.to_string(), negated),
            "sourceapplication" => self.source_application.push(value.to_string(), negated),
            "contentclass" => self.content_class.push(value.to_string(), negated),
            "placename" => self.place_name.push(value.to_string(), negated),
            "applicationdata" => self.application_data.push(value.to_string(), negated),
            "reminderorder" => push_numeric(&mut self.reminder_order, value, negated, parse_number)?,
            "remindertime" => push_numeric(&mut self.reminder_time, value, negated, date)?,
            "reminderdonetime" => {
                push_numeric(&mut self.reminder_done_time, value, negated, date)?
            }
            "todo" => {
                let slot = match value.to_lowercase().as_str() {
                    "true" => &mut self.finished_todo,
                    "false" => &mut self.unfinished_todo,
                    "*" => &mut self.any_todo,
                    other => return Err(query_error(format!("invalid todo: value {other}"))),
                };
                *slot = Some(!negated);
            }
            "encryption" => self.encryption = Some(!negated),
            _ => unreachable!("modifier list checked above"),
        }
        Ok(true)
    }

    /// `true` when the query carries no clause at all.
    pub fn is_empty(&self) -> bool {
        self.notebook.is_none()
            && self.tags.is_empty()
            && self.resource_mimes.is_empty()
            && self.created.is_empty()
            && self.updated.is_empty()
            && self.subject_date.is_empty()
            && self.latitude.is_empty()
            && self.longitude.is_empty()
            && self.altitude.is_empty()
            && self.author.is_empty()
            && self.source.is_empty()
            && self.source_application.is_empty()
            && self.content_class.is_empty()
            && self.place_name.is_empty()
            && self.application_data.is_empty()
            && self.reminder_order.is_empty()
            && self.reminder_time.is_empty()
            && self.reminder_done_time.is_empty()
            && self.finished_todo.is_none()
            && self.unfinished_todo.is_none()
            && self.any_todo.is_none()
            && self.encryption.is_none()
            && self.content_terms.is_empty()
            && self.negated_content_terms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).unwrap()
    }

    #[test]
    fn test_parse_modifiers_and_terms() {
        let q = NoteSearchQuery::parse_at(
            r#"notebook:"Work Stuff" tag:urgent -tag:done resource:image/* "exact phrase" -skip"#,
            now(),
        )
        .unwrap();
        assert_eq!(q.notebook.as_deref(), Some("Work Stuff"));
        assert_eq!(q.tags.values, vec!["urgent"]);
        assert_eq!(q.tags.negated, vec!["done"]);
        assert_eq!(q.resource_mimes.values, vec!["image/*"]);
        assert_eq!(q.content_terms, vec!["exact phrase"]);
        assert_eq!(q.negated_content_terms, vec!["skip"]);
        assert!(!q.any);
    }

    #[test]
    fn test_any_and_wildcards() {
        let q = NoteSearchQuery::parse_at("any: tag:* -resource:* TODO:true", now()).unwrap();
        assert!(q.any);
        assert!(q.tags.any);
        assert!(q.resource_mimes.negated_any);
        assert_eq!(q.finished_todo, Some(true));
    }

    #[test]
    fn test_negated_notebook_is_rejected() {
        assert!(matches!(
            NoteSearchQuery::parse_at("-notebook:x", now()),
            Err(StorageError::SearchQuery(_))
        ));
    }

    #[test]
    fn test_absolute_utc_date() {
        let q = NoteSearchQuery::parse_at("created:20240101T000000Z", now()).unwrap();
        assert_eq!(q.created.values, vec![1_704_067_200_000]);
    }

    #[test]
    fn test_relative_dates_go_back_in_whole_units() {
        let q = NoteSearchQuery::parse_at("created:day -updated:month-1", now()).unwrap();
        let midnight = Local.with_ymd_and_hms(2024, 3, 14, 0, 0, 0).unwrap();
        let feb_first = Local.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(q.created.values, vec![midnight.timestamp_millis()]);
        assert_eq!(q.updated.negated, vec![feb_first.timestamp_millis()]);
    }

    #[test]
    fn test_numeric_and_invalid_values() {
        let q = NoteSearchQuery::parse_at("latitude:45.5 -altitude:100", now()).unwrap();
        assert_eq!(q.latitude.values, vec![45.5]);
        assert_eq!(q.altitude.negated, vec![100.0]);
        assert!(NoteSearchQuery::parse_at("latitude:north", now()).is_err());
        assert!(NoteSearchQuery::parse_at("tag:", now()).is_err());
        assert!(NoteSearchQuery::parse_at("\"open", now()).is_err());
    }

    #[test]
    fn test_unknown_modifier_is_a_term() {
        let q = NoteSearchQuery::parse_at("http://example.com", now()).unwrap();
        assert_eq!(q.content_terms, vec!["http://example.com"]);
        assert!(NoteSearchQuery::parse_at("", now()).unwrap().is_empty());
    }
}
