//! Compiles a [`NoteSearchQuery`] into one SQL statement selecting note
//! local ids.
//!
//! Every clause becomes a boolean fragment over `Notes`, usually a
//! membership test against a sub-select on the tag links, the resources or
//! one of the full-text shadow tables. The fragments are joined with the
//! query's uniting operator and wrapped in a single `SELECT DISTINCT`.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use super::query::{NoteSearchQuery, NumericFilter, TextFilter};
use crate::core::error::{Context, Result, StorageError};
use crate::core::model::{GetNoteOptions, ListParams, Note, NoteOrder};
use crate::core::repo::Repo;
use crate::core::text::normalize_search_term;

/// SQL text plus its positional parameters, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Default)]
struct Fragments {
    parts: Vec<String>,
    params: Vec<Value>,
}

impl Fragments {
    fn push(&mut self, sql: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.parts.push(sql.into());
        self.params.extend(params);
    }

    fn joined(&self, any: bool) -> String {
        let op = if any { " OR " } else { " AND " };
        self.parts
            .iter()
            .map(|p| format!("({p})"))
            .collect::<Vec<_>>()
            .join(op)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Turns a user value with `*` wildcards into an escaped `LIKE` pattern.
fn like_pattern(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push('%'),
            c => out.push(c),
        }
    }
    out
}

/// Full-text `MATCH` handles plain words and prefix queries only.
fn can_use_match(term: &str) -> bool {
    !term.contains(char::is_whitespace)
        && term
            .trim_end_matches('*')
            .find('*')
            .is_none()
}

fn content_fragment(term: &str) -> (String, Vec<Value>) {
    if can_use_match(term) {
        let sql = "Notes.localUid IN (SELECT localUid FROM NoteFTS WHERE titleNormalized MATCH ?) \
                   OR Notes.localUid IN (SELECT localUid FROM NoteFTS WHERE contentListOfWords MATCH ?) \
                   OR Notes.localUid IN (SELECT noteLocalUid FROM ResourceRecognitionDataFTS \
                   WHERE recognitionData MATCH ?) \
                   OR Notes.localUid IN (SELECT localNote FROM NoteTags WHERE localTag IN \
                   (SELECT localUid FROM TagFTS WHERE nameLower MATCH ?))";
        (sql.to_string(), vec![Value::Text(term.to_string()); 4])
    } else {
        let pattern = format!("%{}%", like_pattern(term));
        let sql = "COALESCE(Notes.titleNormalized, '') LIKE ? ESCAPE '\\' \
                   OR COALESCE(Notes.contentPlainText, '') LIKE ? ESCAPE '\\' \
                   OR Notes.localUid IN (SELECT noteLocalUid FROM ResourceRecognitionData \
                   WHERE recognitionData LIKE ? ESCAPE '\\') \
                   OR Notes.localUid IN (SELECT localNote FROM NoteTags WHERE localTag IN \
                   (SELECT localUid FROM Tags WHERE nameLower LIKE ? ESCAPE '\\'))";
        (sql.to_string(), vec![Value::Text(pattern); 4])
    }
}

fn text_column_fragments(out: &mut Fragments, column: &str, filter: &TextFilter) {
    for value in &filter.values {
        out.push(
            format!("Notes.{column} LIKE ? ESCAPE '\\'"),
            [Value::Text(like_pattern(value))],
        );
    }
    for value in &filter.negated {
        out.push(
            format!("Notes.{column} IS NULL OR Notes.{column} NOT LIKE ? ESCAPE '\\'"),
            [Value::Text(like_pattern(value))],
        );
    }
    if filter.any {
        out.push(format!("Notes.{column} IS NOT NULL"), []);
    }
    if filter.negated_any {
        out.push(format!("Notes.{column} IS NULL"), []);
    }
}

/// Reduces a list of thresholds to one comparison per direction: under
/// `any` the largest `>=` and the smallest `<` threshold are kept, otherwise
/// the opposite extremum.
fn numeric_fragments<T>(out: &mut Fragments, column: &str, filter: &NumericFilter<T>, any: bool)
where
    T: Copy + PartialOrd + Into<Value>,
{
    let pick = |values: &[T], take_max: bool| {
        values.iter().copied().reduce(|a, b| {
            let b_wins = if take_max { b > a } else { b < a };
            if b_wins {
                b
            } else {
                a
            }
        })
    };
    if let Some(v) = pick(&filter.values, any) {
        out.push(format!("Notes.{column} >= ?"), [v.into()]);
    }
    if let Some(v) = pick(&filter.negated, !any) {
        out.push(format!("Notes.{column} < ?"), [v.into()]);
    }
    if filter.any {
        out.push(format!("Notes.{column} IS NOT NULL"), []);
    }
    if filter.negated_any {
        out.push(format!("Notes.{column} IS NULL"), []);
    }
}

fn flag_fragment(out: &mut Fragments, column: &str, wanted: Option<bool>) {
    if let Some(on) = wanted {
        out.push(format!("Notes.{column} = {}", i32::from(on)), []);
    }
}

/// Local ids of the notebooks named `name`, across all linked notebooks.
fn resolve_notebook(conn: &Connection, name: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare_cached("SELECT localUid FROM Notebooks WHERE nameLower = ?1")
        .context("can't resolve notebook name")?;
    let ids = stmt
        .query_map([name.to_lowercase()], |row| row.get::<_, String>(0))
        .context("can't resolve notebook name")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("can't resolve notebook name")?;
    if ids.is_empty() {
        return Err(StorageError::not_found("Notebook", name));
    }
    Ok(ids)
}

/// Resolves each tag name to the local ids carrying it, one group per name.
///
/// A name can resolve to several tags: the own account and every linked
/// notebook keep separate namespaces. `strict` turns an unknown name into
/// `NotFound`, otherwise it is skipped.
fn resolve_tags(repo: &Repo<'_>, names: &[String], strict: bool) -> Result<Vec<Vec<String>>> {
    let mut groups = Vec::new();
    for name in names {
        let found = repo.tag_local_ids_by_names(std::slice::from_ref(name))?;
        if found.is_empty() {
            if strict {
                return Err(StorageError::not_found("Tag", name.as_str()));
            }
            continue;
        }
        groups.push(found);
    }
    Ok(groups)
}

fn tagged_with(ids: &[String]) -> String {
    format!(
        "Notes.localUid IN (SELECT localNote FROM NoteTags WHERE localTag IN ({}))",
        placeholders(ids.len())
    )
}

fn tag_values(ids: Vec<String>) -> impl Iterator<Item = Value> {
    ids.into_iter().map(Value::Text)
}

fn tag_fragments(repo: &Repo<'_>, out: &mut Fragments, tags: &TextFilter, any: bool) -> Result<()> {
    if !tags.values.is_empty() {
        let groups = resolve_tags(repo, &tags.values, true)?;
        if any {
            let mut ids: Vec<String> = groups.into_iter().flatten().collect();
            ids.sort();
            ids.dedup();
            out.push(tagged_with(&ids), tag_values(ids));
        } else {
            // One membership test per name: any tag carrying the name counts.
            for ids in groups {
                out.push(tagged_with(&ids), tag_values(ids));
            }
        }
    }
    if !tags.negated.is_empty() {
        let groups = resolve_tags(repo, &tags.negated, false)?;
        if any {
            // Under "any" a note only has to miss one of the names.
            for ids in groups {
                out.push(format!("NOT ({})", tagged_with(&ids)), tag_values(ids));
            }
        } else if !groups.is_empty() {
            let mut ids: Vec<String> = groups.into_iter().flatten().collect();
            ids.sort();
            ids.dedup();
            out.push(format!("NOT ({})", tagged_with(&ids)), tag_values(ids));
        }
    }
    if tags.any {
        out.push("NoteTags.localTag IS NOT NULL", []);
    }
    if tags.negated_any {
        out.push("NoteTags.localTag IS NULL", []);
    }
    Ok(())
}

fn resource_fragments(out: &mut Fragments, mimes: &TextFilter) {
    for mime in &mimes.values {
        out.push(
            "Notes.localUid IN (SELECT noteLocalUid FROM Resources WHERE mime LIKE ? ESCAPE '\\')",
            [Value::Text(like_pattern(mime))],
        );
    }
    for mime in &mimes.negated {
        out.push(
            "Notes.localUid NOT IN (SELECT noteLocalUid FROM Resources WHERE mime LIKE ? ESCAPE '\\')",
            [Value::Text(like_pattern(mime))],
        );
    }
    if mimes.any {
        out.push("Resources.mime IS NOT NULL", []);
    }
    if mimes.negated_any {
        out.push("Resources.mime IS NULL", []);
    }
}

fn application_data_fragments(out: &mut Fragments, filter: &TextFilter) {
    const KEYS: &str = "SELECT noteLocalUid FROM NoteApplicationDataKeysOnly WHERE key LIKE ? ESCAPE '\\' \
                        UNION SELECT noteLocalUid FROM NoteApplicationDataFullMap WHERE key LIKE ? ESCAPE '\\'";
    for key in &filter.values {
        let pattern = Value::Text(like_pattern(key));
        out.push(format!("Notes.localUid IN ({KEYS})"), [pattern.clone(), pattern]);
    }
    for key in &filter.negated {
        let pattern = Value::Text(like_pattern(key));
        out.push(format!("Notes.localUid NOT IN ({KEYS})"), [pattern.clone(), pattern]);
    }
    if filter.any {
        out.push("Notes.hasApplicationData = 1", []);
    }
    if filter.negated_any {
        out.push("Notes.hasApplicationData = 0", []);
    }
}

fn todo_fragments(out: &mut Fragments, query: &NoteSearchQuery) {
    flag_fragment(out, "contentContainsFinishedToDo", query.finished_todo);
    flag_fragment(out, "contentContainsUnfinishedToDo", query.unfinished_todo);
    match query.any_todo {
        Some(true) => out.push(
            "Notes.contentContainsFinishedToDo = 1 OR Notes.contentContainsUnfinishedToDo = 1",
            [],
        ),
        Some(false) => out.push(
            "Notes.contentContainsFinishedToDo = 0 AND Notes.contentContainsUnfinishedToDo = 0",
            [],
        ),
        None => {}
    }
}

/// Compiles `query`; `Ok(None)` when the query has no clause.
///
/// Fails with `NotFound` when the notebook or a required tag doesn't exist.
pub(crate) fn compile_note_search(repo: &Repo<'_>, query: &NoteSearchQuery) -> Result<Option<CompiledQuery>> {
    if query.is_empty() {
        return Ok(None);
    }

    let mut out = Fragments::default();
    tag_fragments(repo, &mut out, &query.tags, query.any)?;
    resource_fragments(&mut out, &query.resource_mimes);

    numeric_fragments(&mut out, "creationTimestamp", &query.created, query.any);
    numeric_fragments(&mut out, "modificationTimestamp", &query.updated, query.any);
    numeric_fragments(&mut out, "subjectDate", &query.subject_date, query.any);
    numeric_fragments(&mut out, "latitude", &query.latitude, query.any);
    numeric_fragments(&mut out, "longitude", &query.longitude, query.any);
    numeric_fragments(&mut out, "altitude", &query.altitude, query.any);
    numeric_fragments(&mut out, "reminderOrder", &query.reminder_order, query.any);
    numeric_fragments(&mut out, "reminderTime", &query.reminder_time, query.any);
    numeric_fragments(&mut out, "reminderDoneTime", &query.reminder_done_time, query.any);

    text_column_fragments(&mut out, "author", &query.author);
    text_column_fragments(&mut out, "source", &query.source);
    text_column_fragments(&mut out, "sourceApplication", &query.source_application);
    text_column_fragments(&mut out, "contentClass", &query.content_class);
    text_column_fragments(&mut out, "placeName", &query.place_name);
    application_data_fragments(&mut out, &query.application_data);

    todo_fragments(&mut out, query);
    flag_fragment(&mut out, "contentContainsEncryption", query.encryption);

    for term in &query.content_terms {
        let term = normalize_search_term(term);
        if !term.is_empty() {
            let (sql, params) = content_fragment(&term);
            out.push(sql, params);
        }
    }
    for term in &query.negated_content_terms {
        let term = normalize_search_term(term);
        if !term.is_empty() {
            let (sql, params) = content_fragment(&term);
            out.push(format!("NOT ({sql})"), params);
        }
    }

    let mut condition = out.joined(query.any);
    let mut params = Vec::new();
    if let Some(name) = &query.notebook {
        let ids = resolve_notebook(repo.conn, name)?;
        let notebook = format!("Notes.notebookLocalUid IN ({})", placeholders(ids.len()));
        condition = if condition.is_empty() {
            notebook
        } else {
            format!("{notebook} AND ({condition})")
        };
        params.extend(ids.into_iter().map(Value::Text));
    }
    params.extend(out.params);

    if condition.is_empty() {
        return Ok(None);
    }

    let mut sql = String::from("SELECT DISTINCT Notes.localUid FROM Notes");
    if condition.contains("NoteTags.") {
        sql.push_str(" LEFT OUTER JOIN NoteTags ON Notes.localUid = NoteTags.localNote");
    }
    if condition.contains("Resources.") {
        sql.push_str(" LEFT OUTER JOIN Resources ON Notes.localUid = Resources.noteLocalUid");
    }
    sql.push_str(" WHERE (");
    sql.push_str(&condition);
    sql.push(')');

    Ok(Some(CompiledQuery { sql, params }))
}

impl Repo<'_> {
    /// Local ids of the notes matching `query`, in no particular order.
    pub fn find_note_local_ids_with_search_query(&self, query: &NoteSearchQuery) -> Result<Vec<String>> {
        let Some(compiled) = compile_note_search(self, query)? else {
            return Ok(Vec::new());
        };
        let mut stmt = self
            .conn
            .prepare(&compiled.sql)
            .context("can't prepare note search")?;
        let ids = stmt
            .query_map(params_from_iter(compiled.params.iter()), |row| row.get(0))
            .context("can't run note search")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("can't run note search")?;
        Ok(ids)
    }

    /// Notes matching `query`, listed with `params`.
    pub fn find_notes_with_search_query(
        &self,
        query: &NoteSearchQuery,
        params: &ListParams<NoteOrder>,
        options: GetNoteOptions,
    ) -> Result<Vec<Note>> {
        let Some(compiled) = compile_note_search(self, query)? else {
            return Ok(Vec::new());
        };
        let clause = format!("localUid IN ({})", compiled.sql);
        self.list_notes(params, options, Some((&clause, compiled.params)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blob_store::{BlobStore, StagedPayloads};
    use crate::core::schema::SchemaManager;
    use crate::core::statements::StatementCache;
    use tempfile::TempDir;

    struct Fixture {
        conn: Connection,
        stmts: StatementCache,
        blobs: BlobStore,
        staged: StagedPayloads,
        _dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let conn = Connection::open_in_memory().unwrap();
            SchemaManager::new(&conn).ensure_schema().unwrap();
            conn.execute_batch(
                "INSERT INTO Tags(localUid, name, nameLower, isDirty, isLocal) VALUES('t1', 'Work', 'work', 0, 0);
                 INSERT INTO Tags(localUid, name, nameLower, isDirty, isLocal) VALUES('t2', 'Urgent', 'urgent', 0, 0);
                 INSERT INTO Notebooks(localUid, name, nameLower, isDirty, isLocal) VALUES('nb', 'Inbox', 'inbox', 0, 0);",
            )
            .unwrap();
            let stmts = StatementCache::new(&conn, 16);
            let blobs = BlobStore::new(dir.path());
            Fixture {
                conn,
                stmts,
                blobs,
                staged: StagedPayloads::default(),
                _dir: dir,
            }
        }

        fn repo(&self) -> Repo<'_> {
            Repo {
                conn: &self.conn,
                stmts: &self.stmts,
                blobs: &self.blobs,
                staged: &self.staged,
            }
        }

        fn compile(&self, text: &str) -> Result<Option<CompiledQuery>> {
            compile_note_search(&self.repo(), &NoteSearchQuery::parse(text).unwrap())
        }
    }

    #[test]
    fn test_empty_query_compiles_to_nothing() {
        let f = Fixture::new();
        assert!(f.compile("").unwrap().is_none());
        assert!(f.repo().find_note_local_ids_with_search_query(&NoteSearchQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn test_tags_require_all_unless_any() {
        let f = Fixture::new();
        let all = f.compile("tag:work tag:urgent").unwrap().unwrap();
        assert!(all.sql.contains(") AND ("));
        assert_eq!(all.params.len(), 2);

        let any = f.compile("any: tag:work tag:urgent").unwrap().unwrap();
        assert!(!any.sql.contains(" AND "));
        assert_eq!(any.params.len(), 2);
    }

    #[test]
    fn test_same_named_tag_in_linked_notebook_still_matches() {
        let f = Fixture::new();
        f.conn
            .execute_batch(
                "INSERT INTO LinkedNotebooks(guid, isDirty) VALUES('ln', 0);
                 INSERT INTO Tags(localUid, name, nameLower, linkedNotebookGuid, isDirty, isLocal)
                     VALUES('t3', 'work', 'work', 'ln', 0, 0);
                 INSERT INTO Notes(localUid, notebookLocalUid, isDirty, isLocal) VALUES('n1', 'nb', 0, 0);
                 INSERT INTO Notes(localUid, notebookLocalUid, isDirty, isLocal) VALUES('n2', 'nb', 0, 0);
                 INSERT INTO NoteTags(localNote, localTag) VALUES('n1', 't1');
                 INSERT INTO NoteTags(localNote, localTag) VALUES('n1', 't2');
                 INSERT INTO NoteTags(localNote, localTag) VALUES('n2', 't3');",
            )
            .unwrap();
        let search = |text: &str| {
            let mut ids = f
                .repo()
                .find_note_local_ids_with_search_query(&NoteSearchQuery::parse(text).unwrap())
                .unwrap();
            ids.sort();
            ids
        };

        assert_eq!(search("tag:work tag:urgent"), vec!["n1".to_string()]);
        assert_eq!(search("tag:work"), vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(search("any: tag:work tag:urgent"), vec!["n1".to_string(), "n2".to_string()]);
        assert!(search("-tag:work").is_empty());
    }

    #[test]
    fn test_negated_tags_under_any_need_one_miss() {
        let f = Fixture::new();
        f.conn
            .execute_batch(
                "INSERT INTO Notes(localUid, notebookLocalUid, isDirty, isLocal) VALUES('both', 'nb', 0, 0);
                 INSERT INTO Notes(localUid, notebookLocalUid, isDirty, isLocal) VALUES('one', 'nb', 0, 0);
                 INSERT INTO Notes(localUid, notebookLocalUid, isDirty, isLocal) VALUES('none', 'nb', 0, 0);
                 INSERT INTO NoteTags(localNote, localTag) VALUES('both', 't1');
                 INSERT INTO NoteTags(localNote, localTag) VALUES('both', 't2');
                 INSERT INTO NoteTags(localNote, localTag) VALUES('one', 't1');",
            )
            .unwrap();
        let search = |text: &str| {
            let mut ids = f
                .repo()
                .find_note_local_ids_with_search_query(&NoteSearchQuery::parse(text).unwrap())
                .unwrap();
            ids.sort();
            ids
        };

        assert_eq!(search("-tag:work -tag:urgent"), vec!["none".to_string()]);
        assert_eq!(
            search("any: -tag:work -tag:urgent"),
            vec!["none".to_string(), "one".to_string()]
        );
    }

    #[test]
    fn test_unknown_tag_and_notebook_are_not_found() {
        let f = Fixture::new();
        assert!(f.compile("tag:missing").unwrap_err().is_not_found());
        assert!(f.compile("notebook:missing").unwrap_err().is_not_found());
        // Negated unknown tags simply can't exclude anything.
        assert!(f.compile("-tag:missing").unwrap().is_none());
    }

    #[test]
    fn test_joins_only_when_referenced() {
        let f = Fixture::new();
        let plain = f.compile("tag:work").unwrap().unwrap();
        assert!(!plain.sql.contains("JOIN"));

        let wildcard = f.compile("tag:* -resource:*").unwrap().unwrap();
        assert!(wildcard.sql.contains("LEFT OUTER JOIN NoteTags"));
        assert!(wildcard.sql.contains("LEFT OUTER JOIN Resources"));
    }

    #[test]
    fn test_match_or_like_by_term_shape() {
        let f = Fixture::new();
        let prefix = f.compile("meet*").unwrap().unwrap();
        assert!(prefix.sql.contains("MATCH"));
        assert_eq!(prefix.params[0], Value::Text("meet*".into()));

        let phrase = f.compile("\"team meeting\"").unwrap().unwrap();
        assert!(!phrase.sql.contains("MATCH"));
        assert_eq!(phrase.params[0], Value::Text("%team meeting%".into()));

        let interior = f.compile("te*am").unwrap().unwrap();
        assert!(interior.sql.contains("LIKE"));
    }

    #[test]
    fn test_notebook_is_always_anded() {
        let f = Fixture::new();
        let q = f.compile("any: notebook:Inbox author:me author:you").unwrap().unwrap();
        assert!(q.sql.contains("Notes.notebookLocalUid IN (?) AND ("));
        assert!(q.sql.contains(") OR ("));
        assert_eq!(q.params[0], Value::Text("nb".into()));
    }

    #[test]
    fn test_numeric_thresholds_collapse() {
        let f = Fixture::new();
        let all = f.compile("latitude:10 latitude:20").unwrap().unwrap();
        assert_eq!(all.params, vec![Value::Real(10.0)]);
        let any = f.compile("any: latitude:10 latitude:20").unwrap().unwrap();
        assert_eq!(any.params, vec![Value::Real(20.0)]);

        let negated = f.compile("-latitude:10 -latitude:20").unwrap().unwrap();
        assert_eq!(negated.params, vec![Value::Real(20.0)]);
        let negated_any = f.compile("any: -latitude:10 -latitude:20").unwrap().unwrap();
        assert_eq!(negated_any.params, vec![Value::Real(10.0)]);
    }

    #[test]
    fn test_like_pattern_escapes() {
        assert_eq!(like_pattern("50%_off*"), "50\\%\\_off%");
        assert!(can_use_match("word*"));
        assert!(!can_use_match("*word"));
    }
}
