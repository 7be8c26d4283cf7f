//! Minimal CREATE/ALTER TABLE tracking. Row events carry column types
//! but not names, so this keeps an evolving per-table column roster; it
//! parses only as much SQL as that requires.

use common::err::cdc_error::{CdcError, CdcResult};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

lazy_static! {
    static ref CREATE_TABLE: Regex = Regex::new(r"(?i)create[\w\s]+table").unwrap();
    static ref ALTER_TABLE: Regex = Regex::new(r"(?i)alter\s+table").unwrap();
}

pub fn is_create_table(sql: &str) -> bool {
    CREATE_TABLE.is_match(sql)
}

pub fn is_alter_table(sql: &str) -> bool {
    ALTER_TABLE.is_match(sql)
}

/// Keywords that start a constraint group inside CREATE TABLE, not a
/// column definition.
const CONSTRAINT_KEYWORDS: &[&str] = &[
    "PRIMARY",
    "UNIQUE",
    "KEY",
    "INDEX",
    "CONSTRAINT",
    "FOREIGN",
    "FULLTEXT",
    "SPATIAL",
    "CHECK",
];

/// The tracked definition of one table: its column names in source order
/// and the schema version they correspond to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCreate {
    pub database: String,
    pub table: String,
    pub columns: Vec<String>,
    pub version: u32,
    /// Set once a record has been written under the current version;
    /// gates the version bump on the next column-affecting ALTER.
    pub was_used: bool,
    /// The statement the roster was built from, for diagnostics.
    pub definition: String,
    pub gtid: String,
}

fn strip_quotes(token: &str) -> &str {
    token.trim_matches('`')
}

/// Scans one identifier forward: a backtick-quoted name (which may
/// contain spaces) or a bare token ending at whitespace, `.` or `(`.
/// Returns the identifier and the byte offset just past it.
fn scan_identifier(text: &str) -> Option<(String, usize)> {
    let text_trimmed = text.trim_start();
    let skipped = text.len() - text_trimmed.len();

    let mut chars = text_trimmed.char_indices();
    match chars.next()? {
        (_, '`') => {
            for (i, c) in chars {
                if c == '`' {
                    return Some((text_trimmed[1..i].to_string(), skipped + i + 1));
                }
            }
            None
        }
        _ => {
            let end = text_trimmed
                .find(|c: char| c.is_whitespace() || c == '.' || c == '(' || c == ',')
                .unwrap_or(text_trimmed.len());
            if end == 0 {
                return None;
            }
            Some((text_trimmed[..end].to_string(), skipped + end))
        }
    }
}

/// Scans the trailing identifier of `text` backwards, returning the name
/// and the byte offset where it (or its opening backtick) starts.
fn rscan_identifier(text: &str) -> Option<(String, usize)> {
    let trimmed = text.trim_end();
    if let Some(without_close) = trimmed.strip_suffix('`') {
        let open = without_close.rfind('`')?;
        Some((without_close[open + 1..].to_string(), open))
    } else {
        let start = trimmed
            .rfind(|c: char| c.is_ascii_whitespace() || c == '.')
            .map(|i| i + 1)
            .unwrap_or(0);
        if start >= trimmed.len() {
            return None;
        }
        Some((trimmed[start..].to_string(), start))
    }
}

/// Parses `name` or `db`.`name`, returning the parts and the offset past
/// the reference.
fn scan_table_reference(text: &str) -> Option<(Option<String>, String, usize)> {
    let (first, mut consumed) = scan_identifier(text)?;
    let rest = &text[consumed..];
    if let Some(stripped) = rest.strip_prefix('.') {
        consumed += 1;
        let (second, more) = scan_identifier(stripped)?;
        Some((Some(first), second, consumed + more))
    } else {
        Some((None, first, consumed))
    }
}

/// Splits `text` at top-level commas, ignoring commas nested inside
/// parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                groups.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    groups.push(&text[start..]);
    groups
}

fn tokens(clause: &str) -> Vec<&str> {
    clause.split_whitespace().collect()
}

impl TableCreate {
    /// Builds a roster from a CREATE TABLE statement. The column type text
    /// is ignored; Avro types derive from the table-map event.
    pub fn from_sql(default_db: &str, sql: &str, gtid: &str) -> CdcResult<Self> {
        let open = sql
            .find('(')
            .ok_or_else(|| CdcError::sql(format!("CREATE TABLE without a column list: {}", sql)))?;

        // The table reference is the last identifier before the opening
        // parenthesis, scanned backwards so quoted names may contain
        // anything.
        let head = sql[..open].trim_end();
        let (table, table_start) = rscan_identifier(head)
            .ok_or_else(|| CdcError::sql(format!("unparsable table name in: {}", sql)))?;
        let qualifier = head[..table_start].trim_end();
        let database = if let Some(stripped) = qualifier.strip_suffix('.') {
            let (db, _) = rscan_identifier(stripped)
                .ok_or_else(|| CdcError::sql(format!("unparsable database name in: {}", sql)))?;
            Some(db)
        } else {
            None
        };

        // Find the matching close of the outer parenthesis.
        let mut depth = 0usize;
        let mut close = sql.len();
        for (i, c) in sql[open..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        close = open + i;
                        break;
                    }
                }
                _ => {}
            }
        }

        let mut columns = Vec::new();
        for group in split_top_level(&sql[open + 1..close]) {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            let first = match scan_identifier(group) {
                Some((name, _)) => name,
                None => continue,
            };
            if CONSTRAINT_KEYWORDS
                .iter()
                .any(|k| first.eq_ignore_ascii_case(k))
            {
                continue;
            }
            columns.push(first);
        }

        if columns.is_empty() {
            return Err(CdcError::sql(format!("CREATE TABLE without columns: {}", sql)));
        }

        Ok(TableCreate {
            database: database.unwrap_or_else(|| default_db.to_string()),
            table,
            columns,
            version: 1,
            was_used: false,
            definition: sql.to_string(),
            gtid: gtid.to_string(),
        })
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Applies the column-affecting clauses of an ALTER TABLE statement.
    ///
    /// DROP and CHANGE target their named column when it is tracked and
    /// fall back to the last column otherwise. Returns true when the
    /// roster changed; a change after a written record bumps the version.
    pub fn apply_alter(&mut self, sql: &str) -> CdcResult<bool> {
        let matched = ALTER_TABLE
            .find(sql)
            .ok_or_else(|| CdcError::sql(format!("not an ALTER TABLE statement: {}", sql)))?;
        let after_keyword = &sql[matched.end()..];
        let (_, _, consumed) = scan_table_reference(after_keyword)
            .ok_or_else(|| CdcError::sql(format!("unparsable ALTER TABLE target: {}", sql)))?;

        let mut changed = false;
        for clause in split_top_level(&after_keyword[consumed..]) {
            let words = tokens(clause);
            if words.is_empty() {
                continue;
            }
            let mut rest = &words[1..];
            if rest
                .first()
                .map(|w| w.eq_ignore_ascii_case("COLUMN"))
                .unwrap_or(false)
            {
                rest = &rest[1..];
            }

            if words[0].eq_ignore_ascii_case("ADD") {
                if let Some(&name) = rest.first() {
                    let name = strip_quotes(name);
                    // ADD INDEX and friends are not column changes.
                    if CONSTRAINT_KEYWORDS.iter().any(|k| name.eq_ignore_ascii_case(k)) {
                        continue;
                    }
                    self.columns.push(name.to_string());
                    changed = true;
                }
            } else if words[0].eq_ignore_ascii_case("DROP") {
                if let Some(&name) = rest.first() {
                    let name = strip_quotes(name);
                    if CONSTRAINT_KEYWORDS.iter().any(|k| name.eq_ignore_ascii_case(k))
                        || self.columns.is_empty()
                    {
                        continue;
                    }
                    let index = self
                        .position_of(name)
                        .unwrap_or_else(|| self.columns.len() - 1);
                    self.columns.remove(index);
                    changed = true;
                }
            } else if words[0].eq_ignore_ascii_case("CHANGE") {
                if let (Some(&old), Some(&new)) = (rest.first(), rest.get(1)) {
                    if self.columns.is_empty() {
                        continue;
                    }
                    let old = strip_quotes(old);
                    let new = strip_quotes(new);
                    let index = self
                        .position_of(old)
                        .unwrap_or_else(|| self.columns.len() - 1);
                    self.columns[index] = new.to_string();
                    changed = true;
                }
            } else {
                debug!(clause = clause.trim(), "ignoring ALTER clause");
            }
        }

        if changed && self.was_used {
            self.version += 1;
            self.was_used = false;
        }
        Ok(changed)
    }

    pub fn mark_used(&mut self) {
        self.was_used = true;
    }
}

/// Extracts the target table of an ALTER TABLE statement for routing.
pub fn alter_target(default_db: &str, sql: &str) -> Option<(String, String)> {
    let matched = ALTER_TABLE.find(sql)?;
    let (database, table, _) = scan_table_reference(&sql[matched.end()..])?;
    Some((database.unwrap_or_else(|| default_db.to_string()), table))
}
