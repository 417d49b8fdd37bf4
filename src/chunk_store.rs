use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::types::{ChunkKind, CodeChunk, FileRecord, IndexStatistics, InfoSnippet};

// ---------------------------------------------------------------------------
// ChunkStore — the relational half of the dual store.
//
// SQLite with two FTS5 external-content tables (code chunks and prose
// snippets) kept in sync by triggers. All mutation for one file happens in
// one transaction: readers never observe a partially-replaced file.
//
// BM25 ranking comes from SQLite's bm25() with default parameters; ordering
// is stable across runs with ascending chunk id as the tie-break.
// ---------------------------------------------------------------------------

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    seq INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    symbols TEXT NOT NULL,
    refs TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    doc_comment TEXT,
    signature TEXT,
    breadcrumb TEXT,
    token_count INTEGER NOT NULL DEFAULT 0,
    language TEXT NOT NULL DEFAULT '',
    description TEXT,
    created_at INTEGER NOT NULL,
    UNIQUE(path, start_line, end_line, kind)
);

CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);
CREATE INDEX IF NOT EXISTS idx_chunks_content_hash ON chunks(content_hash);

CREATE TABLE IF NOT EXISTS chunk_symbols (
    chunk_id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    PRIMARY KEY (chunk_id, symbol)
);

CREATE INDEX IF NOT EXISTS idx_chunk_symbols_symbol ON chunk_symbols(symbol);

CREATE TABLE IF NOT EXISTS snippets (
    seq INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    title TEXT NOT NULL,
    breadcrumb TEXT,
    chunk_id TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snippets_path ON snippets(path);

CREATE TABLE IF NOT EXISTS file_records (
    path TEXT PRIMARY KEY,
    file_hash TEXT NOT NULL,
    indexed_at INTEGER NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
    content,
    symbols,
    doc_comment,
    signature,
    description,
    content=chunks,
    content_rowid=seq
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunk_fts(rowid, content, symbols, doc_comment, signature, description)
    VALUES (new.seq, new.content, new.symbols, new.doc_comment, new.signature, new.description);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunk_fts(chunk_fts, rowid, content, symbols, doc_comment, signature, description)
    VALUES ('delete', old.seq, old.content, old.symbols, old.doc_comment, old.signature, old.description);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS snippet_fts USING fts5(
    content,
    title,
    content=snippets,
    content_rowid=seq
);

CREATE TRIGGER IF NOT EXISTS snippets_ai AFTER INSERT ON snippets BEGIN
    INSERT INTO snippet_fts(rowid, content, title)
    VALUES (new.seq, new.content, new.title);
END;

CREATE TRIGGER IF NOT EXISTS snippets_ad AFTER DELETE ON snippets BEGIN
    INSERT INTO snippet_fts(snippet_fts, rowid, content, title)
    VALUES ('delete', old.seq, old.content, old.title);
END;
"#;

/// Metadata filters pushed into the BM25 SQL query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Lowercase extensions without dot; any match admits the chunk.
    pub extensions: Option<Vec<String>>,
    /// SQLite GLOB pattern over the repo-relative path.
    pub path_glob: Option<String>,
    pub kinds: Option<Vec<ChunkKind>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.extensions.is_none() && self.path_glob.is_none() && self.kinds.is_none()
    }

    /// Apply the same predicate in memory (used to filter k-NN candidates
    /// that the vector store cannot filter itself).
    pub fn admits(&self, chunk: &CodeChunk) -> bool {
        if let Some(exts) = &self.extensions {
            let ext = Path::new(&chunk.path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if !exts.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
                return false;
            }
        }
        if let Some(glob) = &self.path_glob {
            if !glob_match(glob, &chunk.path) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&chunk.kind) {
                return false;
            }
        }
        true
    }
}

/// Minimal glob (`*`, `?`) matcher mirroring SQLite GLOB semantics, so the
/// in-memory filter agrees with the SQL-side one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    fn rec(p: &[char], t: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('*') => {
                for skip in 0..=t.len() {
                    if rec(&p[1..], &t[skip..]) {
                        return true;
                    }
                }
                false
            }
            Some('?') => !t.is_empty() && rec(&p[1..], &t[1..]),
            Some(c) => t.first() == Some(c) && rec(&p[1..], &t[1..]),
        }
    }
    rec(&p, &t)
}

/// One keyword hit: `(chunk id, bm25 score, 1-based rank)`.
pub type Bm25Hit = (String, f64, usize);

pub struct ChunkStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl ChunkStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a writer panicked mid-borrow; the rusqlite
        // transaction it held has already rolled back, so the connection is
        // safe to reuse.
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ── File-level transactions ─────────────────────────────────────────────

    /// Atomically replace everything stored for `path`: prior chunk rows,
    /// symbol rows, snippet rows and FTS entries go; the new rows come in.
    /// Passing `file_hash` also writes the FileRecord inside the same
    /// transaction.
    pub fn replace_file(
        &self,
        path: &str,
        chunks: &[CodeChunk],
        snippets: &[InfoSnippet],
        file_hash: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        delete_file_rows(&tx, path)?;

        {
            let mut insert_chunk = tx.prepare(
                "INSERT INTO chunks (id, path, start_line, end_line, kind, content, symbols, refs,
                                     file_hash, content_hash, doc_comment, signature, breadcrumb,
                                     token_count, language, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            )?;
            let mut insert_symbol =
                tx.prepare("INSERT OR IGNORE INTO chunk_symbols (chunk_id, symbol) VALUES (?1, ?2)")?;

            for c in chunks {
                insert_chunk.execute(params![
                    c.id,
                    c.path,
                    c.start_line,
                    c.end_line,
                    c.kind.as_str(),
                    c.content,
                    serde_json::to_string(&c.symbols).unwrap_or_else(|_| "[]".into()),
                    serde_json::to_string(&c.references).unwrap_or_else(|_| "[]".into()),
                    c.file_hash,
                    c.content_hash,
                    c.doc_comment,
                    c.signature,
                    c.breadcrumb,
                    c.token_count,
                    c.language,
                    c.generated_description,
                    c.created_at.timestamp(),
                ])?;
                for s in &c.symbols {
                    insert_symbol.execute(params![c.id, s])?;
                }
            }

            let mut insert_snippet = tx.prepare(
                "INSERT INTO snippets (id, path, content, start_line, end_line, title, breadcrumb,
                                       chunk_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for s in snippets {
                insert_snippet.execute(params![
                    s.id,
                    s.path,
                    s.content,
                    s.start_line,
                    s.end_line,
                    s.title,
                    s.breadcrumb,
                    s.chunk_id,
                    s.created_at.timestamp(),
                ])?;
            }
        }

        if let Some(hash) = file_hash {
            tx.execute(
                "INSERT INTO file_records (path, file_hash, indexed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET file_hash = ?2, indexed_at = ?3",
                params![path, hash, Utc::now().timestamp()],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn put_file(&self, path: &str, chunks: &[CodeChunk], snippets: &[InfoSnippet]) -> Result<()> {
        self.replace_file(path, chunks, snippets, None)
    }

    /// Replace only the snippet rows for `path`, leaving chunks untouched.
    pub fn replace_snippets(&self, path: &str, snippets: &[InfoSnippet]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM snippets WHERE path = ?1", params![path])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO snippets (id, path, content, start_line, end_line, title, breadcrumb,
                                       chunk_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for s in snippets {
                insert.execute(params![
                    s.id,
                    s.path,
                    s.content,
                    s.start_line,
                    s.end_line,
                    s.title,
                    s.breadcrumb,
                    s.chunk_id,
                    s.created_at.timestamp(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Atomic delete of all rows and FTS entries for `path`.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        delete_file_rows(&tx, path)?;
        tx.execute("DELETE FROM file_records WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<Option<CodeChunk>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("{CHUNK_SELECT} WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], row_to_chunk)?;
        match rows.next() {
            Some(r) => Ok(Some(r?)),
            None => Ok(None),
        }
    }

    pub fn get_by_path(&self, path: &str) -> Result<Vec<CodeChunk>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("{CHUNK_SELECT} WHERE path = ?1 ORDER BY start_line, end_line"))?;
        let rows = stmt.query_map(params![path], row_to_chunk)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn get_many(&self, ids: &[String]) -> Result<Vec<CodeChunk>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("{CHUNK_SELECT} WHERE id IN ({placeholders})"))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), row_to_chunk)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Chunks declaring `symbol` exactly, ordered by id for determinism.
    pub fn chunks_by_symbol(&self, symbol: &str, limit: usize) -> Result<Vec<CodeChunk>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{CHUNK_SELECT} WHERE id IN (SELECT chunk_id FROM chunk_symbols WHERE symbol = ?1)
             ORDER BY id LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![symbol, limit as i64], row_to_chunk)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ── Keyword search ──────────────────────────────────────────────────────

    /// BM25 over the chunk FTS index. Returns `(id, bm25_score, rank)` with
    /// score descending (bm25's "smaller is better" is negated so callers
    /// see bigger-is-better) and ascending-id tie-breaking.
    pub fn bm25_search(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Bm25Hit>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(vec![]);
        };

        let mut sql = String::from(
            "SELECT c.id, bm25(chunk_fts) AS r
             FROM chunk_fts JOIN chunks c ON c.seq = chunk_fts.rowid
             WHERE chunk_fts MATCH ?1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_expr)];

        if let Some(exts) = &filters.extensions {
            if !exts.is_empty() {
                let mut parts = Vec::new();
                for e in exts {
                    parts.push("c.path GLOB ?".to_string());
                    args.push(Box::new(format!("*.{}", e.to_lowercase())));
                }
                sql.push_str(&format!(" AND ({})", parts.join(" OR ")));
            }
        }
        if let Some(glob) = &filters.path_glob {
            sql.push_str(" AND c.path GLOB ?");
            args.push(Box::new(glob.clone()));
        }
        if let Some(kinds) = &filters.kinds {
            if !kinds.is_empty() {
                let ph = vec!["?"; kinds.len()].join(", ");
                sql.push_str(&format!(" AND c.kind IN ({ph})"));
                for k in kinds {
                    args.push(Box::new(k.as_str().to_string()));
                }
            }
        }

        sql.push_str(" ORDER BY r ASC, c.id ASC LIMIT ?");
        args.push(Box::new(limit as i64));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(args.iter().map(|b| b.as_ref())),
            |row| {
                let id: String = row.get(0)?;
                let rank: f64 = row.get(1)?;
                Ok((id, rank))
            },
        )?;

        let mut out = Vec::new();
        for (pos, r) in rows.enumerate() {
            let (id, rank) = r?;
            out.push((id, -rank, pos + 1));
        }
        Ok(out)
    }

    /// FTS over prose snippets, same score/rank shape as [`bm25_search`].
    pub fn fts_snippet_search(
        &self,
        query: &str,
        limit: usize,
        path_glob: Option<&str>,
    ) -> Result<Vec<(InfoSnippet, f64)>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(vec![]);
        };

        let mut sql = String::from(
            "SELECT s.id, s.path, s.content, s.start_line, s.end_line, s.title, s.breadcrumb,
                    s.chunk_id, s.created_at, bm25(snippet_fts) AS r
             FROM snippet_fts JOIN snippets s ON s.seq = snippet_fts.rowid
             WHERE snippet_fts MATCH ?1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_expr)];
        if let Some(glob) = path_glob {
            sql.push_str(" AND s.path GLOB ?");
            args.push(Box::new(glob.to_string()));
        }
        sql.push_str(" ORDER BY r ASC, s.id ASC LIMIT ?");
        args.push(Box::new(limit as i64));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter().map(|b| b.as_ref())), |row| {
            let snippet = InfoSnippet {
                id: row.get(0)?,
                path: row.get(1)?,
                content: row.get(2)?,
                start_line: row.get(3)?,
                end_line: row.get(4)?,
                title: row.get(5)?,
                breadcrumb: row.get(6)?,
                chunk_id: row.get(7)?,
                created_at: ts_to_datetime(row.get(8)?),
            };
            let rank: f64 = row.get(9)?;
            Ok((snippet, -rank))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    // ── FileRecords ─────────────────────────────────────────────────────────

    pub fn record_indexed(&self, path: &str, file_hash: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO file_records (path, file_hash, indexed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET file_hash = ?2, indexed_at = ?3",
            params![path, file_hash, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// A file needs indexing when no record exists or the recorded hash
    /// differs from the hash of the bytes on disk.
    pub fn needs_indexing(&self, path: &str, file_hash: &str) -> Result<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT file_hash FROM file_records WHERE path = ?1")?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => {
                let stored: String = row.get(0)?;
                Ok(stored != file_hash)
            }
            None => Ok(true),
        }
    }

    pub fn file_record(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT path, file_hash, indexed_at FROM file_records WHERE path = ?1")?;
        let mut rows = stmt.query(params![path])?;
        match rows.next()? {
            Some(row) => Ok(Some(FileRecord {
                path: row.get(0)?,
                file_hash: row.get(1)?,
                indexed_at: ts_to_datetime(row.get(2)?),
            })),
            None => Ok(None),
        }
    }

    // ── Stats & lifecycle ───────────────────────────────────────────────────

    pub fn statistics(&self) -> Result<IndexStatistics> {
        let conn = self.lock();
        let chunk_count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        let snippet_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM snippets", [], |r| r.get(0))?;
        let file_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM file_records", [], |r| r.get(0))?;
        Ok(IndexStatistics {
            chunk_count: chunk_count as usize,
            snippet_count: snippet_count as usize,
            file_count: file_count as usize,
        })
    }

    /// Every chunk id in the store. Used by parity checks.
    pub fn all_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id FROM chunks")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Wipe every table. Used by forced rebuilds.
    pub fn clear(&self) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunk_symbols", [])?;
        tx.execute("DELETE FROM chunks", [])?;
        tx.execute("DELETE FROM snippets", [])?;
        tx.execute("DELETE FROM file_records", [])?;
        tx.commit()?;
        Ok(())
    }
}

fn delete_file_rows(tx: &rusqlite::Transaction<'_>, path: &str) -> Result<()> {
    tx.execute(
        "DELETE FROM chunk_symbols WHERE chunk_id IN (SELECT id FROM chunks WHERE path = ?1)",
        params![path],
    )?;
    tx.execute("DELETE FROM chunks WHERE path = ?1", params![path])?;
    tx.execute("DELETE FROM snippets WHERE path = ?1", params![path])?;
    Ok(())
}

const CHUNK_SELECT: &str = "SELECT id, path, start_line, end_line, kind, content, symbols, refs,
        file_hash, content_hash, doc_comment, signature, breadcrumb, token_count, language,
        description, created_at FROM chunks";

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<CodeChunk> {
    let symbols_json: String = row.get(6)?;
    let refs_json: String = row.get(7)?;
    Ok(CodeChunk {
        id: row.get(0)?,
        path: row.get(1)?,
        start_line: row.get(2)?,
        end_line: row.get(3)?,
        kind: ChunkKind::from_str_tag(&row.get::<_, String>(4)?),
        content: row.get(5)?,
        symbols: serde_json::from_str(&symbols_json).unwrap_or_default(),
        references: serde_json::from_str(&refs_json).unwrap_or_default(),
        file_hash: row.get(8)?,
        content_hash: row.get(9)?,
        doc_comment: row.get(10)?,
        signature: row.get(11)?,
        breadcrumb: row.get(12)?,
        token_count: row.get(13)?,
        language: row.get(14)?,
        generated_description: row.get(15)?,
        created_at: ts_to_datetime(row.get(16)?),
    })
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

/// Sanitize raw user text into an FTS5 MATCH expression: alphanumeric
/// tokens, each quoted, OR-joined. Raw syntax characters never reach FTS5.
/// Returns `None` when no searchable token survives.
fn fts_match_expression(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{chunk_id, xxh3_hex};

    fn make_chunk(path: &str, start: u32, kind: ChunkKind, symbol: &str, content: &str) -> CodeChunk {
        CodeChunk {
            id: chunk_id(path, start, kind, Some(symbol)),
            path: path.to_string(),
            content: content.to_string(),
            start_line: start,
            end_line: start + content.lines().count().max(1) as u32 - 1,
            kind,
            symbols: vec![symbol.to_string()],
            references: vec![],
            file_hash: xxh3_hex(content.as_bytes()),
            content_hash: xxh3_hex(content.as_bytes()),
            doc_comment: None,
            signature: None,
            breadcrumb: None,
            token_count: 1,
            language: "rust".to_string(),
            generated_description: None,
            created_at: Utc::now(),
        }
    }

    fn make_snippet(path: &str, start: u32, title: &str, content: &str) -> InfoSnippet {
        InfoSnippet {
            id: crate::chunker::snippet_id(path, start, title),
            path: path.to_string(),
            content: content.to_string(),
            start_line: start,
            end_line: start,
            title: title.to_string(),
            breadcrumb: None,
            chunk_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn put_get_round_trip() {
        let store = ChunkStore::open_in_memory().unwrap();
        let chunk = make_chunk("src/a.rs", 1, ChunkKind::Function, "alpha", "fn alpha() {}");
        store.put_file("src/a.rs", &[chunk.clone()], &[]).unwrap();

        let got = store.get(&chunk.id).unwrap().unwrap();
        assert_eq!(got.path, "src/a.rs");
        assert_eq!(got.kind, ChunkKind::Function);
        assert_eq!(got.symbols, vec!["alpha".to_string()]);

        let by_path = store.get_by_path("src/a.rs").unwrap();
        assert_eq!(by_path.len(), 1);
    }

    #[test]
    fn replace_is_atomic_per_path() {
        let store = ChunkStore::open_in_memory().unwrap();
        let old = make_chunk("src/a.rs", 1, ChunkKind::Function, "old_fn", "fn old_fn() {}");
        store.put_file("src/a.rs", &[old.clone()], &[]).unwrap();

        let new = make_chunk("src/a.rs", 5, ChunkKind::Function, "new_fn", "fn new_fn() {}");
        store.put_file("src/a.rs", &[new.clone()], &[]).unwrap();

        // Old rows, symbol rows and FTS entries are gone.
        assert!(store.get(&old.id).unwrap().is_none());
        assert!(store.chunks_by_symbol("old_fn", 10).unwrap().is_empty());
        assert!(store.bm25_search("old_fn", 10, &SearchFilters::default()).unwrap().is_empty());
        assert_eq!(store.get_by_path("src/a.rs").unwrap().len(), 1);
    }

    #[test]
    fn bm25_orders_by_relevance_with_id_tie_break() {
        let store = ChunkStore::open_in_memory().unwrap();
        let heavy = make_chunk(
            "src/hit.rs",
            1,
            ChunkKind::Function,
            "auth",
            "authenticate authenticate authenticate",
        );
        let light = make_chunk(
            "src/miss.rs",
            1,
            ChunkKind::Function,
            "other",
            "authenticate once in passing",
        );
        store.put_file("src/hit.rs", &[heavy.clone()], &[]).unwrap();
        store.put_file("src/miss.rs", &[light.clone()], &[]).unwrap();

        let hits = store
            .bm25_search("authenticate", 10, &SearchFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, heavy.id);
        assert!(hits[0].1 >= hits[1].1);
        // Ranks are 1-based and dense.
        assert_eq!(hits[0].2, 1);
        assert_eq!(hits[1].2, 2);
    }

    #[test]
    fn filters_restrict_extension_kind_and_glob() {
        let store = ChunkStore::open_in_memory().unwrap();
        let rs = make_chunk("src/a.rs", 1, ChunkKind::Function, "login", "login flow here");
        let py = make_chunk("tools/b.py", 1, ChunkKind::Class, "LoginTool", "login flow there");
        store.put_file("src/a.rs", &[rs.clone()], &[]).unwrap();
        store.put_file("tools/b.py", &[py.clone()], &[]).unwrap();

        let only_rs = store
            .bm25_search(
                "login",
                10,
                &SearchFilters {
                    extensions: Some(vec!["rs".into()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(only_rs.len(), 1);
        assert_eq!(only_rs[0].0, rs.id);

        let only_classes = store
            .bm25_search(
                "login",
                10,
                &SearchFilters {
                    kinds: Some(vec![ChunkKind::Class]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(only_classes.len(), 1);
        assert_eq!(only_classes[0].0, py.id);

        let only_tools = store
            .bm25_search(
                "login",
                10,
                &SearchFilters {
                    path_glob: Some("tools/*".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(only_tools.len(), 1);
        assert_eq!(only_tools[0].0, py.id);
    }

    #[test]
    fn empty_and_symbol_free_queries_return_nothing() {
        let store = ChunkStore::open_in_memory().unwrap();
        let c = make_chunk("src/a.rs", 1, ChunkKind::Function, "alpha", "fn alpha() {}");
        store.put_file("src/a.rs", &[c], &[]).unwrap();

        assert!(store.bm25_search("", 10, &SearchFilters::default()).unwrap().is_empty());
        assert!(store
            .bm25_search("???!!!", 10, &SearchFilters::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn fts_syntax_in_queries_is_neutralized() {
        let store = ChunkStore::open_in_memory().unwrap();
        let c = make_chunk("src/a.rs", 1, ChunkKind::Function, "alpha", "alpha NEAR beta");
        store.put_file("src/a.rs", &[c.clone()], &[]).unwrap();

        // Would be a syntax error if passed through raw.
        let hits = store
            .bm25_search("alpha AND (beta OR \"", 10, &SearchFilters::default())
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn snippet_search_and_replace() {
        let store = ChunkStore::open_in_memory().unwrap();
        let s = make_snippet("README.md", 1, "Install", "run the installer binary");
        store.replace_snippets("README.md", &[s]).unwrap();

        let hits = store.fts_snippet_search("installer", 10, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.title, "Install");

        let filtered = store
            .fts_snippet_search("installer", 10, Some("docs/*"))
            .unwrap();
        assert!(filtered.is_empty());

        store.replace_snippets("README.md", &[]).unwrap();
        assert!(store.fts_snippet_search("installer", 10, None).unwrap().is_empty());
    }

    #[test]
    fn file_records_drive_change_detection() {
        let store = ChunkStore::open_in_memory().unwrap();
        assert!(store.needs_indexing("src/a.rs", "h1").unwrap());

        store.record_indexed("src/a.rs", "h1").unwrap();
        assert!(!store.needs_indexing("src/a.rs", "h1").unwrap());
        assert!(store.needs_indexing("src/a.rs", "h2").unwrap());

        let rec = store.file_record("src/a.rs").unwrap().unwrap();
        assert_eq!(rec.file_hash, "h1");
    }

    #[test]
    fn remove_file_clears_all_traces() {
        let store = ChunkStore::open_in_memory().unwrap();
        let c = make_chunk("src/a.rs", 1, ChunkKind::Function, "alpha", "fn alpha() {}");
        let s = make_snippet("src/a.rs", 1, "note", "prose");
        store.replace_file("src/a.rs", &[c.clone()], &[s], Some("h1")).unwrap();

        store.remove_file("src/a.rs").unwrap();
        assert!(store.get(&c.id).unwrap().is_none());
        assert!(store.bm25_search("alpha", 10, &SearchFilters::default()).unwrap().is_empty());
        assert!(store.fts_snippet_search("prose", 10, None).unwrap().is_empty());
        assert!(store.needs_indexing("src/a.rs", "h1").unwrap());

        let stats = store.statistics().unwrap();
        assert_eq!(stats.chunk_count, 0);
        assert_eq!(stats.snippet_count, 0);
        assert_eq!(stats.file_count, 0);
    }

    #[test]
    fn glob_matcher_agrees_with_sql_semantics() {
        assert!(glob_match("src/*", "src/a.rs"));
        assert!(glob_match("*.rs", "deep/nested/file.rs"));
        assert!(glob_match("src/?.rs", "src/a.rs"));
        assert!(!glob_match("src/?.rs", "src/ab.rs"));
        assert!(!glob_match("tools/*", "src/a.rs"));
    }
}
