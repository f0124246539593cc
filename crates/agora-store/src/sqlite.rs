use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use agora_core::{
    AgoraError, Debate, DebateListItem, DebateListPage, DebateRound, DebateSettings, DebateStatus,
    DebateSynthesis, Operation, PersonalityResponse, Result, UsageRecord,
};

use crate::repo::{DebateDraft, DebateRepository, UsageStore};

/// SQLite-backed store implementing both repositories.
///
/// Debate rows cascade to rounds, responses, and synthesis on delete;
/// usage records deliberately carry no foreign key so they outlive debate
/// deletion for auditing.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening debate store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path).map_err(db_err)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )
        .map_err(db_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS debates (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                question TEXT NOT NULL,
                status TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                settings TEXT NOT NULL,
                current_round INTEGER NOT NULL DEFAULT 0,
                total_input_tokens INTEGER NOT NULL DEFAULT 0,
                total_output_tokens INTEGER NOT NULL DEFAULT 0,
                total_cost TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT
            );

            CREATE TABLE IF NOT EXISTS debate_rounds (
                id TEXT PRIMARY KEY,
                debate_id TEXT NOT NULL REFERENCES debates(id) ON DELETE CASCADE,
                round_number INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(debate_id, round_number)
            );

            CREATE TABLE IF NOT EXISTS debate_responses (
                id TEXT PRIMARY KEY,
                round_id TEXT NOT NULL REFERENCES debate_rounds(id) ON DELETE CASCADE,
                personality TEXT NOT NULL,
                thinking TEXT,
                answer TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cost TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS debate_synthesis (
                id TEXT PRIMARY KEY,
                debate_id TEXT NOT NULL UNIQUE REFERENCES debates(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cost TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS usage_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                debate_id TEXT,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cached_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                cost TEXT NOT NULL DEFAULT '0',
                operation TEXT NOT NULL,
                personality TEXT,
                round_number INTEGER,
                estimated INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_debates_user ON debates(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_rounds_debate ON debate_rounds(debate_id);
            CREATE INDEX IF NOT EXISTS idx_responses_round ON debate_responses(round_id);
            CREATE INDEX IF NOT EXISTS idx_usage_user ON usage_records(user_id, created_at);
            ",
        )
        .map_err(db_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database (for tests and the CLI variant).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn load_rounds(&self, conn: &Connection, debate_id: Uuid) -> Result<Vec<DebateRound>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, round_number, created_at FROM debate_rounds
                 WHERE debate_id = ?1 ORDER BY round_number",
            )
            .map_err(db_err)?;
        let round_rows: Vec<(String, u32, String)> = stmt
            .query_map(params![debate_id.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err)?;

        let mut rounds = Vec::with_capacity(round_rows.len());
        for (round_id, round_number, created_at) in round_rows {
            let mut stmt = conn
                .prepare(
                    "SELECT personality, thinking, answer, input_tokens, output_tokens,
                            cost, created_at
                     FROM debate_responses WHERE round_id = ?1 ORDER BY rowid",
                )
                .map_err(db_err)?;
            let responses: Vec<PersonalityResponse> = stmt
                .query_map(params![round_id], |row| {
                    Ok(PersonalityResponse {
                        personality: row.get(0)?,
                        thinking: row.get(1)?,
                        answer: row.get(2)?,
                        input_tokens: row.get::<_, i64>(3)? as u64,
                        output_tokens: row.get::<_, i64>(4)? as u64,
                        cost: parse_decimal_sql(row.get::<_, String>(5)?),
                        created_at: parse_ts_sql(row.get::<_, String>(6)?),
                    })
                })
                .map_err(db_err)?
                .collect::<std::result::Result<_, _>>()
                .map_err(db_err)?;

            rounds.push(DebateRound {
                id: parse_uuid(&round_id)?,
                debate_id,
                round_number,
                responses,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(rounds)
    }

    fn load_synthesis(
        &self,
        conn: &Connection,
        debate_id: Uuid,
    ) -> Result<Option<DebateSynthesis>> {
        conn.query_row(
            "SELECT id, content, input_tokens, output_tokens, cost, created_at
             FROM debate_synthesis WHERE debate_id = ?1",
            params![debate_id.to_string()],
            |row| {
                Ok(DebateSynthesis {
                    id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
                    debate_id,
                    content: row.get(1)?,
                    input_tokens: row.get::<_, i64>(2)? as u64,
                    output_tokens: row.get::<_, i64>(3)? as u64,
                    cost: parse_decimal_sql(row.get::<_, String>(4)?),
                    created_at: parse_ts_sql(row.get::<_, String>(5)?),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }
}

#[async_trait]
impl DebateRepository for SqliteStore {
    async fn create_debate(&self, draft: DebateDraft) -> Result<Debate> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let settings_json = serde_json::to_string(&draft.settings)?;

        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO debates
                (id, user_id, question, status, provider, model, settings,
                 current_round, total_cost, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, '0', ?8, ?8)",
            params![
                id.to_string(),
                draft.user_id,
                draft.question,
                DebateStatus::Pending.as_str(),
                draft.provider,
                draft.model,
                settings_json,
                now.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(Debate {
            id,
            user_id: draft.user_id,
            question: draft.question,
            status: DebateStatus::Pending,
            provider: draft.provider,
            model: draft.model,
            settings: draft.settings,
            current_round: 0,
            rounds: vec![],
            synthesis: None,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
        })
    }

    async fn get_by_id(
        &self,
        id: Uuid,
        include_rounds: bool,
        include_synthesis: bool,
    ) -> Result<Debate> {
        let conn = self.db.lock();
        let row = conn
            .query_row(
                "SELECT user_id, question, status, provider, model, settings,
                        current_round, total_input_tokens, total_output_tokens,
                        total_cost, created_at, updated_at, started_at,
                        completed_at, error_message
                 FROM debates WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, String>(10)?,
                        row.get::<_, String>(11)?,
                        row.get::<_, Option<String>>(12)?,
                        row.get::<_, Option<String>>(13)?,
                        row.get::<_, Option<String>>(14)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((
            user_id,
            question,
            status,
            provider,
            model,
            settings,
            current_round,
            total_in,
            total_out,
            total_cost,
            created_at,
            updated_at,
            started_at,
            completed_at,
            error_message,
        )) = row
        else {
            return Err(AgoraError::NotFound(format!("debate {id}")));
        };

        let rounds = if include_rounds {
            self.load_rounds(&conn, id)?
        } else {
            vec![]
        };
        let synthesis = if include_synthesis {
            self.load_synthesis(&conn, id)?
        } else {
            None
        };

        Ok(Debate {
            id,
            user_id,
            question,
            status: DebateStatus::parse(&status)
                .ok_or_else(|| AgoraError::repository(format!("bad status '{status}'")))?,
            provider,
            model,
            settings: serde_json::from_str::<DebateSettings>(&settings)?,
            current_round,
            rounds,
            synthesis,
            total_input_tokens: total_in as u64,
            total_output_tokens: total_out as u64,
            total_cost: parse_decimal(&total_cost),
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            started_at: started_at.as_deref().map(parse_ts).transpose()?,
            completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
            error_message,
        })
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
        status: Option<DebateStatus>,
    ) -> Result<DebateListPage> {
        let page = page.max(1);
        let offset = (page - 1) as i64 * page_size as i64;

        let conn = self.db.lock();
        let (total, rows): (i64, Vec<DebateListItem>) = match status {
            Some(status) => {
                let total = conn
                    .query_row(
                        "SELECT COUNT(*) FROM debates WHERE user_id = ?1 AND status = ?2",
                        params![user_id, status.as_str()],
                        |row| row.get(0),
                    )
                    .map_err(db_err)?;
                let mut stmt = conn
                    .prepare(
                        "SELECT id, question, status, provider, model, current_round,
                                settings, total_cost, created_at
                         FROM debates WHERE user_id = ?1 AND status = ?2
                         ORDER BY created_at DESC, rowid DESC LIMIT ?3 OFFSET ?4",
                    )
                    .map_err(db_err)?;
                let items = stmt
                    .query_map(
                        params![user_id, status.as_str(), page_size as i64, offset],
                        row_to_list_item,
                    )
                    .map_err(db_err)?
                    .collect::<std::result::Result<_, _>>()
                    .map_err(db_err)?;
                (total, items)
            }
            None => {
                let total = conn
                    .query_row(
                        "SELECT COUNT(*) FROM debates WHERE user_id = ?1",
                        params![user_id],
                        |row| row.get(0),
                    )
                    .map_err(db_err)?;
                let mut stmt = conn
                    .prepare(
                        "SELECT id, question, status, provider, model, current_round,
                                settings, total_cost, created_at
                         FROM debates WHERE user_id = ?1
                         ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                    )
                    .map_err(db_err)?;
                let items = stmt
                    .query_map(params![user_id, page_size as i64, offset], row_to_list_item)
                    .map_err(db_err)?
                    .collect::<std::result::Result<_, _>>()
                    .map_err(db_err)?;
                (total, items)
            }
        };

        Ok(DebateListPage {
            debates: rows,
            total: total as u64,
            page,
            page_size,
            has_more: offset + (page_size as i64) < total,
        })
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DebateStatus,
        current_round: Option<u32>,
        error_message: Option<String>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock();

        let changed = conn
            .execute(
                "UPDATE debates SET
                    status = ?2,
                    updated_at = ?3,
                    current_round = COALESCE(?4, current_round),
                    error_message = COALESCE(?5, error_message),
                    started_at = CASE WHEN ?2 = 'active' THEN COALESCE(started_at, ?3)
                                      ELSE started_at END,
                    completed_at = CASE WHEN ?2 = 'completed' THEN ?3
                                        ELSE completed_at END
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    status.as_str(),
                    now,
                    current_round,
                    error_message,
                ],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(AgoraError::NotFound(format!("debate {id}")));
        }
        Ok(())
    }

    async fn update_totals(
        &self,
        id: Uuid,
        input_tokens: u64,
        output_tokens: u64,
        cost: Decimal,
    ) -> Result<()> {
        let conn = self.db.lock();
        let changed = conn
            .execute(
                "UPDATE debates SET
                    total_input_tokens = ?2,
                    total_output_tokens = ?3,
                    total_cost = ?4,
                    updated_at = ?5
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    input_tokens as i64,
                    output_tokens as i64,
                    cost.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(AgoraError::NotFound(format!("debate {id}")));
        }
        Ok(())
    }

    async fn save_round(&self, debate_id: Uuid, round_number: u32) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO debate_rounds (id, debate_id, round_number, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.to_string(),
                debate_id.to_string(),
                round_number,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    async fn save_response(&self, round_id: Uuid, response: &PersonalityResponse) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO debate_responses
                (id, round_id, personality, thinking, answer, input_tokens,
                 output_tokens, cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.to_string(),
                round_id.to_string(),
                response.personality,
                response.thinking,
                response.answer,
                response.input_tokens as i64,
                response.output_tokens as i64,
                response.cost.to_string(),
                response.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    async fn save_synthesis(
        &self,
        debate_id: Uuid,
        content: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: Decimal,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO debate_synthesis
                (id, debate_id, content, input_tokens, output_tokens, cost, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.to_string(),
                debate_id.to_string(),
                content,
                input_tokens as i64,
                output_tokens as i64,
                cost.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let conn = self.db.lock();
        let changed = conn
            .execute("DELETE FROM debates WHERE id = ?1", params![id.to_string()])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(AgoraError::NotFound(format!("debate {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn append(&self, record: &UsageRecord) -> Result<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO usage_records
                (id, user_id, debate_id, provider, model, input_tokens,
                 output_tokens, cached_tokens, total_tokens, cost, operation,
                 personality, round_number, estimated, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                record.id.to_string(),
                record.user_id,
                record.debate_id.map(|d| d.to_string()),
                record.provider,
                record.model,
                record.input_tokens as i64,
                record.output_tokens as i64,
                record.cached_tokens as i64,
                record.total_tokens as i64,
                record.cost.to_string(),
                record.operation.as_str(),
                record.personality,
                record.round_number,
                record.estimated,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn list(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<UsageRecord>> {
        let (start, end) = range_bounds(range);
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, debate_id, provider, model, input_tokens,
                        output_tokens, cached_tokens, total_tokens, cost,
                        operation, personality, round_number, estimated, created_at
                 FROM usage_records
                 WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3
                 ORDER BY created_at DESC, rowid DESC LIMIT ?4 OFFSET ?5",
            )
            .map_err(db_err)?;
        let records = stmt
            .query_map(
                params![user_id, start, end, limit as i64, offset as i64],
                row_to_usage_record,
            )
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err)?;
        Ok(records)
    }

    async fn for_range(
        &self,
        user_id: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<UsageRecord>> {
        let (start, end) = range_bounds(range);
        let conn = self.db.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, debate_id, provider, model, input_tokens,
                        output_tokens, cached_tokens, total_tokens, cost,
                        operation, personality, round_number, estimated, created_at
                 FROM usage_records
                 WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3
                 ORDER BY created_at DESC, rowid DESC",
            )
            .map_err(db_err)?;
        let records = stmt
            .query_map(params![user_id, start, end], row_to_usage_record)
            .map_err(db_err)?
            .collect::<std::result::Result<_, _>>()
            .map_err(db_err)?;
        Ok(records)
    }
}

// ── Row mapping helpers ────────────────────────────────────────

fn row_to_list_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<DebateListItem> {
    let question: String = row.get(1)?;
    let settings: String = row.get(6)?;
    let max_rounds = serde_json::from_str::<DebateSettings>(&settings)
        .map(|s| s.max_rounds)
        .unwrap_or(0);
    let truncated = {
        let mut chars = question.chars();
        let head: String = chars.by_ref().take(100).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    };
    Ok(DebateListItem {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
        question: truncated,
        status: DebateStatus::parse(&row.get::<_, String>(2)?).unwrap_or(DebateStatus::Pending),
        provider: row.get(3)?,
        model: row.get(4)?,
        current_round: row.get(5)?,
        max_rounds,
        total_cost: parse_decimal_sql(row.get::<_, String>(7)?),
        created_at: parse_ts_sql(row.get::<_, String>(8)?),
    })
}

fn row_to_usage_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageRecord> {
    Ok(UsageRecord {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
        user_id: row.get(1)?,
        debate_id: row
            .get::<_, Option<String>>(2)?
            .and_then(|s| Uuid::parse_str(&s).ok()),
        provider: row.get(3)?,
        model: row.get(4)?,
        input_tokens: row.get::<_, i64>(5)? as u64,
        output_tokens: row.get::<_, i64>(6)? as u64,
        cached_tokens: row.get::<_, i64>(7)? as u64,
        total_tokens: row.get::<_, i64>(8)? as u64,
        cost: parse_decimal_sql(row.get::<_, String>(9)?),
        operation: Operation::parse(&row.get::<_, String>(10)?)
            .unwrap_or(Operation::DebateResponse),
        personality: row.get(11)?,
        round_number: row.get(12)?,
        estimated: row.get(13)?,
        created_at: parse_ts_sql(row.get::<_, String>(14)?),
    })
}

fn range_bounds(range: Option<(DateTime<Utc>, DateTime<Utc>)>) -> (String, String) {
    match range {
        Some((start, end)) => (start.to_rfc3339(), end.to_rfc3339()),
        // RFC 3339 text sorts lexicographically within these bounds.
        None => ("0000".into(), "9999".into()),
    }
}

fn db_err(e: rusqlite::Error) -> AgoraError {
    AgoraError::repository(e)
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AgoraError::repository(format!("bad uuid '{s}': {e}")))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| AgoraError::repository(format!("bad timestamp '{s}': {e}")))
}

/// Infallible variants for use inside rusqlite row closures.
fn parse_ts_sql(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

fn parse_decimal_sql(s: String) -> Decimal {
    parse_decimal(&s)
}
