use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use member_commons_core::SurveyResponses;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS member_preferences (
  preference_id TEXT PRIMARY KEY,
  member TEXT NOT NULL CHECK (length(member) > 0),
  survey_json TEXT NOT NULL,
  interests_json TEXT NOT NULL,
  completed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS listing_snapshots (
  snapshot_id TEXT PRIMARY KEY,
  source TEXT NOT NULL CHECK (length(source) > 0),
  captured_at TEXT NOT NULL,
  record_count INTEGER NOT NULL CHECK (record_count >= 0),
  sha256 TEXT NOT NULL,
  listing_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_member_preferences_member ON member_preferences(member);
CREATE INDEX IF NOT EXISTS idx_listing_snapshots_source ON listing_snapshots(source);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// Survey answers and interest ratings saved for one member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberPreferences {
    pub preference_id: String,
    pub member: String,
    pub survey_responses: SurveyResponses,
    #[serde(default)]
    pub interests: BTreeMap<String, u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// A normalized listing captured from one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingSnapshot {
    pub snapshot_id: String,
    pub source: String,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub record_count: usize,
    pub sha256: String,
    pub listing: Value,
}

impl SqliteStore {
    /// Open a SQLite-backed store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version < 1 {
            self.apply_migration_1()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 001")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration 001")?;
        Ok(())
    }

    /// Persist one member's survey answers and interests.
    ///
    /// # Errors
    /// Returns an error when the member is blank, serialization fails, or the insert fails.
    pub fn save_preferences(
        &mut self,
        member: &str,
        survey_responses: &SurveyResponses,
        interests: &BTreeMap<String, u8>,
        completed_at: OffsetDateTime,
    ) -> Result<MemberPreferences> {
        if member.trim().is_empty() {
            return Err(anyhow!("member MUST be provided when saving preferences"));
        }

        let preferences = MemberPreferences {
            preference_id: Ulid::new().to_string(),
            member: member.to_string(),
            survey_responses: survey_responses.clone(),
            interests: interests.clone(),
            completed_at,
        };

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO member_preferences(
                preference_id, member, survey_json, interests_json, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                preferences.preference_id,
                preferences.member,
                serde_json::to_string(&preferences.survey_responses)
                    .context("failed to serialize survey responses")?,
                serde_json::to_string(&preferences.interests)
                    .context("failed to serialize interests")?,
                rfc3339(preferences.completed_at)?,
            ],
        )
        .context("failed to persist member preferences")?;
        tx.commit().context("failed to commit preferences transaction")?;

        Ok(preferences)
    }

    /// Most recently saved preferences for `member`, if any.
    ///
    /// # Errors
    /// Returns an error when lookup or JSON decoding fails.
    pub fn latest_preferences(&self, member: &str) -> Result<Option<MemberPreferences>> {
        let row = self
            .conn
            .query_row(
                "SELECT preference_id, member, survey_json, interests_json, completed_at
                 FROM member_preferences
                 WHERE member = ?1
                 ORDER BY rowid DESC
                 LIMIT 1",
                params![member],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .context("failed to query member preferences")?;

        let Some((preference_id, member, survey_json, interests_json, completed_at)) = row else {
            return Ok(None);
        };

        Ok(Some(MemberPreferences {
            preference_id,
            member,
            survey_responses: serde_json::from_str(&survey_json)
                .context("failed to deserialize stored survey responses")?,
            interests: serde_json::from_str(&interests_json)
                .context("failed to deserialize stored interests")?,
            completed_at: parse_rfc3339(&completed_at)?,
        }))
    }

    /// Capture a normalized listing for `source` together with its content digest.
    ///
    /// # Errors
    /// Returns an error when the source is blank, serialization fails, or the insert fails.
    pub fn save_listing_snapshot(&mut self, source: &str, listing: &Value) -> Result<ListingSnapshot> {
        if source.trim().is_empty() {
            return Err(anyhow!("source MUST be provided when saving a listing snapshot"));
        }

        let listing_json = serde_json::to_string(listing).context("failed to serialize listing")?;
        let snapshot = ListingSnapshot {
            snapshot_id: Ulid::new().to_string(),
            source: source.to_string(),
            captured_at: OffsetDateTime::now_utc(),
            record_count: listing.as_array().map_or(0, Vec::len),
            sha256: sha256_digest(listing_json.as_bytes()),
            listing: listing.clone(),
        };

        let record_count =
            i64::try_from(snapshot.record_count).context("record count exceeds i64 range")?;
        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO listing_snapshots(
                snapshot_id, source, captured_at, record_count, sha256, listing_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snapshot.snapshot_id,
                snapshot.source,
                rfc3339(snapshot.captured_at)?,
                record_count,
                snapshot.sha256,
                listing_json,
            ],
        )
        .context("failed to persist listing snapshot")?;
        tx.commit().context("failed to commit listing snapshot transaction")?;

        Ok(snapshot)
    }

    /// Most recent snapshot captured for `source`, if any.
    ///
    /// # Errors
    /// Returns an error when lookup, digest verification, or JSON decoding fails.
    pub fn latest_listing_snapshot(&self, source: &str) -> Result<Option<ListingSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT snapshot_id, source, captured_at, record_count, sha256, listing_json
                 FROM listing_snapshots
                 WHERE source = ?1
                 ORDER BY rowid DESC
                 LIMIT 1",
                params![source],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .context("failed to query listing snapshots")?;

        let Some((snapshot_id, source, captured_at, record_count, sha256, listing_json)) = row
        else {
            return Ok(None);
        };

        let actual = sha256_digest(listing_json.as_bytes());
        if actual != sha256 {
            return Err(anyhow!(
                "listing snapshot {snapshot_id} digest mismatch: expected {sha256}, found {actual}"
            ));
        }

        Ok(Some(ListingSnapshot {
            snapshot_id,
            source,
            captured_at: parse_rfc3339(&captured_at)?,
            record_count: usize::try_from(record_count)
                .context("stored record count is negative")?,
            sha256,
            listing: serde_json::from_str(&listing_json)
                .context("failed to deserialize stored listing")?,
        }))
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
