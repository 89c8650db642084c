use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use member_commons_core::{
    known_preferences, normalize_listing, recommend_projects, score_survey, CategoryScore, Listing,
    NormalizedRecord, RecordTable, SurveyProfile, SurveyResponses,
};
use member_commons_store_sqlite::{ListingSnapshot, MemberPreferences, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

mod source;

pub use source::{FileSource, HttpSource, RecordSource, SourceConfig, DEFAULT_TIMEOUT_SECS};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// The record source itself failed, as opposed to local normalization or storage.
#[derive(Debug, thiserror::Error)]
#[error("record source {source_key} failed: {message}")]
pub struct UpstreamError {
    pub source_key: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// Result of normalizing one backend payload.
///
/// `normalized == false` means the payload was not a list and `records`
/// carries it untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedListing {
    pub normalized: bool,
    pub record_count: usize,
    pub records: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchListingResult {
    pub source: String,
    #[serde(flatten)]
    pub listing: NormalizedListing,
    pub snapshot_id: Option<String>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreSurveyRequest {
    pub member: String,
    pub responses: SurveyResponses,
    #[serde(default)]
    pub interests: BTreeMap<String, u8>,
    #[serde(default)]
    pub save: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreSurveyResult {
    pub member: String,
    pub profile: SurveyProfile,
    pub top_categories: Vec<CategoryScore>,
    pub saved: Option<MemberPreferences>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendRequest {
    pub preferences: Vec<String>,
    pub records: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendResult {
    pub preferences: Vec<String>,
    pub unknown_preferences: Vec<String>,
    pub candidate_count: usize,
    pub recommended: Vec<NormalizedRecord>,
}

#[derive(Debug, Clone)]
pub struct MemberCommonsApi {
    db_path: PathBuf,
}

impl MemberCommonsApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Normalize one backend payload. Never fails; non-list payloads pass through.
    #[must_use]
    pub fn normalize(payload: Value) -> NormalizedListing {
        match normalize_listing(payload) {
            Listing::Normalized(items) => NormalizedListing {
                normalized: true,
                record_count: items.len(),
                records: Value::Array(items),
            },
            Listing::Unchanged(value) => {
                NormalizedListing { normalized: false, record_count: 0, records: value }
            }
        }
    }

    /// Fetch a listing from `source`, normalize it, and optionally keep a snapshot.
    ///
    /// # Errors
    /// Returns an [`UpstreamError`] when the source cannot be read, or a store error when
    /// the snapshot cannot be saved.
    pub fn fetch_listing(&self, source: &dyn RecordSource, snapshot: bool) -> Result<FetchListingResult> {
        let source_key = source.source_key();
        let payload = source.fetch_records().map_err(|err| UpstreamError {
            source_key: source_key.clone(),
            message: format!("{err:#}"),
        })?;
        let listing = Self::normalize(payload);
        tracing::info!(
            source = %source_key,
            normalized = listing.normalized,
            record_count = listing.record_count,
            "fetched listing"
        );

        let (snapshot_id, sha256) = if snapshot {
            let mut store = self.open_store()?;
            store.migrate()?;
            let saved = store.save_listing_snapshot(&source_key, &listing.records)?;
            (Some(saved.snapshot_id), Some(saved.sha256))
        } else {
            (None, None)
        };

        Ok(FetchListingResult { source: source_key, listing, snapshot_id, sha256 })
    }

    /// Most recent stored snapshot for `source`, if any.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read or the snapshot digest does not match.
    pub fn latest_listing(&self, source: &str) -> Result<Option<ListingSnapshot>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.latest_listing_snapshot(source)
    }

    /// Normalize `payload` and project it into a [`RecordTable`].
    ///
    /// # Errors
    /// Returns an error when the payload is not a list of records.
    pub fn table(payload: Value) -> Result<RecordTable> {
        let records = normalized_records(payload)?;
        Ok(RecordTable::from_records(&records))
    }

    /// Score survey answers and, when requested, save them for the member.
    ///
    /// # Errors
    /// Returns an error when answers are out of range or persistence fails.
    pub fn score_survey(&self, input: ScoreSurveyRequest) -> Result<ScoreSurveyResult> {
        let profile = score_survey(&input.responses)?;
        let top_categories = profile.top_categories(3).into_iter().cloned().collect();

        let saved = if input.save {
            let mut store = self.open_store()?;
            store.migrate()?;
            let saved = store.save_preferences(
                &input.member,
                &input.responses,
                &input.interests,
                OffsetDateTime::now_utc(),
            )?;
            tracing::info!(member = %saved.member, answered = profile.answered, "saved survey preferences");
            Some(saved)
        } else {
            None
        };

        Ok(ScoreSurveyResult { member: input.member, profile, top_categories, saved })
    }

    /// Latest saved preferences for `member`, if any.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or queried.
    pub fn latest_preferences(&self, member: &str) -> Result<Option<MemberPreferences>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.latest_preferences(member)
    }

    /// Recommend records matching any of the requested preferences.
    ///
    /// # Errors
    /// Returns an error when `records` is not a list of records.
    pub fn recommend(input: RecommendRequest) -> Result<RecommendResult> {
        let candidates = normalized_records(input.records)?;
        let known = known_preferences();
        let unknown_preferences = input
            .preferences
            .iter()
            .filter(|preference| !known.contains(&preference.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        if !unknown_preferences.is_empty() {
            tracing::warn!(?unknown_preferences, "ignoring unknown preferences");
        }

        let recommended = recommend_projects(&candidates, &input.preferences);
        Ok(RecommendResult {
            preferences: input.preferences,
            unknown_preferences,
            candidate_count: candidates.len(),
            recommended,
        })
    }
}

fn normalized_records(payload: Value) -> Result<Vec<NormalizedRecord>> {
    let Listing::Normalized(items) = normalize_listing(payload) else {
        return Err(anyhow!("records payload MUST be a JSON array"));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(record) => Ok(record),
            other => Err(anyhow!("record {index} MUST be a JSON object, got {other}")),
        })
        .collect()
}
