use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use scheme_match_core::{
    decode_catalog_json, evaluate_load, CatalogLoad, EvaluationReport, MatchPolicy, Profile,
    ProfileInput, Scheme,
};
use scheme_match_store_sqlite::{
    ProfileId, SchemaStatus, SchemeFilter, SchemePage, SchemeSearch, SqliteStore, StoredProfile,
    UpsertOutcome, MAX_PAGE_LIMIT,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

pub const API_CONTRACT_VERSION: &str = "api.v1";

const SEED_CATALOG_JSON: &str = include_str!("../seed/schemes.json");

/// A lookup target that does not exist. Transports map this to "not found".
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{kind} not found: {id}")]
pub struct NotFound {
    pub kind: &'static str,
    pub id: String,
}

impl NotFound {
    fn scheme(scheme_id: &str) -> Self {
        Self { kind: "scheme", id: scheme_id.to_string() }
    }

    fn profile(profile_id: ProfileId) -> Self {
        Self { kind: "profile", id: profile_id.to_string() }
    }
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

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedResult {
    pub inserted: Vec<String>,
    pub skipped_existing: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpsertSchemeResult {
    pub scheme_id: String,
    pub outcome: UpsertOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListSchemesRequest {
    pub state: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub skip: usize,
    /// Defaults to the maximum page size.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchSchemesRequest {
    /// Case-insensitive text matched against scheme names and descriptions.
    pub q: String,
    pub skip: usize,
    /// Defaults to the maximum page size.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoriesResult {
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PutProfileRequest {
    #[serde(default)]
    pub profile_id: Option<ProfileId>,
    pub profile: ProfileInput,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteProfileResult {
    pub profile_id: ProfileId,
    pub deleted: bool,
}

/// Exactly one of `profile_id` and `profile` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecommendRequest {
    pub profile_id: Option<ProfileId>,
    pub profile: Option<ProfileInput>,
    pub policy: Option<MatchPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluateRequest {
    pub profile: ProfileInput,
    pub catalog: Vec<serde_json::Value>,
    #[serde(default)]
    pub policy: Option<MatchPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationPackage {
    pub snapshot_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub evaluated_at: OffsetDateTime,
    pub profile_id: Option<ProfileId>,
    pub catalog_size: usize,
    pub report: EvaluationReport,
}

#[derive(Debug, Clone)]
pub struct SchemeMatchApi {
    db_path: PathBuf,
}

impl SchemeMatchApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
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

    /// Insert the built-in sample catalog, leaving existing scheme ids untouched.
    ///
    /// # Errors
    /// Returns an error when the bundled catalog is malformed or a write fails.
    pub fn seed_catalog(&self) -> Result<SeedResult> {
        let catalog = seed_catalog()?;
        let mut store = self.open_migrated_store()?;
        let mut result = SeedResult::default();

        for scheme in &catalog {
            if store.insert_scheme_if_absent(scheme)? {
                result.inserted.push(scheme.id.clone());
            } else {
                result.skipped_existing.push(scheme.id.clone());
            }
        }

        tracing::info!(
            inserted = result.inserted.len(),
            skipped = result.skipped_existing.len(),
            "seeded sample catalog"
        );
        Ok(result)
    }

    /// Validate and store one scheme, replacing any record with the same id.
    ///
    /// # Errors
    /// Returns [`scheme_match_core::MatchError::Configuration`] when the record is
    /// malformed, or a storage error.
    pub fn add_scheme(&self, scheme: Scheme) -> Result<UpsertSchemeResult> {
        scheme.validate()?;
        let mut store = self.open_migrated_store()?;
        let outcome = store.upsert_scheme(&scheme)?;
        Ok(UpsertSchemeResult { scheme_id: scheme.id, outcome })
    }

    /// # Errors
    /// Returns [`NotFound`] when no scheme has that id, or a storage error.
    pub fn get_scheme(&self, scheme_id: &str) -> Result<Scheme> {
        let store = self.open_migrated_store()?;
        let scheme = store.get_scheme(scheme_id)?.ok_or_else(|| NotFound::scheme(scheme_id))?;
        Ok(scheme)
    }

    /// # Errors
    /// Returns an error when the page size is out of range or storage fails.
    pub fn list_schemes(&self, request: ListSchemesRequest) -> Result<SchemePage> {
        let store = self.open_migrated_store()?;
        store.list_schemes(&SchemeFilter {
            state: request.state,
            category: request.category,
            is_active: request.is_active,
            skip: request.skip,
            limit: request.limit.unwrap_or(MAX_PAGE_LIMIT),
        })
    }

    /// Search active schemes by name or description.
    ///
    /// # Errors
    /// Returns an error when the search text is too short, the page size is out
    /// of range, or storage fails.
    pub fn search_schemes(&self, request: SearchSchemesRequest) -> Result<SchemePage> {
        let store = self.open_migrated_store()?;
        store.search_schemes(&SchemeSearch {
            query: request.q,
            skip: request.skip,
            limit: request.limit.unwrap_or(MAX_PAGE_LIMIT),
        })
    }

    /// # Errors
    /// Returns an error when storage fails.
    pub fn list_categories(&self) -> Result<CategoriesResult> {
        let store = self.open_migrated_store()?;
        Ok(CategoriesResult { categories: store.list_categories()? })
    }

    /// Soft-delete a scheme; it stays listed but is never recommended.
    ///
    /// # Errors
    /// Returns [`NotFound`] when no scheme has that id, or a storage error.
    pub fn deactivate_scheme(&self, scheme_id: &str) -> Result<Scheme> {
        let mut store = self.open_migrated_store()?;
        if !store.deactivate_scheme(scheme_id)? {
            return Err(NotFound::scheme(scheme_id).into());
        }
        let scheme = store.get_scheme(scheme_id)?.ok_or_else(|| NotFound::scheme(scheme_id))?;
        Ok(scheme)
    }

    /// Validate and store a profile.
    ///
    /// # Errors
    /// Returns [`scheme_match_core::MatchError::Validation`] for an incomplete or
    /// invalid profile, or a storage error.
    pub fn put_profile(&self, request: PutProfileRequest) -> Result<StoredProfile> {
        let profile = request.profile.into_profile()?;
        let mut store = self.open_migrated_store()?;
        store.put_profile(request.profile_id, &profile)
    }

    /// # Errors
    /// Returns [`NotFound`] when no profile has that id, or a storage error.
    pub fn get_profile(&self, profile_id: ProfileId) -> Result<StoredProfile> {
        let store = self.open_migrated_store()?;
        let stored = store.get_profile(profile_id)?.ok_or_else(|| NotFound::profile(profile_id))?;
        Ok(stored)
    }

    /// # Errors
    /// Returns [`NotFound`] when no profile has that id, or a storage error.
    pub fn delete_profile(&self, profile_id: ProfileId) -> Result<DeleteProfileResult> {
        let mut store = self.open_migrated_store()?;
        if !store.delete_profile(profile_id)? {
            return Err(NotFound::profile(profile_id).into());
        }
        Ok(DeleteProfileResult { profile_id, deleted: true })
    }

    /// Evaluate a stored or inline profile against the stored catalog.
    ///
    /// # Errors
    /// Returns [`scheme_match_core::MatchError::Validation`] for a bad profile or
    /// policy, [`NotFound`] for an unknown profile id, or a storage error.
    pub fn recommend(&self, request: RecommendRequest) -> Result<RecommendationPackage> {
        let store = self.open_migrated_store()?;
        let (profile_id, profile) = match (request.profile_id, request.profile) {
            (Some(profile_id), None) => {
                let stored =
                    store.get_profile(profile_id)?.ok_or_else(|| NotFound::profile(profile_id))?;
                (Some(profile_id), stored.profile)
            }
            (None, Some(input)) => (None, input.into_profile()?),
            (Some(_), Some(_)) => {
                return Err(anyhow!("provide either profile_id or profile, not both"));
            }
            (None, None) => return Err(anyhow!("profile_id or profile is required")),
        };
        let policy = request.policy.unwrap_or_default();

        let load = store.load_catalog()?;
        let catalog_size = load.schemes.len() + load.warnings.len();
        let snapshot_id = compute_snapshot_id(&load, &profile, &policy)?;
        let report = evaluate_load(&profile, load, &policy)?;

        tracing::debug!(
            %snapshot_id,
            recommended = report.recommendations.len(),
            warnings = report.warnings.len(),
            "computed recommendations"
        );

        Ok(RecommendationPackage {
            snapshot_id,
            evaluated_at: OffsetDateTime::now_utc(),
            profile_id,
            catalog_size,
            report,
        })
    }

    /// Evaluate an inline profile against an inline catalog without touching the database.
    ///
    /// # Errors
    /// Returns [`scheme_match_core::MatchError::Validation`] for a bad profile or policy.
    pub fn evaluate_inline(request: EvaluateRequest) -> Result<EvaluationReport> {
        let profile = request.profile.into_profile()?;
        let load = scheme_match_core::decode_catalog_entries(request.catalog);
        let report = evaluate_load(&profile, load, &request.policy.unwrap_or_default())?;
        Ok(report)
    }
}

/// The bundled sample catalog.
///
/// # Errors
/// Returns an error when the bundled JSON does not decode cleanly.
pub fn seed_catalog() -> Result<Vec<Scheme>> {
    let load = decode_catalog_json(SEED_CATALOG_JSON)?;
    if let Some(warning) = load.warnings.first() {
        return Err(anyhow!("bundled seed catalog is invalid: {}", warning.message));
    }
    Ok(load.schemes)
}

/// Read a match policy from a YAML file.
///
/// # Errors
/// Returns an error when the file is unreadable, has unknown keys, or holds
/// out-of-range values.
pub fn load_policy_file(path: &Path) -> Result<MatchPolicy> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read policy file {}", path.display()))?;
    let policy: MatchPolicy = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse policy file {}", path.display()))?;
    policy.validate()?;
    Ok(policy)
}

/// Read a catalog document (a JSON array of scheme records) from disk.
///
/// # Errors
/// Returns an error when the file is unreadable or is not a JSON array.
pub fn load_catalog_file(path: &Path) -> Result<Vec<serde_json::Value>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read catalog file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse catalog file {}", path.display()))?;
    match value {
        serde_json::Value::Array(entries) => Ok(entries),
        _ => Err(anyhow!("catalog file {} MUST hold a JSON array", path.display())),
    }
}

fn compute_snapshot_id(load: &CatalogLoad, profile: &Profile, policy: &MatchPolicy) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(profile).context("failed to serialize profile")?);
    hasher.update(serde_json::to_vec(policy).context("failed to serialize policy")?);

    let mut sorted_schemes = load
        .schemes
        .iter()
        .map(|scheme| serde_json::to_string(scheme).map(|json| (scheme.id.as_str(), json)))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to serialize catalog")?;
    sorted_schemes.sort_unstable();

    for (scheme_id, json) in sorted_schemes {
        hasher.update(scheme_id.as_bytes());
        hasher.update(json.as_bytes());
    }

    // Skipped rows are part of the snapshot.
    let mut sorted_warnings = load
        .warnings
        .iter()
        .map(|warning| (warning.scheme_id.as_deref().unwrap_or_default(), warning.message.as_str()))
        .collect::<Vec<_>>();
    sorted_warnings.sort_unstable();

    for (scheme_id, message) in sorted_warnings {
        hasher.update(b"warning");
        hasher.update(scheme_id.as_bytes());
        hasher.update(message.as_bytes());
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    Ok(format!("snap_{}", &digest_hex[..16]))
}
