use std::fmt::{Display, Formatter};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use scheme_match_core::{
    decode_catalog_entries, CatalogLoad, EvaluationWarning, Profile, Scheme, WarningKind,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

/// Largest page `list_schemes` will return.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Shortest text `search_schemes` accepts.
pub const MIN_SEARCH_LEN: usize = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schemes (
  scheme_id TEXT PRIMARY KEY CHECK (length(trim(scheme_id)) > 0),
  name TEXT NOT NULL,
  category TEXT NOT NULL,
  state TEXT,
  is_active INTEGER NOT NULL CHECK (is_active IN (0, 1)),
  scheme_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_schemes_category ON schemes(category);
CREATE INDEX IF NOT EXISTS idx_schemes_state ON schemes(state);
CREATE INDEX IF NOT EXISTS idx_schemes_active ON schemes(is_active);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS profiles (
  profile_id TEXT PRIMARY KEY,
  profile_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

const MIGRATIONS: [(i64, &str); 2] = [(1, MIGRATION_001_SQL), (2, MIGRATION_002_SQL)];

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProfileId(pub Ulid);

impl ProfileId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// # Errors
    /// Returns an error when `raw` is not a ULID.
    pub fn parse(raw: &str) -> Result<Self> {
        let parsed =
            Ulid::from_string(raw.trim()).with_context(|| format!("invalid profile id: {raw}"))?;
        Ok(Self(parsed))
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ProfileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemeFilter {
    pub state: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
    pub skip: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemeSearch {
    pub query: String,
    pub skip: usize,
    pub limit: usize,
}

/// One page of schemes. Rows that no longer decode are reported in
/// `warnings` instead of failing the page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemePage {
    pub total: usize,
    pub skip: usize,
    pub limit: usize,
    pub schemes: Vec<Scheme>,
    #[serde(default)]
    pub warnings: Vec<EvaluationWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredProfile {
    pub profile_id: ProfileId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub profile: Profile,
}

impl SqliteStore {
    /// Open a SQLite-backed catalog store and configure required runtime pragmas.
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
        let pending_versions = MIGRATIONS
            .iter()
            .map(|(version, _)| *version)
            .filter(|version| *version > current_version)
            .collect::<Vec<_>>();

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when the database is newer than this build or any migration fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let current = current_schema_version(&self.conn)?;
        if current > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {current}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (version, sql) in MIGRATIONS {
            if version <= current {
                continue;
            }
            let tx = self
                .conn
                .transaction()
                .with_context(|| format!("failed to start migration v{version} transaction"))?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
            record_schema_version(&tx, version)?;
            tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
            tracing::info!(version, "applied schema migration");
        }

        Ok(())
    }

    /// Validate and insert or replace one scheme record.
    ///
    /// # Errors
    /// Returns an error when the scheme fails validation or the write fails.
    pub fn upsert_scheme(&mut self, scheme: &Scheme) -> Result<UpsertOutcome> {
        scheme.validate().map_err(|err| anyhow!("scheme validation failed: {err}"))?;
        let scheme_json = serde_json::to_string(scheme).context("failed to serialize scheme")?;
        let now = now_rfc3339()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start transaction")?;
        let exists = scheme_exists(&tx, &scheme.id)?;
        if exists {
            tx.execute(
                "UPDATE schemes
                 SET name = ?2, category = ?3, state = ?4, is_active = ?5, scheme_json = ?6, updated_at = ?7
                 WHERE scheme_id = ?1",
                params![
                    scheme.id,
                    scheme.name,
                    scheme.category,
                    scheme.state,
                    scheme.is_active,
                    scheme_json,
                    now
                ],
            )
            .context("failed to update scheme")?;
        } else {
            insert_scheme_row(&tx, scheme, &scheme_json, &now)?;
        }
        tx.commit().context("failed to commit scheme transaction")?;

        Ok(if exists { UpsertOutcome::Updated } else { UpsertOutcome::Inserted })
    }

    /// Insert a scheme unless one with the same id is already stored.
    ///
    /// Returns `true` when the scheme was inserted.
    ///
    /// # Errors
    /// Returns an error when the scheme fails validation or the write fails.
    pub fn insert_scheme_if_absent(&mut self, scheme: &Scheme) -> Result<bool> {
        scheme.validate().map_err(|err| anyhow!("scheme validation failed: {err}"))?;
        let scheme_json = serde_json::to_string(scheme).context("failed to serialize scheme")?;
        let now = now_rfc3339()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start transaction")?;
        if scheme_exists(&tx, &scheme.id)? {
            return Ok(false);
        }
        insert_scheme_row(&tx, scheme, &scheme_json, &now)?;
        tx.commit().context("failed to commit scheme transaction")?;
        Ok(true)
    }

    /// # Errors
    /// Returns an error when the lookup fails or the stored record cannot be decoded.
    pub fn get_scheme(&self, scheme_id: &str) -> Result<Option<Scheme>> {
        let row = self
            .conn
            .query_row(
                "SELECT scheme_json, is_active FROM schemes WHERE scheme_id = ?1",
                params![scheme_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()
            .context("failed to query scheme")?;

        match row {
            Some((json, is_active)) => {
                let mut scheme: Scheme = serde_json::from_str(&json)
                    .with_context(|| format!("failed to deserialize stored scheme {scheme_id}"))?;
                scheme.is_active = is_active;
                Ok(Some(scheme))
            }
            None => Ok(None),
        }
    }

    /// List stored schemes ordered by id, filtered and paginated.
    ///
    /// # Errors
    /// Returns an error when `limit` is outside `1..=100` or the table cannot be read.
    pub fn list_schemes(&self, filter: &SchemeFilter) -> Result<SchemePage> {
        check_page_limit(filter.limit)?;

        let where_clause = "WHERE (?1 IS NULL OR state = ?1 COLLATE NOCASE)
               AND (?2 IS NULL OR category = ?2 COLLATE NOCASE)
               AND (?3 IS NULL OR is_active = ?3)";
        let total = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM schemes {where_clause}"),
                params![filter.state, filter.category, filter.is_active],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to count schemes")?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT scheme_id, scheme_json, is_active FROM schemes {where_clause}
             ORDER BY scheme_id ASC
             LIMIT ?4 OFFSET ?5"
        ))?;
        let mut rows = stmt.query(params![
            filter.state,
            filter.category,
            filter.is_active,
            i64::try_from(filter.limit).context("limit out of range")?,
            i64::try_from(filter.skip).context("skip out of range")?,
        ])?;

        let mut schemes = Vec::new();
        let mut warnings = Vec::new();
        let mut entry_index = filter.skip;
        while let Some(row) = rows.next()? {
            match decode_stored_scheme(entry_index, row.get(0)?, row.get(1)?, row.get(2)?) {
                Ok(scheme) => schemes.push(scheme),
                Err(warning) => warnings.push(warning),
            }
            entry_index += 1;
        }

        Ok(SchemePage {
            total: usize::try_from(total).context("scheme count out of range")?,
            skip: filter.skip,
            limit: filter.limit,
            schemes,
            warnings,
        })
    }

    /// Find active schemes whose name or description contains `query`,
    /// ignoring case. Matches are ordered by id and paginated.
    ///
    /// # Errors
    /// Returns an error when the query is shorter than two characters, `limit`
    /// is outside `1..=100`, or the table cannot be read.
    pub fn search_schemes(&self, search: &SchemeSearch) -> Result<SchemePage> {
        let needle = search.query.trim().to_lowercase();
        if needle.chars().count() < MIN_SEARCH_LEN {
            return Err(anyhow!(
                "search text MUST be at least {MIN_SEARCH_LEN} characters, got `{}`",
                search.query
            ));
        }
        check_page_limit(search.limit)?;

        let mut stmt = self.conn.prepare(
            "SELECT scheme_id, name, scheme_json FROM schemes WHERE is_active = 1
             ORDER BY scheme_id ASC",
        )?;
        let mut rows = stmt.query([])?;

        let mut total = 0_usize;
        let mut schemes = Vec::new();
        let mut warnings = Vec::new();
        let mut entry_index = 0_usize;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let decoded = decode_stored_scheme(entry_index, row.get(0)?, row.get(2)?, true);
            entry_index += 1;

            let hit = match &decoded {
                Ok(scheme) => {
                    scheme.name.to_lowercase().contains(&needle)
                        || scheme.description.to_lowercase().contains(&needle)
                }
                Err(_) => name.to_lowercase().contains(&needle),
            };
            if !hit {
                continue;
            }
            total += 1;
            if total <= search.skip || total > search.skip.saturating_add(search.limit) {
                continue;
            }
            match decoded {
                Ok(scheme) => schemes.push(scheme),
                Err(warning) => warnings.push(warning),
            }
        }

        Ok(SchemePage { total, skip: search.skip, limit: search.limit, schemes, warnings })
    }

    /// Distinct non-blank categories across the whole catalog, sorted.
    ///
    /// # Errors
    /// Returns an error when the table cannot be read.
    pub fn list_categories(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT category FROM schemes
             WHERE length(trim(category)) > 0
             ORDER BY category ASC",
        )?;
        let categories = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to list scheme categories")?;
        Ok(categories)
    }

    /// Soft-delete a scheme by marking it inactive.
    ///
    /// Returns `false` when no scheme has that id.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn deactivate_scheme(&mut self, scheme_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE schemes SET is_active = 0, updated_at = ?2 WHERE scheme_id = ?1",
                params![scheme_id, now_rfc3339()?],
            )
            .context("failed to deactivate scheme")?;
        Ok(changed > 0)
    }

    /// Load every stored scheme, in id order, as an evaluation snapshot.
    ///
    /// Rows whose JSON no longer decodes into a valid record are returned as
    /// warnings instead of failing the load.
    ///
    /// # Errors
    /// Returns an error when the table cannot be read.
    pub fn load_catalog(&self) -> Result<CatalogLoad> {
        let mut stmt = self.conn.prepare(
            "SELECT scheme_id, scheme_json, is_active FROM schemes ORDER BY scheme_id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut load = CatalogLoad::default();
        let mut entry_index = 0_usize;

        while let Some(row) = rows.next()? {
            match decode_stored_scheme(entry_index, row.get(0)?, row.get(1)?, row.get(2)?) {
                Ok(scheme) => load.schemes.push(scheme),
                Err(warning) => load.warnings.push(warning),
            }
            entry_index += 1;
        }

        Ok(load)
    }

    /// Store a validated profile, creating a new id unless one is given.
    ///
    /// # Errors
    /// Returns an error when the profile fails validation or the write fails.
    pub fn put_profile(
        &mut self,
        profile_id: Option<ProfileId>,
        profile: &Profile,
    ) -> Result<StoredProfile> {
        profile.validate().map_err(|err| anyhow!("profile validation failed: {err}"))?;
        let profile_id = profile_id.unwrap_or_default();
        let profile_json = serde_json::to_string(profile).context("failed to serialize profile")?;
        let now = OffsetDateTime::now_utc();
        let now_text = rfc3339(now)?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO profiles(profile_id, profile_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(profile_id) DO UPDATE SET
               profile_json = excluded.profile_json,
               updated_at = excluded.updated_at",
            params![profile_id.to_string(), profile_json, now_text],
        )
        .context("failed to persist profile")?;
        let created_at: String = tx
            .query_row(
                "SELECT created_at FROM profiles WHERE profile_id = ?1",
                params![profile_id.to_string()],
                |row| row.get(0),
            )
            .context("failed to read profile timestamps")?;
        tx.commit().context("failed to commit profile transaction")?;

        Ok(StoredProfile {
            profile_id,
            created_at: parse_rfc3339(&created_at)?,
            updated_at: now,
            profile: profile.clone(),
        })
    }

    /// # Errors
    /// Returns an error when the lookup fails or the stored profile cannot be decoded.
    pub fn get_profile(&self, profile_id: ProfileId) -> Result<Option<StoredProfile>> {
        let row = self
            .conn
            .query_row(
                "SELECT profile_json, created_at, updated_at FROM profiles WHERE profile_id = ?1",
                params![profile_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query profile")?;

        match row {
            Some((json, created_at, updated_at)) => Ok(Some(StoredProfile {
                profile_id,
                created_at: parse_rfc3339(&created_at)?,
                updated_at: parse_rfc3339(&updated_at)?,
                profile: serde_json::from_str(&json)
                    .with_context(|| format!("failed to deserialize stored profile {profile_id}"))?,
            })),
            None => Ok(None),
        }
    }

    /// Returns `false` when no profile has that id.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_profile(&mut self, profile_id: ProfileId) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM profiles WHERE profile_id = ?1", params![profile_id.to_string()])
            .context("failed to delete profile")?;
        Ok(changed > 0)
    }
}

fn scheme_exists(conn: &Connection, scheme_id: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM schemes WHERE scheme_id = ?1)",
            params![scheme_id],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if scheme exists: {scheme_id}"))?;
    Ok(exists == 1)
}

fn insert_scheme_row(conn: &Connection, scheme: &Scheme, scheme_json: &str, now: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schemes(
            scheme_id, name, category, state, is_active, scheme_json, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            scheme.id,
            scheme.name,
            scheme.category,
            scheme.state,
            scheme.is_active,
            scheme_json,
            now
        ],
    )
    .context("failed to insert scheme")?;
    Ok(())
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
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn check_page_limit(limit: usize) -> Result<()> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(anyhow!("limit MUST be within 1..={MAX_PAGE_LIMIT}, got {limit}"));
    }
    Ok(())
}

/// Decode one stored row; the `is_active` column wins over the JSON body.
fn decode_stored_scheme(
    entry_index: usize,
    scheme_id: String,
    json: String,
    is_active: bool,
) -> std::result::Result<Scheme, EvaluationWarning> {
    let value =
        serde_json::from_str::<serde_json::Value>(&json).unwrap_or(serde_json::Value::String(json));
    let mut decoded = decode_catalog_entries(vec![value]);
    if let Some(mut scheme) = decoded.schemes.pop() {
        scheme.is_active = is_active;
        return Ok(scheme);
    }
    let mut warning = decoded.warnings.pop().unwrap_or_else(|| EvaluationWarning {
        entry_index,
        scheme_id: None,
        kind: WarningKind::Configuration,
        message: "stored scheme row did not decode".to_string(),
    });
    warning.entry_index = entry_index;
    warning.scheme_id.get_or_insert(scheme_id);
    Err(warning)
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
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

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use super::*;
    use scheme_match_core::{
        BenefitType, Condition, Gender, Language, Predicate, RuleNode, WarningKind,
    };

    fn mk_scheme(id: &str, category: &str, state: Option<&str>) -> Scheme {
        Scheme {
            id: id.to_string(),
            name: format!("{id} scheme"),
            category: category.to_string(),
            description: "store fixture".to_string(),
            department: Some("Ministry of Rural Development".to_string()),
            benefit_amount: Some(12_000.0),
            benefit_type: BenefitType::Subsidy,
            is_central: state.is_none(),
            state: state.map(str::to_string),
            application_url: None,
            required_documents: vec!["Aadhaar card".to_string(), "Income certificate".to_string()],
            is_active: true,
            eligibility: Some(RuleNode::Predicate(Predicate {
                field: "annual_income".to_string(),
                condition: Condition::Lte { value: 250_000.0 },
                weight: 1.0,
                mandatory: true,
            })),
        }
    }

    fn mk_profile() -> Profile {
        Profile {
            full_name: Some("Lakshmi Iyer".to_string()),
            age: 62,
            gender: Gender::Female,
            annual_income: 40_000.0,
            state: "Tamil Nadu".to_string(),
            district: "Madurai".to_string(),
            occupation: "retired".to_string(),
            family_size: 2,
            is_bpl: true,
            has_disability: false,
            preferred_language: Language::Ta,
            caste_category: None,
            education_level: Some("secondary".to_string()),
            land_ownership: None,
        }
    }

    fn migrated_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn page(limit: usize) -> SchemeFilter {
        SchemeFilter { limit, ..SchemeFilter::default() }
    }

    #[test]
    fn schema_status_reports_pending_then_current() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        let before = store.schema_status()?;
        assert_eq!(before.current_version, 0);
        assert_eq!(before.pending_versions, vec![1, 2]);

        store.migrate()?;
        store.migrate()?;
        let after = store.schema_status()?;
        assert_eq!(after.current_version, LATEST_SCHEMA_VERSION);
        assert!(after.pending_versions.is_empty());
        Ok(())
    }

    #[test]
    fn migrate_upgrades_a_v1_database() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;
        store.conn.execute_batch(MIGRATION_001_SQL)?;
        record_schema_version(&store.conn, 1)?;
        assert_eq!(store.schema_status()?.pending_versions, vec![2]);

        store.migrate()?;
        assert_eq!(store.schema_status()?.current_version, 2);
        let stored = store.put_profile(None, &mk_profile())?;
        assert!(store.get_profile(stored.profile_id)?.is_some());
        Ok(())
    }

    #[test]
    fn migrate_rejects_newer_schema() -> Result<()> {
        let mut store = migrated_store()?;
        record_schema_version(&store.conn, LATEST_SCHEMA_VERSION + 1)?;
        let err = match store.migrate() {
            Ok(()) => panic!("expected unsupported schema version error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("unsupported schema version"));
        Ok(())
    }

    #[test]
    fn upsert_then_get_round_trips_scheme() -> Result<()> {
        let mut store = migrated_store()?;
        let scheme = mk_scheme("PMAY-G", "Housing", None);
        assert_eq!(store.upsert_scheme(&scheme)?, UpsertOutcome::Inserted);

        let mut renamed = scheme.clone();
        renamed.name = "Pradhan Mantri Awas Yojana - Gramin".to_string();
        assert_eq!(store.upsert_scheme(&renamed)?, UpsertOutcome::Updated);

        assert_eq!(store.get_scheme("PMAY-G")?, Some(renamed));
        assert_eq!(store.get_scheme("UNKNOWN")?, None);
        Ok(())
    }

    #[test]
    fn upsert_rejects_invalid_scheme() -> Result<()> {
        let mut store = migrated_store()?;
        let mut scheme = mk_scheme("BROKEN", "Welfare", None);
        scheme.eligibility = Some(RuleNode::Predicate(Predicate {
            field: "disability_type".to_string(),
            condition: Condition::Gte { value: 1.0 },
            weight: 1.0,
            mandatory: false,
        }));
        let err = match store.upsert_scheme(&scheme) {
            Ok(outcome) => panic!("expected validation failure, got {outcome:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("disability_type"));
        assert_eq!(store.get_scheme("BROKEN")?, None);
        Ok(())
    }

    #[test]
    fn insert_if_absent_keeps_existing_record() -> Result<()> {
        let mut store = migrated_store()?;
        let original = mk_scheme("MGNREGA", "Employment", None);
        assert!(store.insert_scheme_if_absent(&original)?);

        let mut replacement = original.clone();
        replacement.name = "should not land".to_string();
        assert!(!store.insert_scheme_if_absent(&replacement)?);
        assert_eq!(store.get_scheme("MGNREGA")?, Some(original));
        Ok(())
    }

    #[test]
    fn list_schemes_filters_and_paginates() -> Result<()> {
        let mut store = migrated_store()?;
        store.upsert_scheme(&mk_scheme("A-HOUSING", "Housing", None))?;
        store.upsert_scheme(&mk_scheme("B-HOUSING", "housing", Some("Maharashtra")))?;
        store.upsert_scheme(&mk_scheme("C-PENSION", "Social Security", Some("maharashtra")))?;
        store.upsert_scheme(&mk_scheme("D-PENSION", "Social Security", None))?;
        assert!(store.deactivate_scheme("D-PENSION")?);

        let all = store.list_schemes(&page(100))?;
        assert_eq!(all.total, 4);
        let ids = all.schemes.iter().map(|scheme| scheme.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["A-HOUSING", "B-HOUSING", "C-PENSION", "D-PENSION"]);

        let housing = store.list_schemes(&SchemeFilter {
            category: Some("HOUSING".to_string()),
            ..page(100)
        })?;
        assert_eq!(housing.total, 2);

        let maharashtra = store.list_schemes(&SchemeFilter {
            state: Some("Maharashtra".to_string()),
            ..page(100)
        })?;
        assert_eq!(maharashtra.total, 2);

        let active = store.list_schemes(&SchemeFilter { is_active: Some(true), ..page(100) })?;
        assert_eq!(active.total, 3);
        let inactive = store.list_schemes(&SchemeFilter { is_active: Some(false), ..page(100) })?;
        assert_eq!(inactive.schemes.len(), 1);
        assert!(!inactive.schemes[0].is_active);

        let second_page = store.list_schemes(&SchemeFilter { skip: 1, ..page(2) })?;
        assert_eq!(second_page.total, 4);
        let ids = second_page.schemes.iter().map(|scheme| scheme.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["B-HOUSING", "C-PENSION"]);
        Ok(())
    }

    #[test]
    fn list_schemes_rejects_out_of_range_limit() -> Result<()> {
        let store = migrated_store()?;
        assert!(store.list_schemes(&page(0)).is_err());
        assert!(store.list_schemes(&page(MAX_PAGE_LIMIT + 1)).is_err());
        Ok(())
    }

    #[test]
    fn deactivate_unknown_scheme_reports_false() -> Result<()> {
        let mut store = migrated_store()?;
        assert!(!store.deactivate_scheme("NOPE")?);
        Ok(())
    }

    #[test]
    fn load_catalog_keeps_inactive_and_warns_on_corrupt_rows() -> Result<()> {
        let mut store = migrated_store()?;
        store.upsert_scheme(&mk_scheme("B-GOOD", "Welfare", None))?;
        store.upsert_scheme(&mk_scheme("C-RETIRED", "Welfare", None))?;
        store.deactivate_scheme("C-RETIRED")?;
        store.conn.execute(
            "INSERT INTO schemes(scheme_id, name, category, state, is_active, scheme_json, created_at, updated_at)
             VALUES ('A-CORRUPT', 'x', 'y', NULL, 1, '{not json', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )?;

        let load = store.load_catalog()?;
        let ids = load.schemes.iter().map(|scheme| scheme.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["B-GOOD", "C-RETIRED"]);
        assert!(!load.schemes[1].is_active);
        assert_eq!(load.warnings.len(), 1);
        assert_eq!(load.warnings[0].entry_index, 0);
        assert_eq!(load.warnings[0].scheme_id.as_deref(), Some("A-CORRUPT"));
        assert_eq!(load.warnings[0].kind, WarningKind::Configuration);
        Ok(())
    }

    #[test]
    fn list_schemes_reports_corrupt_rows_without_failing_the_page() -> Result<()> {
        let mut store = migrated_store()?;
        store.upsert_scheme(&mk_scheme("B-GOOD", "Welfare", None))?;
        store.conn.execute(
            "INSERT INTO schemes(scheme_id, name, category, state, is_active, scheme_json, created_at, updated_at)
             VALUES ('A-CORRUPT', 'x', 'Welfare', NULL, 1, '{not json', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )?;

        let listed = store.list_schemes(&page(100))?;
        assert_eq!(listed.total, 2);
        let ids = listed.schemes.iter().map(|scheme| scheme.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["B-GOOD"]);
        assert_eq!(listed.warnings.len(), 1);
        assert_eq!(listed.warnings[0].entry_index, 0);
        assert_eq!(listed.warnings[0].scheme_id.as_deref(), Some("A-CORRUPT"));

        let second = store.list_schemes(&SchemeFilter { skip: 1, ..page(1) })?;
        assert!(second.warnings.is_empty());
        assert_eq!(second.schemes.len(), 1);
        Ok(())
    }

    #[test]
    fn search_matches_name_or_description_of_active_schemes() -> Result<()> {
        let mut store = migrated_store()?;
        store.upsert_scheme(&Scheme {
            name: "Pradhan Mantri Awas Yojana".to_string(),
            description: "Pucca housing for rural families".to_string(),
            ..mk_scheme("PMAY-G", "Housing", None)
        })?;
        store.upsert_scheme(&Scheme {
            name: "Old Age Pension".to_string(),
            description: "Monthly support for HOUSING-less elders".to_string(),
            ..mk_scheme("NSAP-OAP", "Social Security", None)
        })?;
        store.upsert_scheme(&Scheme {
            name: "Retired housing grant".to_string(),
            ..mk_scheme("OLD-HOUSING", "Housing", None)
        })?;
        store.upsert_scheme(&Scheme {
            name: "Kisan credit".to_string(),
            ..mk_scheme("KCC", "Agriculture", None)
        })?;
        assert!(store.deactivate_scheme("OLD-HOUSING")?);

        let search = |query: &str, skip: usize, limit: usize| {
            store.search_schemes(&SchemeSearch { query: query.to_string(), skip, limit })
        };

        let hits = search("  Housing ", 0, 10)?;
        assert_eq!(hits.total, 2);
        let ids = hits.schemes.iter().map(|scheme| scheme.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["NSAP-OAP", "PMAY-G"]);

        let second = search("housing", 1, 1)?;
        assert_eq!(second.total, 2);
        let ids = second.schemes.iter().map(|scheme| scheme.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["PMAY-G"]);

        assert_eq!(search("awas", 0, 10)?.total, 1);
        assert_eq!(search("metro rail", 0, 10)?.total, 0);
        assert!(search("h", 0, 10).is_err());
        assert!(search("housing", 0, 0).is_err());
        Ok(())
    }

    #[test]
    fn categories_are_distinct_and_sorted() -> Result<()> {
        let mut store = migrated_store()?;
        assert!(store.list_categories()?.is_empty());
        store.upsert_scheme(&mk_scheme("A", "Housing", None))?;
        store.upsert_scheme(&mk_scheme("B", "Agriculture", None))?;
        store.upsert_scheme(&mk_scheme("C", "Housing", Some("Kerala")))?;
        store.upsert_scheme(&mk_scheme("D", "Social Security", None))?;
        assert!(store.deactivate_scheme("D")?);

        assert_eq!(store.list_categories()?, vec!["Agriculture", "Housing", "Social Security"]);
        Ok(())
    }

    #[test]
    fn profile_put_get_delete_lifecycle() -> Result<()> {
        let mut store = migrated_store()?;
        let stored = store.put_profile(None, &mk_profile())?;
        let fetched = match store.get_profile(stored.profile_id)? {
            Some(fetched) => fetched,
            None => panic!("stored profile should be readable"),
        };
        assert_eq!(fetched.profile, mk_profile());
        assert_eq!(fetched.created_at, stored.created_at);

        let updated = Profile { annual_income: 55_000.0, ..mk_profile() };
        let replaced = store.put_profile(Some(stored.profile_id), &updated)?;
        assert_eq!(replaced.profile_id, stored.profile_id);
        assert_eq!(replaced.created_at, stored.created_at);

        assert!(store.delete_profile(stored.profile_id)?);
        assert!(!store.delete_profile(stored.profile_id)?);
        assert!(store.get_profile(stored.profile_id)?.is_none());
        Ok(())
    }

    #[test]
    fn put_profile_rejects_invalid_profile() -> Result<()> {
        let mut store = migrated_store()?;
        let invalid = Profile { family_size: 0, ..mk_profile() };
        assert!(store.put_profile(None, &invalid).is_err());
        Ok(())
    }

    #[test]
    fn profile_id_parse_rejects_garbage() {
        assert!(ProfileId::parse("not-a-ulid").is_err());
        let id = ProfileId::new();
        match ProfileId::parse(&id.to_string()) {
            Ok(parsed) => assert_eq!(parsed, id),
            Err(err) => panic!("valid id should parse: {err}"),
        }
    }

    #[test]
    fn concurrent_writes_and_reads_preserve_catalog() -> Result<()> {
        let db_path =
            std::env::temp_dir().join(format!("scheme-match-concurrency-{}.sqlite3", Ulid::new()));
        {
            let mut init = SqliteStore::open(&db_path)?;
            init.migrate()?;
        }

        let writer_threads = 4;
        let writes_per_thread = 10;
        let mut handles = Vec::new();

        for writer in 0..writer_threads {
            let writer_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let mut store = SqliteStore::open(&writer_path)?;
                for index in 0..writes_per_thread {
                    let id = format!("W{writer}-{index:02}");
                    store.upsert_scheme(&mk_scheme(&id, "Welfare", None))?;
                }
                Ok(())
            }));
        }

        for _ in 0..2 {
            let reader_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let store = SqliteStore::open(&reader_path)?;
                for _ in 0..10 {
                    let load = store.load_catalog()?;
                    assert!(load.warnings.is_empty());
                }
                Ok(())
            }));
        }

        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => panic!("store worker thread panicked"),
            }
        }

        let store = SqliteStore::open(&db_path)?;
        assert_eq!(store.load_catalog()?.schemes.len(), writer_threads * writes_per_thread);

        drop(store);
        let _ = fs::remove_file(&db_path);
        Ok(())
    }
}
