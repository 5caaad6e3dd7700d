//! Schema-version bookkeeping and one-time seeding.
//!
//! The schema state is a single document with the fixed identity [`SCHEMA_ID`] in the
//! [`SCHEMA_COLLECTION`] collection. Each pass of [`SchemaSeedCoordinator::run`] ensures the
//! collection exists, loads (or initializes) the state, runs every registered component in order,
//! re-reads the stored state and writes back only when something changed.
//!
//! The read, seed, re-read, write sequence is not transactional. Two processes seeding the same
//! database can interleave; the re-read narrows the window and the commit merges the component
//! sets, but it does not close it.

use crate::database::DatabaseFacade;
use crate::errors::DbError;
use crate::logger::AUDIT_TARGET;
use crate::query::{Filter, FilterExpression};
use crate::types::ID_FIELD;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const SCHEMA_COLLECTION: &str = "Schema";
pub const SCHEMA_ID: &str = "schema";

/// A four-part version, `major.minor.build.revision`. Missing trailing parts read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl SchemaVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self { major, minor, build, revision }
    }
}

impl FromStr for SchemaVersion {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DbError::Serialization(format!("invalid schema version '{s}'"));
        let parts: Vec<&str> = s.trim().split('.').collect();
        if !(2..=4).contains(&parts.len()) {
            return Err(invalid());
        }
        let mut nums = [0u32; 4];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(nums[0], nums[1], nums[2], nums[3]))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
    }
}

/// The persisted schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchemaState {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "SchemaVersion")]
    pub version: String,
    #[serde(default)]
    pub seeded_components: Vec<String>,
    /// Incremented on every commit.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub updated_at: Option<bson::DateTime>,
}

impl Default for SchemaState {
    fn default() -> Self {
        Self {
            id: SCHEMA_ID.to_string(),
            version: SchemaVersion::default().to_string(),
            seeded_components: Vec::new(),
            revision: 0,
            updated_at: None,
        }
    }
}

impl SchemaState {
    /// # Errors
    /// `Serialization` if the stored version string does not parse.
    pub fn schema_version(&self) -> Result<SchemaVersion, DbError> {
        self.version.parse()
    }

    #[must_use]
    pub fn is_seeded(&self, component: &str) -> bool {
        self.seeded_components.iter().any(|c| c == component)
    }

    /// Records `component`, keeping first-seen order and no duplicates.
    pub fn mark_seeded(&mut self, component: &str) {
        if !self.is_seeded(component) {
            self.seeded_components.push(component.to_string());
        }
    }

    #[must_use]
    pub fn seeded_within(&self, other: &Self) -> bool {
        self.seeded_components.iter().all(|c| other.is_seeded(c))
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.updated_at.map(bson::DateTime::to_chrono)
    }
}

/// One idempotent seed routine. `seed` must check for its data before creating it.
#[async_trait]
pub trait SeedComponent: Send + Sync {
    fn name(&self) -> &str;

    async fn seed(&self, db: &DatabaseFacade) -> Result<(), DbError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedOutcome {
    /// The state as stored after the pass.
    pub state: SchemaState,
    /// Whether this pass wrote the schema document.
    pub committed: bool,
}

#[derive(Clone)]
pub struct SchemaSeedCoordinator {
    version: SchemaVersion,
    components: Vec<Arc<dyn SeedComponent>>,
}

impl fmt::Debug for SchemaSeedCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaSeedCoordinator")
            .field("version", &self.version)
            .field("components", &self.component_names())
            .finish()
    }
}

fn schema_filter() -> FilterExpression<SchemaState> {
    Filter::eq(ID_FIELD, SCHEMA_ID).into()
}

impl SchemaSeedCoordinator {
    #[must_use]
    pub fn new(version: SchemaVersion) -> Self {
        Self { version, components: Vec::new() }
    }

    /// Components run in registration order; register dependencies first.
    #[must_use]
    pub fn with_component(mut self, component: Arc<dyn SeedComponent>) -> Self {
        self.components.push(component);
        self
    }

    #[must_use]
    pub const fn version(&self) -> SchemaVersion {
        self.version
    }

    #[must_use]
    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    async fn load(db: &DatabaseFacade) -> Result<Option<SchemaState>, DbError> {
        db.read_first_or_default(SCHEMA_COLLECTION, &schema_filter()).await
    }

    /// Runs one seeding pass against `db`.
    ///
    /// # Errors
    /// Propagates the first failing store operation or component; nothing is committed then.
    pub async fn run(&self, db: &DatabaseFacade) -> Result<SeedOutcome, DbError> {
        if !db.collection_names().await?.iter().any(|c| c == SCHEMA_COLLECTION) {
            log::info!("creating '{SCHEMA_COLLECTION}' collection in '{}'", db.name());
            db.create_collection(SCHEMA_COLLECTION).await?;
        }

        let mut live = Self::load(db).await?.unwrap_or_default();

        for component in &self.components {
            log::debug!("seeding component '{}'", component.name());
            component.seed(db).await?;
            live.mark_seeded(component.name());
        }

        let stored = Self::load(db).await?;
        let commit = match &stored {
            None => true,
            Some(stored) => {
                let behind = match stored.schema_version() {
                    Ok(v) => v < self.version,
                    Err(e) => {
                        log::warn!("{e}; rewriting schema state");
                        true
                    }
                };
                behind || !live.seeded_within(stored)
            }
        };
        if !commit {
            log::debug!("schema state of '{}' is current at {}", db.name(), self.version);
            // `stored` is Some here: a missing document always commits.
            return Ok(SeedOutcome { state: stored.unwrap_or(live), committed: false });
        }

        let mut next = stored.clone().unwrap_or_default();
        for component in &live.seeded_components {
            next.mark_seeded(component);
        }
        next.id = SCHEMA_ID.to_string();
        // Never move the stored version backwards; older code may still add components.
        let stored_version = stored.as_ref().and_then(|s| s.schema_version().ok());
        next.version = stored_version.map_or(self.version, |v| v.max(self.version)).to_string();
        next.revision = stored.as_ref().map_or(1, |s| s.revision + 1);
        next.updated_at = Some(bson::DateTime::now());
        db.write(SCHEMA_COLLECTION, &next).await?;
        log::info!(
            target: AUDIT_TARGET,
            "schema of '{}' committed at {} (revision {}, components {:?})",
            db.name(),
            next.version,
            next.revision,
            next.seeded_components
        );
        Ok(SeedOutcome { state: next, committed: true })
    }
}
