//! Campaign persistence.
//!
//! The orchestrator only sees the [`PersistenceGateway`] trait. Two gateways
//! ship with the crate: [`JsonFileGateway`], one JSON file per session, and
//! [`InMemoryGateway`] for tests and embedding.

use crate::session::{CampaignSession, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("No saved session {0}")]
    NotFound(SessionId),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Current save file version.
pub const SAVE_VERSION: u32 = 1;

/// Loads and saves campaign sessions.
///
/// `save_session` is only ever called between turns, so whatever the store
/// holds is a state some completed turn left behind.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn load_session(&self, id: SessionId) -> Result<CampaignSession, PersistError>;

    async fn save_session(&self, session: &CampaignSession) -> Result<(), PersistError>;
}

/// A session as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedCampaign {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was created, in seconds since the Unix epoch.
    pub saved_at: String,

    pub metadata: SaveMetadata,

    pub session: CampaignSession,
}

/// Enough about a save to list it without loading the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub session_id: SessionId,
    pub campaign_name: String,
    pub character_name: String,
    pub level: u8,
    pub location: String,
    pub turns: u64,
    #[serde(default)]
    pub in_combat: bool,
}

impl SavedCampaign {
    pub fn new(session: CampaignSession) -> Self {
        let state = &session.state;
        let metadata = SaveMetadata {
            session_id: session.id,
            campaign_name: session.campaign_name.clone(),
            character_name: state.player.name.clone(),
            level: state.player.level,
            location: state
                .world
                .current_location()
                .map(|l| l.name.clone())
                .unwrap_or_default(),
            turns: session.turn_count,
            in_combat: state.in_combat(),
        };
        Self {
            version: SAVE_VERSION,
            saved_at: unix_now(),
            metadata,
            session,
        }
    }

    fn check_version(found: u32) -> Result<(), PersistError> {
        if found != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found,
            });
        }
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;
        Self::check_version(saved.version)?;
        Ok(saved)
    }

    /// Read a save's metadata without deserializing the session.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SaveMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SaveMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;
        Self::check_version(partial.version)?;
        Ok(partial.metadata)
    }
}

/// Stores each session as `<dir>/<session id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileGateway {
    dir: PathBuf,
}

impl JsonFileGateway {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Metadata for every readable save in the directory, by campaign name.
    pub async fn list_saves(&self) -> Result<Vec<SaveMetadata>, PersistError> {
        let mut saves = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(saves),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Ok(metadata) = SavedCampaign::peek_metadata(&path).await {
                    saves.push(metadata);
                }
            }
        }
        saves.sort_by(|a, b| a.campaign_name.cmp(&b.campaign_name).then(b.turns.cmp(&a.turns)));
        Ok(saves)
    }
}

#[async_trait]
impl PersistenceGateway for JsonFileGateway {
    async fn load_session(&self, id: SessionId) -> Result<CampaignSession, PersistError> {
        let path = self.path_for(id);
        match SavedCampaign::load_json(&path).await {
            Ok(saved) => Ok(saved.session),
            Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistError::NotFound(id))
            }
            Err(e) => Err(e),
        }
    }

    async fn save_session(&self, session: &CampaignSession) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(session.id);
        let tmp = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(&SavedCampaign::new(session.clone()))?;
        fs::write(&tmp, content).await?;
        // Readers never see a half-written save.
        fs::rename(&tmp, &path).await?;

        info!(session = %session.id, path = %path.display(), "session saved");
        Ok(())
    }
}

/// Keeps sessions in memory. Failures can be injected for tests.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    sessions: Mutex<HashMap<SessionId, String>>,
    fail_saves: AtomicUsize,
    saves: AtomicUsize,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail with [`PersistError::Unavailable`].
    pub fn fail_next_saves(&self, n: usize) {
        self.fail_saves.store(n, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().await.contains_key(&id)
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn load_session(&self, id: SessionId) -> Result<CampaignSession, PersistError> {
        let sessions = self.sessions.lock().await;
        let raw = sessions.get(&id).ok_or(PersistError::NotFound(id))?;
        let saved: SavedCampaign = serde_json::from_str(raw)?;
        SavedCampaign::check_version(saved.version)?;
        Ok(saved.session)
    }

    async fn save_session(&self, session: &CampaignSession) -> Result<(), PersistError> {
        let failing = self
            .fail_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PersistError::Unavailable("injected save failure".to_string()));
        }

        // Round-trip through JSON so a load never shares state with the saved session.
        let raw = serde_json::to_string(&SavedCampaign::new(session.clone()))?;
        self.sessions.lock().await.insert(session.id, raw);
        self.saves.fetch_add(1, Ordering::SeqCst);
        debug!(session = %session.id, "session saved in memory");
        Ok(())
    }
}

/// Seconds since the Unix epoch, as a string.
fn unix_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_session;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let gateway = JsonFileGateway::new(dir.path());
        let session = sample_session();

        gateway.save_session(&session).await.unwrap();
        let loaded = gateway.load_session(session.id).await.unwrap();

        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.state, session.state);
        assert_eq!(loaded.log, session.log);
        assert!(!gateway.path_for(session.id).with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let dir = TempDir::new().unwrap();
        let gateway = JsonFileGateway::new(dir.path());
        let id = SessionId::new();
        assert!(matches!(
            gateway.load_session(id).await,
            Err(PersistError::NotFound(found)) if found == id
        ));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let gateway = JsonFileGateway::new(dir.path());
        let session = sample_session();

        let mut saved = SavedCampaign::new(session.clone());
        saved.version = 99;
        let path = gateway.path_for(session.id);
        std::fs::write(&path, serde_json::to_string(&saved).unwrap()).unwrap();

        assert!(matches!(
            gateway.load_session(session.id).await,
            Err(PersistError::VersionMismatch { expected: 1, found: 99 })
        ));
    }

    #[tokio::test]
    async fn test_list_saves() {
        let dir = TempDir::new().unwrap();
        let gateway = JsonFileGateway::new(dir.path());
        assert!(gateway.list_saves().await.unwrap().is_empty());

        let session = sample_session();
        gateway.save_session(&session).await.unwrap();
        std::fs::write(dir.path().join("notes.json"), "not a save").unwrap();

        let saves = gateway.list_saves().await.unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].character_name, "Aria");
        assert_eq!(saves[0].location, "Crossroads Inn");
    }

    #[tokio::test]
    async fn test_in_memory_injected_failure() {
        let gateway = InMemoryGateway::new();
        let session = sample_session();

        gateway.fail_next_saves(1);
        assert!(matches!(
            gateway.save_session(&session).await,
            Err(PersistError::Unavailable(_))
        ));
        assert!(!gateway.contains(session.id).await);

        gateway.save_session(&session).await.unwrap();
        assert_eq!(gateway.save_count(), 1);
        let loaded = gateway.load_session(session.id).await.unwrap();
        assert_eq!(loaded.state, session.state);
    }
}
