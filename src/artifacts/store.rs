use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::artifacts::{ArtifactKind, ArtifactRecord, ArtifactStatus, OverwriteToken};
use crate::error::{AppError, Result};
use crate::workflow::state::TransitionRecord;
use crate::workflow::types::RunId;

const AUDIT_LOG_FILE: &str = "transitions.json";

enum WriteMode<'a> {
    Draft(&'a str),
    Finalize,
    Overwrite,
}

/// Filesystem artifact store: `<root>/<run id>/<kind>.<ext>` plus a
/// `<kind>.meta.json` record per artifact.
///
/// Writes are serialized through one lock, which makes the finalized check
/// and the write a single step even when phases run concurrently.
pub struct ArtifactStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn scope_dir(&self, run: &RunId) -> PathBuf {
        self.root.join(run.as_str())
    }

    fn content_path(&self, run: &RunId, kind: ArtifactKind) -> PathBuf {
        self.scope_dir(run)
            .join(format!("{}.{}", kind.slug(), kind.extension()))
    }

    fn meta_path(&self, run: &RunId, kind: ArtifactKind) -> PathBuf {
        self.scope_dir(run).join(format!("{}.meta.json", kind.slug()))
    }

    /// Finalize `content` under `(run, kind)`. Fails if already finalized.
    pub async fn put(&self, run: &RunId, kind: ArtifactKind, content: &str) -> Result<ArtifactRecord> {
        self.write(run, kind, content, WriteMode::Finalize).await
    }

    /// Store partial output, marked as a draft with `note` explaining why.
    /// A finalized artifact can never be downgraded to a draft.
    pub async fn put_draft(
        &self,
        run: &RunId,
        kind: ArtifactKind,
        content: &str,
        note: &str,
    ) -> Result<ArtifactRecord> {
        self.write(run, kind, content, WriteMode::Draft(note)).await
    }

    /// Replace a finalized decision. Only the decision key accepts overwrites.
    pub async fn put_overwrite(
        &self,
        run: &RunId,
        kind: ArtifactKind,
        content: &str,
        _token: &OverwriteToken,
    ) -> Result<ArtifactRecord> {
        if kind != ArtifactKind::Decision {
            return Err(AppError::Internal(format!(
                "Overwrite requested for {kind}; only the decision may be overwritten"
            )));
        }
        self.write(run, kind, content, WriteMode::Overwrite).await
    }

    pub async fn put_json<T: Serialize>(
        &self,
        run: &RunId,
        kind: ArtifactKind,
        value: &T,
    ) -> Result<ArtifactRecord> {
        let content = serde_json::to_string_pretty(value)?;
        self.put(run, kind, &content).await
    }

    pub async fn put_draft_json<T: Serialize>(
        &self,
        run: &RunId,
        kind: ArtifactKind,
        value: &T,
        note: &str,
    ) -> Result<ArtifactRecord> {
        let content = serde_json::to_string_pretty(value)?;
        self.put_draft(run, kind, &content, note).await
    }

    async fn write(
        &self,
        run: &RunId,
        kind: ArtifactKind,
        content: &str,
        mode: WriteMode<'_>,
    ) -> Result<ArtifactRecord> {
        let _guard = self.write_lock.lock().await;

        let existing = self.record(run, kind).await?;
        let already_final = existing.as_ref().is_some_and(ArtifactRecord::is_finalized);

        if already_final && !matches!(mode, WriteMode::Overwrite) {
            return Err(AppError::ArtifactConflict(format!("{kind} of run {run}")));
        }

        let (status, note) = match mode {
            WriteMode::Draft(note) => (ArtifactStatus::Draft, Some(note.to_string())),
            WriteMode::Finalize => (ArtifactStatus::Finalized, None),
            WriteMode::Overwrite => (
                ArtifactStatus::Finalized,
                already_final.then(|| "replaced by decision retry".to_string()),
            ),
        };

        let record = ArtifactRecord {
            kind,
            status,
            sha256: hex::encode(Sha256::digest(content.as_bytes())),
            bytes: content.len(),
            written_at: Utc::now(),
            revision: existing.map_or(1, |r| r.revision + 1),
            note,
        };

        let dir = self.scope_dir(run);
        tokio::fs::create_dir_all(&dir).await?;

        // Content first, record last: a record never points at content that is not there.
        write_atomic(&self.content_path(run, kind), content.as_bytes()).await?;
        write_atomic(
            &self.meta_path(run, kind),
            serde_json::to_string_pretty(&record)?.as_bytes(),
        )
        .await?;

        tracing::debug!(run = %run, kind = %kind, status = ?record.status, revision = record.revision, "Wrote artifact");
        Ok(record)
    }

    /// Content of a finalized artifact.
    pub async fn get(&self, run: &RunId, kind: ArtifactKind) -> Result<String> {
        match self.record(run, kind).await? {
            Some(record) if record.is_finalized() => {
                Ok(tokio::fs::read_to_string(self.content_path(run, kind)).await?)
            }
            Some(_) => Err(AppError::ArtifactNotFound(format!(
                "{kind} of run {run} is only a draft"
            ))),
            None => Err(AppError::ArtifactNotFound(format!("{kind} of run {run}"))),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, run: &RunId, kind: ArtifactKind) -> Result<T> {
        let content = self.get(run, kind).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Record and content regardless of status, for inspection.
    pub async fn inspect(
        &self,
        run: &RunId,
        kind: ArtifactKind,
    ) -> Result<Option<(ArtifactRecord, String)>> {
        let Some(record) = self.record(run, kind).await? else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(self.content_path(run, kind)).await?;
        Ok(Some((record, content)))
    }

    pub async fn record(&self, run: &RunId, kind: ArtifactKind) -> Result<Option<ArtifactRecord>> {
        match tokio::fs::read_to_string(self.meta_path(run, kind)).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Kinds that are not finalized for `run`, in enumeration order.
    pub async fn missing(&self, run: &RunId) -> Result<Vec<ArtifactKind>> {
        let mut missing = Vec::new();
        for kind in ArtifactKind::ALL {
            let finalized = self
                .record(run, kind)
                .await?
                .is_some_and(|r| r.is_finalized());
            if !finalized {
                missing.push(kind);
            }
        }
        Ok(missing)
    }

    /// Whether any artifact has been written for `run`.
    pub async fn run_exists(&self, run: &RunId) -> bool {
        tokio::fs::metadata(self.scope_dir(run))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Persist the phase transition log. Rewritten on every transition.
    pub async fn write_audit_log(&self, run: &RunId, log: &[TransitionRecord]) -> Result<()> {
        let dir = self.scope_dir(run);
        tokio::fs::create_dir_all(&dir).await?;
        write_atomic(
            &dir.join(AUDIT_LOG_FILE),
            serde_json::to_string_pretty(log)?.as_bytes(),
        )
        .await
    }

    pub async fn read_audit_log(&self, run: &RunId) -> Result<Vec<TransitionRecord>> {
        match tokio::fs::read_to_string(self.scope_dir(run).join(AUDIT_LOG_FILE)).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write via a sibling temp file and rename, so readers never see half a file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::SolverId;
    use chrono::TimeZone;

    fn run_id() -> RunId {
        RunId::new("T1", Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_put_then_get_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = run_id();

        let record = store.put(&run, ArtifactKind::Task, "{\"id\":\"T1\"}").await.unwrap();
        assert!(record.is_finalized());
        assert_eq!(record.revision, 1);

        let first = store.get(&run, ArtifactKind::Task).await.unwrap();
        let second = store.get(&run, ArtifactKind::Task).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "{\"id\":\"T1\"}");
    }

    #[tokio::test]
    async fn test_second_put_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = run_id();

        store.put(&run, ArtifactKind::Task, "one").await.unwrap();
        let err = store.put(&run, ArtifactKind::Task, "two").await.unwrap_err();
        assert!(matches!(err, AppError::ArtifactConflict(_)));
        assert_eq!(store.get(&run, ArtifactKind::Task).await.unwrap(), "one");
    }

    #[tokio::test]
    async fn test_draft_is_not_served_then_finalizes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = run_id();
        let kind = ArtifactKind::Approach(SolverId::A);

        store.put_draft(&run, kind, "partial", "capability_timeout").await.unwrap();
        assert!(matches!(
            store.get(&run, kind).await,
            Err(AppError::ArtifactNotFound(_))
        ));

        let (record, content) = store.inspect(&run, kind).await.unwrap().unwrap();
        assert_eq!(record.status, ArtifactStatus::Draft);
        assert_eq!(record.note.as_deref(), Some("capability_timeout"));
        assert_eq!(content, "partial");

        let record = store.put(&run, kind, "complete").await.unwrap();
        assert_eq!(record.revision, 2);
        assert_eq!(store.get(&run, kind).await.unwrap(), "complete");
    }

    #[tokio::test]
    async fn test_finalized_cannot_become_draft() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = run_id();

        store.put(&run, ArtifactKind::Decision, "v1").await.unwrap();
        let err = store
            .put_draft(&run, ArtifactKind::Decision, "bad", "invalid")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ArtifactConflict(_)));
    }

    #[tokio::test]
    async fn test_overwrite_token_only_for_decision() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = run_id();
        let token = OverwriteToken::for_decision_retry();

        store.put(&run, ArtifactKind::Decision, "v1").await.unwrap();
        let record = store
            .put_overwrite(&run, ArtifactKind::Decision, "v2", &token)
            .await
            .unwrap();
        assert!(record.is_finalized());
        assert_eq!(record.note.as_deref(), Some("replaced by decision retry"));
        assert_eq!(store.get(&run, ArtifactKind::Decision).await.unwrap(), "v2");

        store.put(&run, ArtifactKind::Task, "t").await.unwrap();
        assert!(store
            .put_overwrite(&run, ArtifactKind::Task, "t2", &token)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_lists_unfinalized_kinds() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = run_id();

        assert_eq!(store.missing(&run).await.unwrap().len(), 8);

        store.put(&run, ArtifactKind::Task, "t").await.unwrap();
        store
            .put_draft(&run, ArtifactKind::Approach(SolverId::A), "x", "failed")
            .await
            .unwrap();

        let missing = store.missing(&run).await.unwrap();
        assert_eq!(missing.len(), 7);
        assert!(!missing.contains(&ArtifactKind::Task));
        assert!(missing.contains(&ArtifactKind::Approach(SolverId::A)));
    }

    #[tokio::test]
    async fn test_concurrent_finalize_has_one_winner() {
        let tmp = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(ArtifactStore::new(tmp.path()));
        let run = run_id();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let run = run.clone();
                tokio::spawn(async move {
                    store
                        .put(&run, ArtifactKind::Submission, &format!("writer {i}"))
                        .await
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_audit_log_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = run_id();

        assert!(store.read_audit_log(&run).await.unwrap().is_empty());

        let machine = crate::workflow::state::StateMachine::new();
        store.write_audit_log(&run, machine.log()).await.unwrap();
        assert_eq!(store.read_audit_log(&run).await.unwrap(), machine.log());
    }
}
