use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::codec::headers::sanitize_headers;
use crate::errors::{TemplateError, TemplateErrorKind, TemplateResult};
use crate::lifecycle::{apply_outcome, Outcome};
use crate::model::Template;
use crate::policy::LifecyclePolicy;

const EXTENSION: &str = "json";
const MAX_SLUG_LEN: usize = 64;

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Compare-and-swap on `revision`: the stored revision must equal the
    /// incoming one. Returns the committed template with its new revision.
    async fn save(&self, template: Template) -> TemplateResult<Template>;
    async fn load(&self, name: &str) -> TemplateResult<Template>;
    async fn list_all(&self) -> TemplateResult<Vec<Template>>;
    async fn delete(&self, name: &str) -> TemplateResult<()>;
    async fn record_usage(&self, name: &str, success: bool) -> TemplateResult<Template>;
    async fn record_outcome(&self, name: &str, outcome: Outcome) -> TemplateResult<Template>;
}

/// One JSON file per template under a single directory.
pub struct FileTemplateStore {
    root: PathBuf,
    policy: LifecyclePolicy,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Lowercase ASCII slug used as the storage key. Lossy, so callers must
/// check the stored name on read.
pub fn storage_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "template".to_string()
    } else {
        slug.to_string()
    }
}

/// Key used when another name already holds `name`'s slug.
pub fn fallback_key(name: &str) -> String {
    hashed_key(&storage_slug(name), name)
}

fn hashed_key(slug: &str, name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    format!("{slug}-{}", &hex::encode(digest)[..8])
}

enum KeyLookup {
    Existing(String, Template),
    Free(String),
}

impl FileTemplateStore {
    pub async fn open(root: impl Into<PathBuf>, policy: LifecyclePolicy) -> TemplateResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            policy,
            locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{EXTENSION}"))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Locks both keys `name` may live under, in sorted order. A fallback
    /// key can equal another name's slug, so the two writers meet on it.
    async fn lock_keys(&self, name: &str) -> Vec<OwnedMutexGuard<()>> {
        let slug = storage_slug(name);
        let mut keys = vec![hashed_key(&slug, name), slug];
        keys.sort();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock_for(&key).lock_owned().await);
        }
        guards
    }

    async fn read_file(&self, path: &Path) -> TemplateResult<Option<Template>> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
                TemplateErrorKind::Corrupt(format!("{}: {err}", path.display())).into()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Primary key is the slug; a different name already holding it pushes
    /// this one to `slug-<hash>`. Both taken by others is a conflict.
    async fn lookup(&self, name: &str) -> TemplateResult<KeyLookup> {
        let slug = storage_slug(name);
        let hashed = hashed_key(&slug, name);
        let primary = self.read_file(&self.path_for(&slug)).await?;
        if let Some(existing) = &primary {
            if existing.name == name {
                return Ok(KeyLookup::Existing(slug, existing.clone()));
            }
        }
        let secondary = self.read_file(&self.path_for(&hashed)).await?;
        match (primary, secondary) {
            (_, Some(existing)) if existing.name == name => Ok(KeyLookup::Existing(hashed, existing)),
            (None, _) => Ok(KeyLookup::Free(slug)),
            (Some(_), None) => Ok(KeyLookup::Free(hashed)),
            (Some(_), Some(other)) => Err(TemplateError::conflict(format!(
                "storage keys for '{name}' are held by '{}'",
                other.name
            ))),
        }
    }

    async fn write_atomic(&self, key: &str, template: &Template) -> TemplateResult<()> {
        let bytes = serde_json::to_vec_pretty(template)
            .map_err(|err| TemplateErrorKind::Io(err.to_string()))?;
        let final_path = self.path_for(key);
        let tmp_path = self
            .root
            .join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &final_path).await
        }
        .await;

        if let Err(err) = result {
            if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                debug!(?cleanup, path = %tmp_path.display(), "temp file cleanup failed");
            }
            return Err(err.into());
        }
        Ok(())
    }

    async fn commit(&self, key: &str, mut template: Template) -> TemplateResult<Template> {
        let (headers, dropped) = sanitize_headers(&template.headers);
        if !dropped.is_empty() {
            debug!(template = %template.name, ?dropped, "dropping sensitive headers on save");
        }
        template.headers = headers;
        template.revision += 1;
        template.updated_at = Utc::now();
        self.write_atomic(key, &template).await?;
        Ok(template)
    }
}

#[async_trait]
impl TemplateStore for FileTemplateStore {
    async fn save(&self, template: Template) -> TemplateResult<Template> {
        if template.name.trim().is_empty() {
            return Err(TemplateErrorKind::InvalidTemplate("empty name".into()).into());
        }
        let _guards = self.lock_keys(&template.name).await;

        let key = match self.lookup(&template.name).await? {
            KeyLookup::Existing(key, stored) => {
                if stored.revision != template.revision {
                    return Err(TemplateError::conflict(format!(
                        "'{}' changed concurrently (stored revision {}, writer had {})",
                        template.name, stored.revision, template.revision
                    )));
                }
                key
            }
            KeyLookup::Free(key) => key,
        };
        let saved = self.commit(&key, template).await?;
        info!(template = %saved.name, key = %key, revision = saved.revision, "template saved");
        Ok(saved)
    }

    async fn load(&self, name: &str) -> TemplateResult<Template> {
        match self.lookup(name).await? {
            KeyLookup::Existing(_, template) => Ok(template),
            KeyLookup::Free(_) => Err(TemplateError::not_found(name)),
        }
    }

    async fn list_all(&self) -> TemplateResult<Vec<Template>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut templates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let visible = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('.'))
                .unwrap_or(false);
            let is_json = path.extension().and_then(|e| e.to_str()) == Some(EXTENSION);
            if !visible || !is_json {
                continue;
            }
            match self.read_file(&path).await {
                Ok(Some(template)) => templates.push(template),
                Ok(None) => {}
                Err(err) => {
                    warn!(?err, path = %path.display(), "skipping unreadable template file");
                }
            }
        }
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn delete(&self, name: &str) -> TemplateResult<()> {
        let _guards = self.lock_keys(name).await;
        match self.lookup(name).await? {
            KeyLookup::Existing(key, _) => {
                fs::remove_file(self.path_for(&key)).await?;
                info!(template = %name, key = %key, "template deleted");
                Ok(())
            }
            KeyLookup::Free(_) => Err(TemplateError::not_found(name)),
        }
    }

    async fn record_usage(&self, name: &str, success: bool) -> TemplateResult<Template> {
        let outcome = if success {
            Outcome::Success { similarity: None }
        } else {
            Outcome::Failure
        };
        self.record_outcome(name, outcome).await
    }

    async fn record_outcome(&self, name: &str, outcome: Outcome) -> TemplateResult<Template> {
        let _guards = self.lock_keys(name).await;

        let (key, mut template) = match self.lookup(name).await? {
            KeyLookup::Existing(key, template) => (key, template),
            KeyLookup::Free(_) => return Err(TemplateError::not_found(name)),
        };
        let (status, transition) = apply_outcome(
            template.status,
            &mut template.usage,
            outcome,
            &self.policy,
            Utc::now(),
        );
        template.status = status;
        if let Some(transition) = transition {
            info!(
                template = %name,
                from = %transition.from,
                to = %transition.to,
                "template lifecycle transition"
            );
        }
        self.commit(&key, template).await
    }
}
