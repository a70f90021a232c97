//! Schema store persisted as one pretty-printed JSON file per schema
//!
//! Layout: `{root}/{schema_id}.json`. Every file is loaded into memory when
//! the store is opened; writes go to disk first, then to the cache.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::memory::ensure_unique;
use super::SchemaStore;
use crate::error::{EngineError, EntityKind, Result};
use crate::schema::ToolSchema;

pub struct JsonDirSchemaStore {
    root: PathBuf,
    cache: RwLock<HashMap<String, ToolSchema>>,
}

impl JsonDirSchemaStore {
    /// Open an existing directory or create a new one
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let store = Self {
            root,
            cache: RwLock::new(HashMap::new()),
        };
        store.load_all()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn schema_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    fn load_all(&self) -> Result<()> {
        let mut cache = self.cache.write();
        for entry in WalkDir::new(&self.root)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        {
            let content = fs::read_to_string(entry.path())?;
            match serde_json::from_str::<ToolSchema>(&content) {
                Ok(schema) => {
                    cache.insert(schema.id.clone(), schema);
                }
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "Skipping unreadable schema file");
                }
            }
        }
        debug!(root = %self.root.display(), count = cache.len(), "Loaded schemas");
        Ok(())
    }

    async fn write_file(&self, schema: &ToolSchema) -> Result<()> {
        let content = serde_json::to_string_pretty(schema)?;
        tokio::fs::write(self.schema_path(&schema.id), content)
            .await
            .map_err(|e| EngineError::Store(format!("failed to write schema '{}': {}", schema.id, e)))
    }
}

#[async_trait]
impl SchemaStore for JsonDirSchemaStore {
    async fn insert(&self, schema: ToolSchema) -> Result<()> {
        ensure_unique(&self.cache.read(), &schema)?;
        self.write_file(&schema).await?;
        self.cache.write().insert(schema.id.clone(), schema);
        Ok(())
    }

    async fn replace(&self, schema: ToolSchema) -> Result<()> {
        if !self.cache.read().contains_key(&schema.id) {
            return Err(EngineError::not_found(EntityKind::Schema, schema.id));
        }
        self.write_file(&schema).await?;
        self.cache.write().insert(schema.id.clone(), schema);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ToolSchema>> {
        Ok(self.cache.read().get(id).cloned())
    }

    async fn find_by_tool_id(&self, tool_id: &str) -> Result<Option<ToolSchema>> {
        Ok(self
            .cache
            .read()
            .values()
            .find(|s| s.tool_id == tool_id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<ToolSchema>> {
        Ok(self.cache.read().values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        if !self.cache.read().contains_key(id) {
            return Ok(false);
        }
        let path = self.schema_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EngineError::Store(format!(
                    "failed to remove schema '{}': {}",
                    id, e
                )))
            }
        }
        Ok(self.cache.write().remove(id).is_some())
    }
}
