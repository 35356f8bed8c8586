use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webcache_engine::{
    CacheEntry, CacheManager, HttpFetcher, Method, ResponseMeta, create_client,
};

use crate::{
    config::AppConfig,
    error::{AppError, Result},
    utils::format_bytes,
};

/// Cache entry as printed by `list --json` and `show`
#[derive(Debug, Serialize)]
struct EntryView {
    url: String,
    file: PathBuf,
    size: u64,
    content_type: String,
    date: Option<String>,
    last_modified: Option<String>,
    expires: Option<String>,
    content_encoding: Option<String>,
}

impl EntryView {
    fn new(entry: &CacheEntry, dir: &Path) -> Self {
        Self {
            url: entry.url.clone(),
            file: dir.join(&entry.filename),
            size: entry.size,
            content_type: entry.content_type.clone(),
            date: entry.date.as_ref().map(ToString::to_string),
            last_modified: entry.last_modified.as_ref().map(ToString::to_string),
            expires: entry.expires.as_ref().map(ToString::to_string),
            content_encoding: entry.content_encoding.clone(),
        }
    }
}

pub struct CommandExecutor {
    config: AppConfig,
    manager: CacheManager,
}

impl CommandExecutor {
    /// Open the cache described by `config`. Must be called inside a tokio
    /// runtime.
    pub fn new(config: AppConfig) -> Result<Self> {
        let client = create_client(&config.user_agent, Duration::from_secs(config.timeout))?;
        let fetcher = HttpFetcher::new(client)?;
        let manager = CacheManager::new(config.cache.clone(), Arc::new(fetcher));
        debug!(dir = ?config.cache.resolved_directory(), "Cache opened");
        Ok(Self { config, manager })
    }

    fn cache_dir(&self) -> PathBuf {
        self.config.cache.resolved_directory()
    }

    pub async fn fetch(&self, url: &str, output: Option<&Path>, reload: bool) -> Result<()> {
        let mut api = self
            .manager
            .open(url, Method::Get, Default::default(), reload, None)?;
        let (meta, body) = api.read_to_end().await?;
        drop(api);

        info!(
            url,
            status = meta.status,
            bytes = body.len(),
            "Fetched document"
        );

        match output {
            Some(path) => {
                std::fs::write(path, &body)?;
                eprintln!("Saved {} to {}", format_bytes(body.len() as u64), path.display());
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&body)?;
                stdout.flush()?;
            }
        }

        check_status(&meta)
    }

    pub fn list(&self, json: bool) -> Result<()> {
        let dir = self.cache_dir();
        let entries = self.manager.entries();

        if json {
            let views: Vec<EntryView> = entries.iter().map(|e| EntryView::new(e, &dir)).collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
            return Ok(());
        }

        if entries.is_empty() {
            println!("Cache is empty");
            return Ok(());
        }
        for entry in &entries {
            println!(
                "{:>10}  {:<24}  {}",
                format_bytes(entry.size),
                entry.content_type,
                entry.url
            );
        }
        Ok(())
    }

    pub fn show(&self, url: &str) -> Result<()> {
        let key = self.manager.normalize_key(url)?;
        let entry = self
            .manager
            .lookup(&key)
            .ok_or_else(|| AppError::InvalidInput(format!("{url} is not cached")))?;
        let view = EntryView::new(&entry, &self.cache_dir());
        println!("{}", serde_json::to_string_pretty(&view)?);
        Ok(())
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.manager.save_state()?;
        println!("Checkpointed {}", self.cache_dir().display());
        Ok(())
    }

    pub fn erase(&self) -> Result<()> {
        let before = self.manager.stats();
        self.manager.erase_cache();
        println!(
            "Erased {} documents ({})",
            before.entries,
            format_bytes(before.size)
        );
        Ok(())
    }

    pub fn prune(&self) -> Result<()> {
        let removed = self.manager.erase_unlogged_files();
        println!("Removed {removed} unreferenced files");
        Ok(())
    }

    pub fn stats(&self, json: bool) -> Result<()> {
        let stats = self.manager.stats();
        if json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }
        println!("Directory:  {}", self.cache_dir().display());
        println!("Freshness:  {}", self.config.cache.freshness);
        println!("Stores:     {}", stats.stores);
        println!("Documents:  {}", stats.entries);
        println!(
            "Size:       {} of {}",
            format_bytes(stats.size),
            format_bytes(stats.max_size)
        );
        Ok(())
    }

    /// Checkpoint on the way out if configured to.
    pub fn finish(self) -> Result<()> {
        self.manager.shutdown()?;
        Ok(())
    }
}

fn check_status(meta: &ResponseMeta) -> Result<()> {
    if meta.status >= 400 {
        return Err(AppError::Status {
            status: meta.status,
            reason: meta.reason.clone(),
        });
    }
    Ok(())
}
