/// Configuration manager with hot-reload capability

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

use super::Config;

/// Watches a config file and publishes every successfully reloaded version.
///
/// A file that fails to parse or validate is logged and ignored; subscribers keep the
/// last good config.
pub struct ConfigManager {
    config_path: PathBuf,
    tx: watch::Sender<Config>,
    last_modified: Option<SystemTime>,
}

impl ConfigManager {
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_path = path.as_ref().to_path_buf();
        let config = Config::load_from_file(&config_path)?;
        let last_modified = modified_at(&config_path);
        let (tx, _) = watch::channel(config);
        Ok(Self { config_path, tx, last_modified })
    }

    pub fn get_config(&self) -> Config {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.tx.subscribe()
    }

    /// Re-reads the file if its modification time moved. Returns whether a new config
    /// was published.
    pub fn reload_if_changed(&mut self) -> bool {
        let modified = modified_at(&self.config_path);
        if modified.is_none() || modified == self.last_modified {
            return false;
        }
        self.last_modified = modified;

        match Config::load_from_file(&self.config_path) {
            Ok(new_config) => {
                let changed = self.tx.send_if_modified(|current| {
                    if *current == new_config {
                        false
                    } else {
                        *current = new_config;
                        true
                    }
                });
                if changed {
                    info!(path = %self.config_path.display(), "Configuration reloaded");
                }
                changed
            }
            Err(e) => {
                let error = format!("{e:#}");
                warn!(path = %self.config_path.display(), error = %error, "Failed to reload configuration, keeping current");
                false
            }
        }
    }

    /// Polls the file every `every` on a background task.
    pub fn start_hot_reload(mut self, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reload_timer = interval(every);
            loop {
                reload_timer.tick().await;
                self.reload_if_changed();
                if self.tx.is_closed() {
                    break;
                }
            }
        })
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
