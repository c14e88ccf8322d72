//! Directory Walker (C2): an async, depth-bounded, exclusion-aware file
//! iterator. Built as a channel-fed producer task rather than a true `Stream`
//! impl, matching how the teacher offloads background work onto `tokio::spawn`
//! and hands the caller a receiver.

use crate::config::WalkerConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// External allow/deny seam, consulted on every directory and file. The real
/// policy implementation lives outside this crate; tests and the default
/// runtime both use `AllowAll`.
pub trait SecurityGate: Send + Sync {
    fn allows(&self, path: &Path) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl SecurityGate for AllowAll {
    fn allows(&self, _path: &Path) -> bool {
        true
    }
}

pub struct WalkOptions {
    pub max_depth: usize,
    pub excluded_dirs: HashSet<String>,
    pub extensions: Option<HashSet<String>>,
    pub gate: Arc<dyn SecurityGate>,
}

impl WalkOptions {
    pub fn from_config(config: &WalkerConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            excluded_dirs: config.excluded_dirs.iter().cloned().collect(),
            extensions: None,
            gate: Arc::new(AllowAll),
        }
    }

    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = String>) -> Self {
        self.extensions = Some(extensions.into_iter().collect());
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn SecurityGate>) -> Self {
        self.gate = gate;
        self
    }
}

/// Spawns a walk of `root` and returns the file-path receiver. I/O and
/// permission errors on a subtree are swallowed (that subtree is pruned); the
/// receiver simply yields fewer paths.
pub fn walk(root: PathBuf, options: WalkOptions) -> mpsc::Receiver<PathBuf> {
    let (tx, rx) = mpsc::channel(256);
    let options = Arc::new(options);
    tokio::spawn(async move {
        walk_dir(root, 0, &options, &tx).await;
    });
    rx
}

fn is_excluded(name: &str, options: &WalkOptions) -> bool {
    options.excluded_dirs.contains(name)
}

fn matches_extension(path: &Path, options: &WalkOptions) -> bool {
    let Some(allowed) = &options.extensions else {
        return true;
    };
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.contains(ext))
}

fn walk_dir<'a>(
    dir: PathBuf,
    depth: usize,
    options: &'a Arc<WalkOptions>,
    tx: &'a mpsc::Sender<PathBuf>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        if depth > options.max_depth {
            tracing::debug!(path = %dir.display(), "max depth reached, pruning");
            return;
        }
        if !options.gate.allows(&dir) {
            tracing::debug!(path = %dir.display(), "denied by security gate, pruning");
            return;
        }

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(path = %dir.display(), error = %err, "unreadable directory, pruning subtree");
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(path = %dir.display(), error = %err, "error reading entry, stopping subtree");
                    break;
                }
            };

            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if is_excluded(&name, options) {
                    continue;
                }
                walk_dir(path, depth + 1, options, tx).await;
            } else if file_type.is_file() {
                if !options.gate.allows(&path) {
                    tracing::debug!(path = %path.display(), "file denied by security gate");
                    continue;
                }
                if !matches_extension(&path, options) {
                    continue;
                }
                if tx.send(path).await.is_err() {
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn drain(mut rx: mpsc::Receiver<PathBuf>) -> Vec<PathBuf> {
        let mut out = Vec::new();
        while let Some(path) = rx.recv().await {
            out.push(path);
        }
        out
    }

    #[tokio::test]
    async fn yields_only_files_and_skips_excluded_dirs() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/b.txt"), "b").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/c.rs"), "c").unwrap();

        let options = WalkOptions::from_config(&WalkerConfig::default());
        let rx = walk(dir.path().to_path_buf(), options);
        let mut found = drain(rx).await;
        found.sort();

        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|p| p.ends_with("a.txt")));
        assert!(found.iter().any(|p| p.ends_with("src/c.rs")));
    }

    #[tokio::test]
    async fn honors_extension_allowlist() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "a").unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();

        let options = WalkOptions::from_config(&WalkerConfig::default())
            .with_extensions(["rs".to_string()]);
        let found = drain(walk(dir.path().to_path_buf(), options)).await;

        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("a.rs"));
    }

    #[tokio::test]
    async fn prunes_beyond_max_depth() {
        let dir = tempdir().unwrap();
        let mut nested = dir.path().to_path_buf();
        for i in 0..5 {
            nested.push(format!("d{i}"));
            std::fs::create_dir(&nested).unwrap();
        }
        std::fs::write(nested.join("deep.txt"), "x").unwrap();

        let mut config = WalkerConfig::default();
        config.max_depth = 2;
        let found = drain(walk(dir.path().to_path_buf(), WalkOptions::from_config(&config))).await;
        assert!(found.is_empty());
    }

    struct DenyNamed(&'static str);
    impl SecurityGate for DenyNamed {
        fn allows(&self, path: &Path) -> bool {
            path.file_name().and_then(|n| n.to_str()) != Some(self.0)
        }
    }

    #[tokio::test]
    async fn security_gate_denies_are_pruned() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();
        std::fs::write(dir.path().join("public.txt"), "x").unwrap();

        let options =
            WalkOptions::from_config(&WalkerConfig::default()).with_gate(Arc::new(DenyNamed("secret.txt")));
        let found = drain(walk(dir.path().to_path_buf(), options)).await;

        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("public.txt"));
    }
}
