//! File side-effect executor.
//!
//! File nodes write their flattened TEXT content to disk before agent
//! discovery runs, so concurrently rendered agents that read the file see
//! its contents. Mock mode (node-level `_mockMode` or the global setting)
//! skips the disk write, returns a synthetic result, and still lets the
//! node's callbacks fire.

use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::tree::{NodeId, Props, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Write,
    Append,
}

#[derive(Debug, Clone)]
pub struct FileNodeConfig {
    pub path: PathBuf,
    pub mode: WriteMode,
    pub encoding: String,
    pub create_dirs: bool,
    pub mock: bool,
}

impl FileNodeConfig {
    pub fn from_props(props: &Props) -> Result<Self, FileWriteError> {
        let path = props
            .str_prop("path")
            .map(PathBuf::from)
            .ok_or(FileWriteError::MissingPath)?;
        let mode = match props.str_prop("mode") {
            None | Some("write") => WriteMode::Write,
            Some("append") => WriteMode::Append,
            Some(other) => return Err(FileWriteError::InvalidMode(other.to_string())),
        };
        Ok(Self {
            path,
            mode,
            encoding: props
                .str_prop("encoding")
                .unwrap_or("utf-8")
                .to_string(),
            create_dirs: props.bool_prop("createDirs").unwrap_or(true),
            mock: props.bool_prop("_mockMode").unwrap_or(false),
        })
    }
}

/// Result of executing one file node.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileWriteOutcome {
    pub path: String,
    pub bytes: usize,
    pub mocked: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FileWriteError {
    #[error("file node is missing the required 'path' prop")]
    MissingPath,
    #[error("invalid file mode '{0}', expected 'write' or 'append'")]
    InvalidMode(String),
    #[error("unsupported encoding '{0}'")]
    UnsupportedEncoding(String),
    #[error("failed to create parent directories for {path}: {source}")]
    CreateDirs {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Execute a file node: extract content, create parents, write or append.
pub async fn write_file_node(
    tree: &Tree,
    node: NodeId,
    global_mock: bool,
) -> Result<FileWriteOutcome, FileWriteError> {
    let config = FileNodeConfig::from_props(&tree.get(node).props)?;
    let content = tree.child_text(node);
    write_file(&config, &content, global_mock).await
}

pub async fn write_file(
    config: &FileNodeConfig,
    content: &str,
    global_mock: bool,
) -> Result<FileWriteOutcome, FileWriteError> {
    if !matches!(config.encoding.as_str(), "utf-8" | "utf8") {
        return Err(FileWriteError::UnsupportedEncoding(config.encoding.clone()));
    }
    let display_path = config.path.display().to_string();

    if config.mock || global_mock {
        debug!("mock file write: {} ({} bytes)", display_path, content.len());
        return Ok(FileWriteOutcome {
            path: display_path,
            bytes: content.len(),
            mocked: true,
        });
    }

    if config.create_dirs
        && let Some(parent) = config.path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| FileWriteError::CreateDirs {
                path: display_path.clone(),
                source,
            })?;
    }

    match config.mode {
        WriteMode::Write => {
            tokio::fs::write(&config.path, content)
                .await
                .map_err(|source| FileWriteError::Write {
                    path: display_path.clone(),
                    source,
                })?;
        }
        WriteMode::Append => {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)
                .await
                .map_err(|source| FileWriteError::Write {
                    path: display_path.clone(),
                    source,
                })?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|source| FileWriteError::Write {
                    path: display_path.clone(),
                    source,
                })?;
        }
    }

    debug!("wrote {} bytes to {}", content.len(), display_path);
    Ok(FileWriteOutcome {
        path: display_path,
        bytes: content.len(),
        mocked: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;
    use tempfile::TempDir;

    fn file_node(tree: &mut Tree, path: &str, content: &str) -> NodeId {
        let mut props = Props::new();
        props.set("path", path);
        let node = tree.create_instance(NodeKind::File, props);
        let text = tree.create_text_instance(content);
        tree.append_child(node, text);
        node
    }

    #[tokio::test]
    async fn writes_content_with_created_parents() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/deeply/out.txt");
        let mut tree = Tree::new();
        let node = file_node(&mut tree, target.to_str().unwrap(), "hello file");

        let outcome = write_file_node(&tree, node, false).await.unwrap();
        assert!(!outcome.mocked);
        assert_eq!(outcome.bytes, 10);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello file");
    }

    #[tokio::test]
    async fn append_mode_accumulates() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("log.txt");
        let config = FileNodeConfig {
            path: target.clone(),
            mode: WriteMode::Append,
            encoding: "utf-8".to_string(),
            create_dirs: true,
            mock: false,
        };
        write_file(&config, "one\n", false).await.unwrap();
        write_file(&config, "two\n", false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn mock_mode_skips_disk() {
        let mut tree = Tree::new();
        let node = file_node(&mut tree, "/definitely/not/writable/x.txt", "data");
        let outcome = write_file_node(&tree, node, true).await.unwrap();
        assert!(outcome.mocked);
        assert!(!std::path::Path::new("/definitely/not/writable/x.txt").exists());
    }

    #[tokio::test]
    async fn node_level_mock_prop_wins() {
        let mut tree = Tree::new();
        let mut props = Props::new();
        props.set("path", "/nope/x.txt");
        props.set("_mockMode", true);
        let node = tree.create_instance(NodeKind::File, props);
        let outcome = write_file_node(&tree, node, false).await.unwrap();
        assert!(outcome.mocked);
    }

    #[tokio::test]
    async fn missing_path_and_bad_mode_fail() {
        let mut tree = Tree::new();
        let node = tree.create_instance(NodeKind::File, Props::new());
        assert!(matches!(
            write_file_node(&tree, node, false).await,
            Err(FileWriteError::MissingPath)
        ));

        let mut props = Props::new();
        props.set("path", "/tmp/x.txt");
        props.set("mode", "truncate");
        let node = tree.create_instance(NodeKind::File, props);
        assert!(matches!(
            write_file_node(&tree, node, false).await,
            Err(FileWriteError::InvalidMode(_))
        ));
    }

    #[tokio::test]
    async fn unsupported_encoding_fails_loudly() {
        let config = FileNodeConfig {
            path: PathBuf::from("/tmp/x.txt"),
            mode: WriteMode::Write,
            encoding: "latin-1".to_string(),
            create_dirs: false,
            mock: false,
        };
        assert!(matches!(
            write_file(&config, "x", false).await,
            Err(FileWriteError::UnsupportedEncoding(_))
        ));
    }
}
