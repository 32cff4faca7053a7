//! Clipboard and drag-drop payloads.
//!
//! A payload is either inline data (text, image bytes) or a group of virtual
//! files.  File contents never travel with the payload: the group only lists
//! entries, and receivers pull bytes later through an access token.
//!
//! The wire type [`FileGroup`] deliberately has no notion of where a file
//! lives on disk.  The origin keeps that mapping in a [`LocalFileGroup`].

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use uuid::Uuid;
use walkdir::WalkDir;

/// Content of one clipboard or drag-drop operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardPayload {
    /// UTF-8 text.
    Text(String),
    /// Encoded image bytes (format chosen by the OS adapter).
    Image(Vec<u8>),
    /// A tree of files and directories, read on demand.
    Files(FileGroup),
}

impl ClipboardPayload {
    /// Short label for log lines.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ClipboardPayload::Text(_) => "text",
            ClipboardPayload::Image(_) => "image",
            ClipboardPayload::Files(_) => "files",
        }
    }

    pub fn is_files(&self) -> bool {
        matches!(self, ClipboardPayload::Files(_))
    }

    pub fn file_group(&self) -> Option<&FileGroup> {
        match self {
            ClipboardPayload::Files(group) => Some(group),
            _ => None,
        }
    }

    /// Returns the payload with `token` stamped into its file group.
    ///
    /// Inline payloads are returned unchanged.
    pub fn with_access_token(self, token: Uuid) -> Self {
        match self {
            ClipboardPayload::Files(group) => ClipboardPayload::Files(FileGroup {
                access_token: token,
                ..group
            }),
            other => other,
        }
    }
}

/// File entries of a payload, as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileGroup {
    /// Token granting read access; nil until the origin has issued one.
    pub access_token: Uuid,
    pub entries: Vec<VirtualFile>,
}

impl FileGroup {
    /// Number of regular files (directories excluded).
    pub fn file_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_directory).count()
    }

    /// Sum of all regular file sizes in bytes.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().filter(|e| !e.is_directory).map(|e| e.size).sum()
    }

    pub fn find(&self, file_id: Uuid) -> Option<&VirtualFile> {
        self.entries.iter().find(|e| e.file_id == file_id)
    }

    pub fn has_token(&self) -> bool {
        !self.access_token.is_nil()
    }
}

/// One entry of a [`FileGroup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    /// Unique per entry; the key used in read requests.
    pub file_id: Uuid,
    /// Path relative to the dropped root, `/`-separated.
    pub relative_path: String,
    pub size: u64,
    /// Last write time in milliseconds since the Unix epoch.
    pub last_write_unix_ms: i64,
    pub is_directory: bool,
}

/// Origin-side file group: wire entries plus the real source path of every
/// regular file, keyed by file id.
#[derive(Debug, Clone, Default)]
pub struct LocalFileGroup {
    group: FileGroup,
    sources: HashMap<Uuid, PathBuf>,
}

impl LocalFileGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a group from dropped paths.  Directories are walked
    /// recursively; every entry keeps its path relative to the parent of the
    /// root it was found under.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error met while reading metadata or walking a
    /// directory.
    pub fn scan(roots: &[PathBuf]) -> io::Result<Self> {
        let mut group = Self::new();
        for root in roots {
            let base = root.parent().unwrap_or_else(|| Path::new(""));
            let metadata = std::fs::metadata(root)?;
            if !metadata.is_dir() {
                group.push_file(relative_name(base, root), root.clone(), &metadata);
                continue;
            }
            for entry in WalkDir::new(root).sort_by_file_name() {
                let entry = entry.map_err(io::Error::from)?;
                let metadata = entry.metadata().map_err(io::Error::from)?;
                let relative = relative_name(base, entry.path());
                if metadata.is_dir() {
                    group.push_directory(relative);
                } else {
                    group.push_file(relative, entry.path().to_path_buf(), &metadata);
                }
            }
        }
        Ok(group)
    }

    /// Adds a directory entry.  Directories carry no source path.
    pub fn push_directory(&mut self, relative_path: String) -> Uuid {
        let file_id = Uuid::new_v4();
        self.group.entries.push(VirtualFile {
            file_id,
            relative_path,
            size: 0,
            last_write_unix_ms: 0,
            is_directory: true,
        });
        file_id
    }

    /// Adds a regular file backed by `source`.
    pub fn push_file(
        &mut self,
        relative_path: String,
        source: PathBuf,
        metadata: &std::fs::Metadata,
    ) -> Uuid {
        let last_write_unix_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let file_id = Uuid::new_v4();
        self.group.entries.push(VirtualFile {
            file_id,
            relative_path,
            size: metadata.len(),
            last_write_unix_ms,
            is_directory: false,
        });
        self.sources.insert(file_id, source);
        file_id
    }

    pub fn group(&self) -> &FileGroup {
        &self.group
    }

    /// File id to source path, regular files only.
    pub fn sources(&self) -> &HashMap<Uuid, PathBuf> {
        &self.sources
    }

    /// The wire payload for this group (token not yet issued).
    pub fn to_payload(&self) -> ClipboardPayload {
        ClipboardPayload::Files(self.group.clone())
    }
}

fn relative_name(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_access_token_stamps_file_groups_only() {
        let token = Uuid::new_v4();

        let files = ClipboardPayload::Files(FileGroup::default()).with_access_token(token);
        let text = ClipboardPayload::Text("hi".into()).with_access_token(token);

        assert_eq!(files.file_group().map(|g| g.access_token), Some(token));
        assert_eq!(text, ClipboardPayload::Text("hi".into()));
    }

    #[test]
    fn test_scan_walks_directory_and_records_sources() {
        // Arrange
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("folder");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.txt"), b"alpha").unwrap();
        std::fs::write(root.join("sub").join("b.bin"), vec![7u8; 300]).unwrap();

        // Act
        let group = LocalFileGroup::scan(&[root.clone()]).expect("scan");

        // Assert
        let paths: Vec<&str> = group
            .group()
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["folder", "folder/a.txt", "folder/sub", "folder/sub/b.bin"]);
        assert_eq!(group.group().file_count(), 2);
        assert_eq!(group.group().total_size(), 305);
        assert_eq!(group.sources().len(), 2);
        let b = group
            .group()
            .entries
            .iter()
            .find(|e| e.relative_path == "folder/sub/b.bin")
            .unwrap();
        assert_eq!(group.sources()[&b.file_id], root.join("sub").join("b.bin"));
    }

    #[test]
    fn test_scan_accepts_single_file_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("note.md");
        std::fs::write(&file, b"# hi").unwrap();

        let group = LocalFileGroup::scan(&[file]).expect("scan");

        assert_eq!(group.group().entries.len(), 1);
        assert_eq!(group.group().entries[0].relative_path, "note.md");
        assert!(!group.group().has_token());
    }
}
