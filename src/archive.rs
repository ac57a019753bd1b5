use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{FsError, Result};
use crate::sandbox::Sandbox;

// ============================================================================
// Folder archives
// ============================================================================

/// Entries at least this large need ZIP64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// A finished archive spooled to an anonymous temporary file, rewound and
/// ready to be streamed. The file disappears once dropped.
#[derive(Debug)]
pub struct Archive {
    pub file: File,
    pub file_name: String,
    pub size: u64,
}

/// Zips every regular file under `relative`, naming entries relative to that
/// directory. Any failure discards the partial archive.
pub fn build_archive(sandbox: &Sandbox, relative: &str) -> Result<Archive> {
    let dir = sandbox.resolve(relative)?;
    let meta = fs::metadata(dir.absolute())
        .map_err(|_| FsError::NotFound(dir.relative().to_string()))?;
    if !meta.is_dir() {
        return Err(FsError::NotADirectory(dir.relative().to_string()));
    }

    let spool = tempfile::tempfile()?;
    let mut file = write_directory(dir.absolute(), spool)?;
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;

    let base = if dir.is_root() { "files" } else { dir.name() };
    debug!("Built archive of '{}' ({size} bytes)", dir.relative());

    Ok(Archive {
        file,
        file_name: format!("{base}.zip"),
        size,
    })
}

/// Writes the tree under `dir` into a deflate zip on `writer`.
pub fn write_directory<W: Write + Seek>(dir: &Path, writer: W) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry_name(dir, entry.path())?;
        let len = entry.metadata().map_err(io::Error::from)?.len();
        zip.start_file(name, options.large_file(len >= ZIP64_THRESHOLD))
            .map_err(zip_error)?;
        let mut source = File::open(entry.path())?;
        io::copy(&mut source, &mut zip)?;
    }

    zip.finish().map_err(zip_error)
}

/// `/`-separated path of `path` below `dir`.
fn entry_name(dir: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(dir)
        .map_err(|_| FsError::escapes_sandbox())?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

fn zip_error(err: ZipError) -> FsError {
    match err {
        ZipError::Io(err) => FsError::Io(err),
        other => FsError::Io(io::Error::new(io::ErrorKind::Other, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn fixture() -> (TempDir, Sandbox) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("photos/2024/summer")).unwrap();
        fs::write(root.join("photos/cover.jpg"), b"jpeg bytes").unwrap();
        fs::write(root.join("photos/2024/summer/beach.png"), b"png bytes").unwrap();
        fs::create_dir(root.join("photos/empty")).unwrap();
        fs::write(root.join("outside.txt"), b"not in the archive").unwrap();
        let sandbox = Sandbox::new(root).unwrap();
        (tmp, sandbox)
    }

    #[test]
    fn archive_root_is_the_requested_directory() {
        let (_tmp, sandbox) = fixture();
        let archive = build_archive(&sandbox, "photos").unwrap();
        assert_eq!(archive.file_name, "photos.zip");
        assert!(archive.size > 0);

        let mut zip = ZipArchive::new(archive.file).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["2024/summer/beach.png", "cover.jpg"]);

        let mut content = String::new();
        zip.by_name("2024/summer/beach.png")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "png bytes");
    }

    #[test]
    fn root_archive_is_named_files() {
        let (_tmp, sandbox) = fixture();
        let archive = build_archive(&sandbox, "").unwrap();
        assert_eq!(archive.file_name, "files.zip");

        let zip = ZipArchive::new(archive.file).unwrap();
        assert_eq!(zip.len(), 3);
    }

    /// Accepts `budget` bytes, then fails every write.
    struct FailingWriter {
        inner: io::Cursor<Vec<u8>>,
        budget: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.inner.get_ref().len() + buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FailingWriter {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn write_failure_mid_walk_is_an_error() {
        let (_tmp, sandbox) = fixture();
        let dir = sandbox.resolve("photos").unwrap();
        let writer = FailingWriter {
            inner: io::Cursor::new(Vec::new()),
            budget: 64,
        };

        assert!(matches!(
            write_directory(dir.absolute(), writer),
            Err(FsError::Io(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_fails_the_whole_archive() {
        use std::os::unix::fs::PermissionsExt;

        let (tmp, sandbox) = fixture();
        let locked = tmp.path().join("photos/locked.jpg");
        fs::write(&locked, b"secret").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if File::open(&locked).is_ok() {
            // Permission bits are not enforced for this user (e.g. root).
            return;
        }

        assert!(matches!(
            build_archive(&sandbox, "photos"),
            Err(FsError::Io(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn files_over_four_gib_use_zip64() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("big")).unwrap();
        let huge = File::create(tmp.path().join("big/huge.bin")).unwrap();
        // Sparse: no blocks are allocated for the zeros.
        huge.set_len(ZIP64_THRESHOLD + 1024).unwrap();
        drop(huge);
        let sandbox = Sandbox::new(tmp.path()).unwrap();

        let archive = build_archive(&sandbox, "big").unwrap();

        let mut zip = ZipArchive::new(archive.file).unwrap();
        assert_eq!(zip.by_name("huge.bin").unwrap().size(), ZIP64_THRESHOLD + 1024);
    }

    #[test]
    fn rejects_missing_and_non_directories() {
        let (_tmp, sandbox) = fixture();
        assert!(matches!(
            build_archive(&sandbox, "nope"),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            build_archive(&sandbox, "outside.txt"),
            Err(FsError::NotADirectory(_))
        ));
        assert!(matches!(
            build_archive(&sandbox, "../"),
            Err(FsError::Rejected { .. })
        ));
    }
}
