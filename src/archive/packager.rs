use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{error, info};
use tokio::sync::mpsc::Sender;

use crate::archive::filter::{FilterDecision, PathFilter};
use crate::models::ContentEvent;

/// Sink for per-file metadata events. The packager pushes one event per
/// included file, after the file is fully written; a full queue blocks the
/// packager until the consumer catches up.
pub type EventSink = Sender<ContentEvent>;

/// Package the given roots into a single compressed tar stream.
///
/// Directories are walked depth-first in directory-listing order; plain file
/// roots are included directly. Exclude/include-override filtering is applied
/// to the absolute path of every candidate file. Unreadable files and
/// directories are logged and skipped; an unreadable file root is fatal.
/// The destination is finalized exactly once, after all roots are processed,
/// and the event sink (when given) is closed after the last event.
pub fn package<W: Write>(
    roots: &[PathBuf],
    filter: &PathFilter,
    dest: W,
    events: Option<EventSink>,
) -> Result<()> {
    let encoder = GzEncoder::new(dest, Compression::best());
    let mut builder = tar::Builder::new(encoder);

    for root in roots {
        let abs = match fs::canonicalize(root) {
            Ok(p) => p,
            Err(e) => {
                error!("Could not resolve backup root '{}': {}", root.display(), e);
                continue;
            }
        };

        let info = match fs::metadata(&abs) {
            Ok(m) => m,
            Err(e) => {
                error!("Could not read file information for '{}': {}", abs.display(), e);
                continue;
            }
        };

        if info.is_dir() {
            add_directory(&mut builder, &abs, filter, events.as_ref())?;
        } else {
            add_file(&mut builder, &abs, filter, events.as_ref(), true)?;
        }
    }

    let encoder = builder
        .into_inner()
        .context("could not finalize the package stream")?;
    encoder
        .finish()
        .context("could not finalize the compressed stream")?;

    // dropping `events` here closes the sink after the last event
    Ok(())
}

/// Recurse into a directory, adding its files in directory-listing order.
/// Only destination write failures are fatal; unreadable entries are skipped.
fn add_directory<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    filter: &PathFilter,
    events: Option<&EventSink>,
) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Could not list directory '{}': {}", dir.display(), e);
            return Ok(());
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                error!("Could not read an entry of '{}': {}", dir.display(), e);
                continue;
            }
        };

        let path = entry.path();
        if path.is_dir() {
            add_directory(builder, &path, filter, events)?;
        } else {
            add_file(builder, &path, filter, events, false)?;
        }
    }

    Ok(())
}

/// Filter and append one file to the package, then emit its content event.
///
/// `is_root` marks a file that was passed as a backup root; failing to read
/// it aborts the whole package instead of being skipped.
fn add_file<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    filter: &PathFilter,
    events: Option<&EventSink>,
    is_root: bool,
) -> Result<()> {
    let abs_path = path.to_string_lossy();
    match filter.decide(&abs_path) {
        FilterDecision::Excluded(pattern) => {
            info!("Ignore file because it is excluded: {} -> \"{}\"", abs_path, pattern);
            return Ok(());
        }
        FilterDecision::Included(Some(pattern)) => {
            info!("Include file despite exclusion: {} -> \"{}\"", abs_path, pattern);
        }
        FilterDecision::Included(None) => {}
    }

    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if !is_root => {
            error!("Could not open file '{}': {}", abs_path, e);
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("could not open backup root '{}'", abs_path))
        }
    };

    let info = match file.metadata() {
        Ok(info) => info,
        Err(e) if !is_root => {
            error!("Could not read file metadata for '{}': {}", abs_path, e);
            return Ok(());
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("could not read metadata of backup root '{}'", abs_path))
        }
    };

    let archive_path = entry_path(path);
    info!("Add to package: {} -> {}", abs_path, archive_path);

    builder
        .append_file(&archive_path, &mut file)
        .with_context(|| format!("could not write '{}' into the package", archive_path))?;

    if let Some(sink) = events {
        let event = ContentEvent {
            archive_path,
            real_path: path.to_path_buf(),
            length: info.len(),
            modified: info.modified().ok().map(DateTime::<Utc>::from),
        };
        // a dropped receiver means nobody wants events; keep packaging
        let _ = sink.blocking_send(event);
    }

    Ok(())
}

/// In-package path for an absolute filesystem path: duplicate separators
/// collapsed, no leading separator.
fn entry_path(path: &Path) -> String {
    path.to_string_lossy()
        .split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Read;

    use flate2::read::GzDecoder;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Unpack a package stream into (entry path -> contents).
    fn unpack(package: &[u8]) -> HashMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(GzDecoder::new(package));
        let mut contents = HashMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            contents.insert(name, data);
        }
        contents
    }

    fn expected_entry(dir: &TempDir, rel: &str) -> String {
        let abs = fs::canonicalize(dir.path()).unwrap();
        format!("{}/{}", abs.to_string_lossy().trim_start_matches('/'), rel)
    }

    #[test]
    fn test_entry_path_strips_leading_and_duplicate_separators() {
        assert_eq!(entry_path(Path::new("/a//b/c.txt")), "a/b/c.txt");
        assert_eq!(entry_path(Path::new("/f.txt")), "f.txt");
    }

    #[test]
    fn test_package_directory_round_trip() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"first file").unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"second file").unwrap();

        let mut out = Vec::new();
        package(
            std::slice::from_ref(&dir.path().to_path_buf()),
            &PathFilter::empty(),
            &mut out,
            None,
        )
        .unwrap();

        let contents = unpack(&out);
        assert_eq!(contents.len(), 2);
        assert_eq!(
            contents.get(&expected_entry(&dir, "a.txt")).unwrap(),
            b"first file"
        );
        assert_eq!(
            contents.get(&expected_entry(&dir, "sub/b.txt")).unwrap(),
            b"second file"
        );
    }

    #[test]
    fn test_package_single_file_root() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("only.txt"), b"lonely").unwrap();

        let mut out = Vec::new();
        package(
            &[dir.path().join("only.txt")],
            &PathFilter::empty(),
            &mut out,
            None,
        )
        .unwrap();

        let contents = unpack(&out);
        assert_eq!(contents.len(), 1);
        assert_eq!(
            contents.get(&expected_entry(&dir, "only.txt")).unwrap(),
            b"lonely"
        );
    }

    #[test]
    fn test_filtering_excludes_and_overrides() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("important.exe"), b"keep").unwrap();
        fs::write(dir.path().join("other.exe"), b"drop").unwrap();
        fs::write(dir.path().join("note.txt"), b"keep too").unwrap();

        let filter = PathFilter::new(
            &[r".*\.exe".to_string()],
            &[r".*important.*".to_string()],
        )
        .unwrap();

        let mut out = Vec::new();
        package(
            std::slice::from_ref(&dir.path().to_path_buf()),
            &filter,
            &mut out,
            None,
        )
        .unwrap();

        let contents = unpack(&out);
        assert_eq!(contents.len(), 2);
        assert!(contents.contains_key(&expected_entry(&dir, "important.exe")));
        assert!(contents.contains_key(&expected_entry(&dir, "note.txt")));
        assert!(!contents.contains_key(&expected_entry(&dir, "other.exe")));
    }

    #[test]
    fn test_content_events_carry_length_and_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), vec![0u8; 10]).unwrap();
        fs::write(dir.path().join("b.txt"), vec![0u8; 20]).unwrap();

        let (tx, mut rx) = mpsc::channel(50);
        let mut out = Vec::new();
        package(
            std::slice::from_ref(&dir.path().to_path_buf()),
            &PathFilter::empty(),
            &mut out,
            Some(tx),
        )
        .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        let mut lengths: Vec<u64> = events.iter().map(|e| e.length).collect();
        lengths.sort_unstable();
        assert_eq!(lengths, vec![10, 20]);
        for event in &events {
            assert!(event.modified.is_some());
            assert!(event.real_path.exists());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        // a socket file exists and has metadata but cannot be opened for
        // reading, even by a privileged test runner
        let socket = dir.path().join("unreadable.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();

        let mut out = Vec::new();
        let error = package(&[socket], &PathFilter::empty(), &mut out, None).unwrap_err();
        assert!(error.to_string().contains("could not open backup root"));
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"still here").unwrap();

        let mut out = Vec::new();
        package(
            &[dir.path().join("does-not-exist"), dir.path().to_path_buf()],
            &PathFilter::empty(),
            &mut out,
            None,
        )
        .unwrap();

        assert_eq!(unpack(&out).len(), 1);
    }
}
