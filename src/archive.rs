//! Bundling the working directory up into a single `*.tar.gz`.

use failure::{Error, ResultExt};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path};
use tar::Builder;
use walkdir::WalkDir;

use crate::report::Reporter;

/// Turn a gzip level into a `Compression`, where `-1` means "whatever the
/// library thinks is best".
pub fn compression_level(level: i32) -> Option<Compression> {
    match level {
        -1 => Some(Compression::default()),
        0..=9 => Some(Compression::new(level as u32)),
        _ => None,
    }
}

/// Write every cloned repository under `root` to a gzipped tarball at
/// `dest`, returning the number of entries written.
///
/// Each owner directory directly under `root` is skipped when it is empty
/// (i.e. none of its repositories were cloned successfully). Paths inside
/// the archive are relative to `root` and always use `/`.
///
/// If anything goes wrong, `dest` is removed before returning the error.
pub fn archive(
    root: &Path,
    dest: &Path,
    level: i32,
    reporter: &Reporter,
) -> Result<usize, Error> {
    let compression = match compression_level(level) {
        Some(c) => c,
        None => {
            reporter.warning(format!(
                "gzip level {} is invalid, using the default",
                level
            ));
            Compression::default()
        },
    };

    let file = File::create(dest)
        .with_context(|_| format!("Unable to create {}", dest.display()))?;

    match write_archive(root, file, compression) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(dest) {
                warn!(
                    "Unable to remove the partial archive at {}, {}",
                    dest.display(),
                    cleanup
                );
            }
            Err(e)
        },
    }
}

fn write_archive<W: Write>(
    root: &Path,
    writer: W,
    compression: Compression,
) -> Result<usize, Error> {
    let mut builder = Builder::new(GzEncoder::new(writer, compression));
    builder.follow_symlinks(false);

    let mut owners = Vec::new();
    for entry in fs::read_dir(root)
        .with_context(|_| format!("Unable to read {}", root.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            owners.push(entry.path());
        }
    }
    owners.sort();

    let mut entries = 0;

    for owner in owners {
        entries += insert(root, &owner, &mut builder)
            .with_context(|_| format!("Unable to archive {}", owner.display()))?;
    }

    let encoder = builder.into_inner().context("Unable to finish the tarball")?;
    let mut writer = encoder.finish().context("Unable to finish compressing")?;
    writer.flush()?;

    Ok(entries)
}

fn insert<W: Write>(
    root: &Path,
    owner_dir: &Path,
    builder: &mut Builder<W>,
) -> Result<usize, Error> {
    if fs::read_dir(owner_dir)?.next().is_none() {
        debug!("Skipping {}, nothing was cloned", owner_dir.display());
        return Ok(0);
    }

    let mut entries = 0;

    for entry in WalkDir::new(owner_dir).sort_by_file_name() {
        let entry = entry?;
        let name = archive_name(root, entry.path())?;
        trace!("Adding {}", name);

        builder
            .append_path_with_name(entry.path(), &name)
            .with_context(|_| format!("Unable to add {}", entry.path().display()))?;
        entries += 1;
    }

    Ok(entries)
}

/// The path of an item inside the archive, relative to `root` and using
/// forward slashes.
fn archive_name(root: &Path, path: &Path) -> Result<String, Error> {
    let relative = path.strip_prefix(root)?;

    let segments: Vec<_> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(segment) => Some(segment.to_string_lossy()),
            _ => None,
        })
        .collect();

    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{self, Message};
    use flate2::read::GzDecoder;

    fn entries_in(archive: &Path) -> Vec<String> {
        let mut tarball = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));

        tarball
            .entries()
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                let path = entry.path().unwrap().to_string_lossy().into_owned();
                path.trim_end_matches('/').to_string()
            })
            .collect()
    }

    fn populate(root: &Path) {
        let readme = root.join("alice").join("repo-a");
        fs::create_dir_all(readme.join("src")).unwrap();
        fs::write(readme.join("README.md"), "# Repo A\n").unwrap();
        fs::write(readme.join("src").join("lib.rs"), "").unwrap();
        fs::create_dir_all(root.join("bob")).unwrap();
        fs::create_dir_all(root.join("carol").join("repo1")).unwrap();
        fs::write(root.join("carol").join("repo1").join("notes.txt"), "hi").unwrap();
    }

    #[test]
    fn empty_owners_are_skipped() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        populate(work.path());
        let dest = out.path().join("archive.tar.gz");
        let (reporter, _rx) = report::channel();

        let count = archive(work.path(), &dest, 6, &reporter).unwrap();

        let got = entries_in(&dest);
        assert_eq!(count, got.len());
        assert_eq!(
            got,
            vec![
                "alice",
                "alice/repo-a",
                "alice/repo-a/README.md",
                "alice/repo-a/src",
                "alice/repo-a/src/lib.rs",
                "carol",
                "carol/repo1",
                "carol/repo1/notes.txt",
            ]
        );
        assert!(got.iter().all(|name| !name.contains('\\')));
        assert!(got.iter().all(|name| !name.starts_with("bob")));
    }

    #[test]
    fn an_invalid_level_falls_back_to_the_default() {
        let work = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        populate(work.path());
        let dest = out.path().join("archive.tar.gz");
        let (reporter, mut rx) = report::channel();

        archive(work.path(), &dest, 42, &reporter).unwrap();

        assert!(dest.exists());
        match rx.try_recv().unwrap() {
            Message::Warning(text) => assert!(text.contains("42")),
            other => panic!("Expected a warning, got {:?}", other),
        }
    }

    #[test]
    fn valid_levels() {
        assert_eq!(compression_level(-1), Some(Compression::default()));
        assert_eq!(compression_level(0), Some(Compression::none()));
        assert_eq!(compression_level(9), Some(Compression::best()));
        assert_eq!(compression_level(10), None);
        assert_eq!(compression_level(-2), None);
    }

    #[test]
    fn failures_remove_the_partial_archive() {
        let out = tempfile::tempdir().unwrap();
        let missing_root = out.path().join("not-a-working-directory");
        let dest = out.path().join("archive.tar.gz");
        let (reporter, _rx) = report::channel();

        assert!(archive(&missing_root, &dest, -1, &reporter).is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn names_are_relative_with_forward_slashes() {
        let root = Path::new("/work");
        let path = root.join("alice").join("repo").join("file.txt");

        assert_eq!(archive_name(root, &path).unwrap(), "alice/repo/file.txt");
    }
}
