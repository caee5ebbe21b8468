//! Gzip-compressed tarball of the log directory.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

/// Write `src_dir` into `dest` as a `.tar.gz`.
///
/// Entries are rooted at the directory's own name, so extracting reproduces
/// `<dirname>/<file>`. `dest` is truncated if it exists (the session probes it at creation).
/// Each file is stored at the size it had when reached, so a log that is still growing
/// cannot keep the writer busy.
pub(crate) fn write_tar_gz(src_dir: &Path, dest: &Path) -> io::Result<()> {
    let root = src_dir.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' has no directory name to archive under", src_dir.display()),
        )
    })?;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dest)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir(root, src_dir)?;
    append_tree(&mut builder, src_dir, Path::new(root))?;

    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

fn append_tree<W: Write>(builder: &mut tar::Builder<W>, dir: &Path, name: &Path) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let entry_name = name.join(entry.file_name());
        let meta = fs::symlink_metadata(&path)?;
        if meta.is_dir() {
            builder.append_dir(&entry_name, &path)?;
            append_tree(builder, &path, &entry_name)?;
        } else if meta.is_file() {
            append_snapshot(builder, &path, &entry_name, &meta)?;
        } else {
            builder.append_path_with_name(&path, &entry_name)?;
        }
    }
    Ok(())
}

/// Store exactly `meta.len()` bytes of `path`, whatever is appended after `meta` was taken.
fn append_snapshot<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    name: &Path,
    meta: &fs::Metadata,
) -> io::Result<()> {
    let len = meta.len();
    let mut header = tar::Header::new_gnu();
    header.set_metadata(meta);
    header.set_size(len);

    // Zero-filled if the file shrank, so the entry always matches its header.
    let data = File::open(path)?
        .take(len)
        .chain(io::repeat(0))
        .take(len);
    builder.append_data(&mut header, name, data)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_round_trip_preserves_relative_paths_and_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tmp.path().join("nfs-perf-run");
        fs::create_dir_all(logs.join("nested")).unwrap();
        fs::write(logs.join("system.log"), "node cpu nfs\n1 12% 340\n").unwrap();
        fs::write(logs.join("drives.log"), "").unwrap();
        fs::write(logs.join("nested").join("extra.txt"), "x").unwrap();

        let dest = tmp.path().join("out.tgz");
        write_tar_gz(&logs, &dest).unwrap();

        let files = read_back::files(&dest);
        assert_eq!(files.len(), 3);
        assert_eq!(
            files[&PathBuf::from("nfs-perf-run/system.log")],
            b"node cpu nfs\n1 12% 340\n"
        );
        assert!(files[&PathBuf::from("nfs-perf-run/drives.log")].is_empty());
        assert_eq!(files[&PathBuf::from("nfs-perf-run/nested/extra.txt")], b"x");
    }

    #[test]
    fn test_overwrites_probe_file() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tmp.path().join("logs");
        fs::create_dir(&logs).unwrap();
        fs::write(logs.join("a.log"), "a").unwrap();
        let dest = tmp.path().join("out.tgz");
        fs::write(&dest, "").unwrap();

        write_tar_gz(&logs, &dest).unwrap();
        assert!(fs::metadata(&dest).unwrap().len() > 0);
        assert_eq!(read_back::files(&dest).len(), 1);
    }

    #[test]
    fn test_growing_file_is_cut_at_its_observed_size() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("busy.log");
        fs::write(&log, "line 1\n").unwrap();
        let meta = fs::metadata(&log).unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(&log)
            .unwrap()
            .write_all(b"line 2 written while archiving\n")
            .unwrap();

        let dest = tmp.path().join("out.tar");
        let mut builder = tar::Builder::new(File::create(&dest).unwrap());
        append_snapshot(&mut builder, &log, Path::new("logs/busy.log"), &meta).unwrap();
        builder.into_inner().unwrap();

        let mut tar = tar::Archive::new(File::open(&dest).unwrap());
        let mut entries = tar.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.header().size().unwrap(), 7);
        let mut data = String::new();
        entry.read_to_string(&mut data).unwrap();
        assert_eq!(data, "line 1\n");
        assert!(entries.next().is_none());
    }

    #[test]
    fn test_missing_destination_directory_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tmp.path().join("logs");
        fs::create_dir(&logs).unwrap();
        let dest = tmp.path().join("gone").join("out.tgz");
        assert!(write_tar_gz(&logs, &dest).is_err());
    }
}
