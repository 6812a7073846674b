//! Packing an uploaded stream into an archive in the store.
//!
//! Every upload is written to its own staging file inside the archive root,
//! then renamed into place once the archive is complete.
//! Two uploads with the same name therefore never write to the same file,
//! and nothing under an archive name is ever half-written.
//! If anything fails (or the upload is cancelled) the staging file is
//! deleted when it goes out of scope.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::time::{Duration, SystemTime};

use log::*;
use tempfile::NamedTempFile;

use crate::cancel::CancelFlag;
use crate::config::*;
use crate::name::SafeName;
use crate::result::*;
use crate::write::{EntrySummary, EntryWriter};

/// How many `name_(n).zip` candidates we try before giving up.
const MAX_UNIQUIFY_ATTEMPTS: u32 = 1000;

/// One uploaded file, as handed over by whatever parsed the request.
pub struct Upload<R> {
    /// The name the client declared. Untrusted.
    pub name: String,
    /// The file's contents, positioned at the start.
    pub reader: R,
    /// The length the client claimed, if any. Advisory only.
    pub declared_len: Option<u64>,
}

impl<R: Read> Upload<R> {
    pub fn new<S: Into<String>>(name: S, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
            declared_len: None,
        }
    }

    pub fn with_declared_len(mut self, len: u64) -> Self {
        self.declared_len = Some(len);
        self
    }
}

/// Creates archives in the configured root.
#[derive(Debug, Clone)]
pub struct Archiver {
    config: StoreConfig,
}

impl Archiver {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Archives `upload` and returns the new archive's name.
    ///
    /// `None` (no file in the request) gives [`ArchiveError::MissingInput`].
    ///
    /// [`ArchiveError::MissingInput`]: ../result/enum.ArchiveError.html#variant.MissingInput
    pub fn create<R: Read>(&self, upload: Option<Upload<R>>) -> ArchiveResult<String> {
        self.create_cancellable(upload, &CancelFlag::new())
    }

    /// Like [`create()`](#method.create), but gives up with
    /// [`ArchiveError::Cancelled`] once `cancel` is set.
    /// The flag is checked before every read from the upload and once more
    /// before the archive is published.
    ///
    /// [`ArchiveError::Cancelled`]: ../result/enum.ArchiveError.html#variant.Cancelled
    pub fn create_cancellable<R: Read>(
        &self,
        upload: Option<Upload<R>>,
        cancel: &CancelFlag,
    ) -> ArchiveResult<String> {
        let Upload {
            name: declared_name,
            mut reader,
            declared_len,
        } = upload.ok_or(ArchiveError::MissingInput)?;

        let name = SafeName::parse(&declared_name).map_err(|rejection| {
            warn!("Rejected upload name {:?}: {}", declared_name, rejection);
            rejection
        })?;

        let policy = self.config.collision_policy();
        if policy == CollisionPolicy::Reject && self.config.root().join(name.archive_name()).exists()
        {
            return Err(ArchiveError::AlreadyExists(name.archive_name()));
        }

        let mut staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(self.config.root())?;
        debug!("Staging {} at {}", name, staged.path().display());

        let summary = self.write_archive(staged.as_file_mut(), &name, &mut reader, cancel)?;
        if let Some(declared) = declared_len {
            if declared != summary.size {
                warn!(
                    "Upload {} declared {} bytes but sent {}",
                    name, declared, summary.size
                );
            }
        }

        cancel.check()?;
        let archive_name = self.publish(staged, &name)?;
        info!(
            "Archived {} as {} ({} -> {} bytes)",
            name, archive_name, summary.size, summary.archive_size
        );
        Ok(archive_name)
    }

    /// Deletes staging files that haven't been written to for at least `older_than`,
    /// and returns how many it removed.
    ///
    /// Staging files are normally cleaned up on every exit path, but not if the
    /// process dies mid-upload. Pick `older_than` longer than any upload may stall
    /// for: a live upload whose staging file is swept fails with
    /// [`ArchiveError::Storage`] when it tries to publish.
    ///
    /// [`ArchiveError::Storage`]: ../result/enum.ArchiveError.html#variant.Storage
    pub fn sweep_staging(&self, older_than: Duration) -> ArchiveResult<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in std::fs::read_dir(self.config.root())? {
            let entry = entry?;
            let file_name = entry.file_name();
            let is_staging = file_name
                .to_str()
                .map_or(false, |n| n.starts_with(STAGING_PREFIX) && n.ends_with(STAGING_SUFFIX));
            if !is_staging {
                continue;
            }

            // Doesn't follow symlinks.
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let idle = now
                .duration_since(metadata.modified()?)
                .unwrap_or(Duration::ZERO);
            if idle < older_than {
                trace!("{:?} is still fresh", file_name);
                continue;
            }

            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!("Removed stale staging file {:?}", file_name);
                    removed += 1;
                }
                // Someone else got to it first.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed > 0 {
            info!("Swept {} stale staging file(s) from {}", removed, self.config.root());
        }
        Ok(removed)
    }

    /// Streams `reader` through the encoder into `file`, one buffer at a time.
    fn write_archive<R: Read>(
        &self,
        file: &mut File,
        name: &SafeName,
        reader: &mut R,
        cancel: &CancelFlag,
    ) -> ArchiveResult<EntrySummary> {
        let now = chrono::Local::now().naive_local();
        let mut writer = EntryWriter::new(
            BufWriter::new(&mut *file),
            name.as_str(),
            self.config.compression_level(),
            &now,
        )?;

        let mut buffer = vec![0u8; self.config.buffer_size()];
        loop {
            cancel.check()?;
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Upload {} failed after {} bytes: {}", name, writer.bytes_written(), e);
                    return Err(e.into());
                }
            };
            writer.write_all(&buffer[..n])?;
        }

        let (buffered, summary) = writer.finish()?;
        buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(summary)
    }

    /// Renames the finished staging file into place according to the collision policy.
    fn publish(&self, staged: NamedTempFile, name: &SafeName) -> ArchiveResult<String> {
        let root = self.config.root();
        match self.config.collision_policy() {
            CollisionPolicy::Overwrite => {
                let archive_name = name.archive_name();
                staged
                    .persist(root.join(&archive_name))
                    .map_err(|e| e.error)?;
                Ok(archive_name)
            }
            CollisionPolicy::Reject => {
                let archive_name = name.archive_name();
                match staged.persist_noclobber(root.join(&archive_name)) {
                    Ok(_) => Ok(archive_name),
                    Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                        Err(ArchiveError::AlreadyExists(archive_name))
                    }
                    Err(e) => Err(e.error.into()),
                }
            }
            CollisionPolicy::Uniquify => {
                let mut staged = staged;
                for n in 1..=MAX_UNIQUIFY_ATTEMPTS {
                    let archive_name = name.numbered_archive_name(n);
                    match staged.persist_noclobber(root.join(&archive_name)) {
                        Ok(_) => return Ok(archive_name),
                        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                            trace!("{} is taken", archive_name);
                            staged = e.file;
                        }
                        Err(e) => return Err(e.error.into()),
                    }
                }
                Err(ArchiveError::AlreadyExists(name.archive_name()))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino::Utf8PathBuf;

    fn store(policy: CollisionPolicy) -> (tempfile::TempDir, Archiver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap();
        let config = StoreConfig::new(root).unwrap().with_collision_policy(policy);
        (dir, Archiver::new(config))
    }

    fn names_in(dir: &tempfile::TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn missing_input_has_no_side_effects() {
        let (dir, archiver) = store(CollisionPolicy::Uniquify);
        let result = archiver.create::<&[u8]>(None);
        assert!(matches!(result, Err(ArchiveError::MissingInput)));
        assert!(names_in(&dir).is_empty());
    }

    #[test]
    fn rejected_name_has_no_side_effects() {
        let (dir, archiver) = store(CollisionPolicy::Uniquify);
        let result = archiver.create(Some(Upload::new("../../etc/passwd", &b"root"[..])));
        assert!(matches!(result, Err(ArchiveError::InvalidName(_))));
        assert!(names_in(&dir).is_empty());
    }

    #[test]
    fn uniquify_numbers_duplicates() {
        let (dir, archiver) = store(CollisionPolicy::Uniquify);
        for _ in 0..3 {
            archiver.create(Some(Upload::new("a.txt", &b"a"[..]))).unwrap();
        }
        assert_eq!(names_in(&dir), ["a.txt.zip", "a.txt_(2).zip", "a.txt_(3).zip"]);
    }

    #[test]
    fn reject_refuses_duplicates() {
        let (dir, archiver) = store(CollisionPolicy::Reject);
        assert_eq!(
            archiver.create(Some(Upload::new("a.txt", &b"a"[..]))).unwrap(),
            "a.txt.zip"
        );
        let second = archiver.create(Some(Upload::new("a.txt", &b"b"[..])));
        assert!(matches!(second, Err(ArchiveError::AlreadyExists(n)) if n == "a.txt.zip"));
        assert_eq!(names_in(&dir), ["a.txt.zip"]);
    }

    #[test]
    fn overwrite_replaces() {
        let (dir, archiver) = store(CollisionPolicy::Overwrite);
        archiver.create(Some(Upload::new("a.txt", &b"first"[..]))).unwrap();
        let before = std::fs::read(dir.path().join("a.txt.zip")).unwrap();
        archiver.create(Some(Upload::new("a.txt", &b"second!"[..]))).unwrap();
        let after = std::fs::read(dir.path().join("a.txt.zip")).unwrap();
        assert_ne!(before, after);
        assert_eq!(names_in(&dir), ["a.txt.zip"]);
    }

    #[test]
    fn sweep_removes_only_stale_staging_files() {
        let (dir, archiver) = store(CollisionPolicy::Uniquify);
        for name in &[".zipdrop-abc123.part", ".zipdrop-abc123.zip", "report.part", "a.zip"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join(".zipdrop-dir.part")).unwrap();

        let hour = Duration::from_secs(3600);
        assert_eq!(archiver.sweep_staging(hour).unwrap(), 0);

        let stale = std::fs::File::options()
            .write(true)
            .open(dir.path().join(".zipdrop-abc123.part"))
            .unwrap();
        stale.set_modified(SystemTime::now() - 2 * hour).unwrap();
        drop(stale);

        assert_eq!(archiver.sweep_staging(hour).unwrap(), 1);
        assert_eq!(
            names_in(&dir),
            [".zipdrop-abc123.zip", ".zipdrop-dir.part", "a.zip", "report.part"]
        );
    }

    #[test]
    fn sweep_leaves_published_archives_alone() {
        let (dir, archiver) = store(CollisionPolicy::Uniquify);
        archiver.create(Some(Upload::new("a.txt", &b"a"[..]))).unwrap();
        assert_eq!(archiver.sweep_staging(Duration::ZERO).unwrap(), 0);
        assert_eq!(names_in(&dir), ["a.txt.zip"]);
    }

    #[test]
    fn cancelled_before_start_leaves_nothing() {
        let (dir, archiver) = store(CollisionPolicy::Uniquify);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = archiver.create_cancellable(Some(Upload::new("a.txt", &b"a"[..])), &cancel);
        assert!(matches!(result, Err(ArchiveError::Cancelled)));
        assert!(names_in(&dir).is_empty());
    }
}
