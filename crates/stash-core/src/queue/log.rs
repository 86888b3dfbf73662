//! Synchronous task log engine.
//!
//! `TaskLog` owns the file handle and performs every read and write of the
//! binary format. It knows nothing about handles, generations or async; the
//! `FileTaskQueue` wrapper layers those on top and serializes access.
//!
//! Sibling files of `q.log`: `q.log.lock` carries the exclusive owner lock
//! and `q.log.compact.tmp` exists only while a compaction is in flight.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::format::{self, HEADER_LEN, PREFIX_LEN, RETRY_COUNT_OFFSET, RecordPrefix, TOMBSTONED};
use crate::domain::{QueueError, Task};
use crate::ports::Compaction;

const LOCK_SUFFIX: &str = ".lock";
const COMPACT_SUFFIX: &str = ".compact.tmp";

/// What `TaskLog::open` had to fix up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Recovery {
    /// Bytes of a partially written trailing record that were cut off.
    pub torn_bytes: u64,
    /// A compaction temp file left by an interrupted compaction was deleted.
    pub removed_compaction_file: bool,
    /// Live count stored in the header before it was corrected, if it was.
    pub stale_live_count: Option<u64>,
}

/// A live record found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LiveRecord {
    pub offset: u64,
    pub retry_count: u32,
    pub task: Task,
}

#[derive(Debug)]
pub(crate) struct TaskLog {
    path: PathBuf,
    file: File,
    /// Holds the exclusive lock on the sibling lock file until drop.
    _lock: File,
    /// Mirror of the header's live count.
    live_count: u64,
    /// Mirror of the file length.
    len: u64,
    sync_writes: bool,
}

impl TaskLog {
    /// Open or create the log at `path`.
    ///
    /// Fails with `Unavailable` while another `TaskLog` holds the same path.
    ///
    /// An existing log is scanned end to end: a torn trailing record is cut
    /// off and a header whose live count disagrees with the records is
    /// rewritten. A record running past the end of the file only counts as
    /// torn if every live record the header accounts for precedes it;
    /// otherwise truncating would drop acknowledged tasks and the open fails
    /// as corrupted. Anything else that does not parse is corruption too.
    pub fn open(path: &Path, sync_writes: bool) -> Result<(Self, Recovery), QueueError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let lock = lock_exclusive(path)?;
        let removed_compaction_file = remove_leftover(&sibling(path, COMPACT_SUFFIX))?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();

        let mut log = TaskLog {
            path: path.to_path_buf(),
            file,
            _lock: lock,
            live_count: 0,
            len,
            sync_writes,
        };

        if len == 0 {
            log.write_header()?;
            log.len = HEADER_LEN;
            log.sync()?;
            debug!(path = %path.display(), "created task log");
            return Ok((
                log,
                Recovery {
                    removed_compaction_file,
                    ..Recovery::default()
                },
            ));
        }
        if len < HEADER_LEN {
            return Err(QueueError::corrupted(
                0,
                format!("file of {len} bytes is shorter than the header"),
            ));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        log.file.seek(SeekFrom::Start(0))?;
        log.file.read_exact(&mut header)?;
        let stored = format::decode_header(&header)?;

        let (valid_len, live) = log.scan_all()?;
        let mut recovery = Recovery {
            removed_compaction_file,
            ..Recovery::default()
        };

        if valid_len < log.len {
            if live < stored {
                return Err(QueueError::corrupted(
                    valid_len,
                    format!(
                        "record runs past end of log ({} bytes) but only {live} of {stored} live records precede it",
                        log.len
                    ),
                ));
            }
            recovery.torn_bytes = log.len - valid_len;
            warn!(
                path = %path.display(),
                torn_bytes = recovery.torn_bytes,
                "truncating partially written record at end of task log"
            );
            log.file.set_len(valid_len)?;
            log.len = valid_len;
        }

        log.live_count = live;
        if stored != live {
            recovery.stale_live_count = Some(stored);
            warn!(
                path = %path.display(),
                stored,
                scanned = live,
                "task log header live count was stale, rewriting"
            );
            log.write_header()?;
        }
        if recovery.torn_bytes > 0 || recovery.stale_live_count.is_some() {
            log.sync()?;
        }

        debug!(path = %path.display(), live, len = log.len, "opened task log");
        Ok((log, recovery))
    }

    pub fn live_count(&self) -> u64 {
        self.live_count
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Append records at the end of the log, then rewrite the header once.
    /// Returns the offset of each new record.
    pub fn append(&mut self, tasks: &[Task]) -> Result<Vec<u64>, QueueError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let mut buf = Vec::new();
        let mut offsets = Vec::with_capacity(tasks.len());
        for task in tasks {
            offsets.push(self.len + buf.len() as u64);
            buf.extend_from_slice(&format::encode_record(task)?);
        }

        self.file.seek(SeekFrom::Start(self.len))?;
        self.file.write_all(&buf)?;
        self.len += buf.len() as u64;

        self.live_count += tasks.len() as u64;
        self.write_header()?;
        self.sync()?;
        Ok(offsets)
    }

    /// Collect up to `limit` live records in file order. Tombstoned records
    /// are skipped using their stored length without reading the body.
    pub fn scan_live(&mut self, limit: usize) -> Result<Vec<LiveRecord>, QueueError> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }

        let len = self.len;
        self.file.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut reader = BufReader::new(&mut self.file);
        let mut offset = HEADER_LEN;

        while offset < len && out.len() < limit {
            let prefix = read_prefix(&mut reader, offset)?;
            if offset + prefix.record_len() > len {
                return Err(QueueError::corrupted(
                    offset,
                    format!(
                        "record of {} bytes runs past end of log ({len} bytes)",
                        prefix.record_len()
                    ),
                ));
            }
            if prefix.tombstoned {
                reader.seek_relative(i64::from(prefix.body_len))?;
            } else {
                let mut body = vec![0u8; prefix.body_len as usize];
                reader.read_exact(&mut body)?;
                let (retry_count, task) = format::decode_body(&body, offset)?;
                out.push(LiveRecord {
                    offset,
                    retry_count,
                    task,
                });
            }
            offset += prefix.record_len();
        }
        Ok(out)
    }

    /// Flip the tombstone byte of each live record at `offsets`. Returns how
    /// many were flipped; the header is only rewritten if that is non-zero.
    ///
    /// If a flip fails part way, the records already flipped are still
    /// counted out of the live count and the header before the error is
    /// returned.
    pub fn tombstone(&mut self, offsets: &[u64]) -> Result<u64, QueueError> {
        let mut removed = 0u64;
        let flipped = self.flip_tombstones(offsets, &mut removed);

        let persisted = if removed > 0 {
            self.live_count = self.live_count.saturating_sub(removed);
            self.write_header().and_then(|()| self.sync())
        } else {
            Ok(())
        };
        flipped?;
        persisted?;
        Ok(removed)
    }

    fn flip_tombstones(&mut self, offsets: &[u64], removed: &mut u64) -> Result<(), QueueError> {
        for &offset in offsets {
            let Some(prefix) = self.prefix_at(offset)? else {
                continue;
            };
            if prefix.tombstoned {
                continue;
            }
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(&[TOMBSTONED])?;
            *removed += 1;
        }
        Ok(())
    }

    /// Increment the retry count of each live record at `offsets` in place.
    pub fn bump_retry(&mut self, offsets: &[u64]) -> Result<u64, QueueError> {
        let mut bumped = 0u64;
        for &offset in offsets {
            let Some(prefix) = self.prefix_at(offset)? else {
                continue;
            };
            if prefix.tombstoned {
                continue;
            }
            let field = offset + RETRY_COUNT_OFFSET;
            let mut buf = [0u8; 4];
            self.file.seek(SeekFrom::Start(field))?;
            self.file.read_exact(&mut buf)?;
            let next = u32::from_be_bytes(buf).saturating_add(1);
            self.file.seek(SeekFrom::Start(field))?;
            self.file.write_all(&next.to_be_bytes())?;
            bumped += 1;
        }

        if bumped > 0 {
            self.sync()?;
        }
        Ok(bumped)
    }

    /// Reclaim the contiguous run of tombstoned records at the head of the
    /// log. Dead records after the first live one are left where they are.
    ///
    /// The surviving tail is written to a sibling temp file which then
    /// replaces the log, so a crash mid-compaction leaves either the old or
    /// the new file, never a mix. The temp file's handle becomes the log's
    /// handle, so nothing can fail between the rename and the swap.
    pub fn compact(&mut self) -> Result<Compaction, QueueError> {
        let len = self.len;
        let mut offset = HEADER_LEN;
        let mut records = 0u64;

        while offset < len {
            let Some(prefix) = self.prefix_at(offset)? else {
                break;
            };
            if !prefix.tombstoned {
                break;
            }
            offset += prefix.record_len();
            records += 1;
        }

        let reclaimed = offset - HEADER_LEN;
        if reclaimed == 0 {
            return Ok(Compaction::default());
        }

        let mut tail = Vec::with_capacity((len - offset) as usize);
        self.file.seek(SeekFrom::Start(offset))?;
        (&mut self.file).take(len - offset).read_to_end(&mut tail)?;

        let tmp_path = sibling(&self.path, COMPACT_SUFFIX);
        let mut tmp = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&tmp_path)?;
        let replaced = write_synced(&mut tmp, &format::encode_header(self.live_count), &tail)
            .and_then(|()| fs::rename(&tmp_path, &self.path));
        if let Err(e) = replaced {
            discard(&tmp_path);
            return Err(e.into());
        }

        self.file = tmp;
        self.len = HEADER_LEN + tail.len() as u64;
        if self.sync_writes {
            sync_parent_dir(&self.path)?;
        }

        debug!(
            path = %self.path.display(),
            records,
            reclaimed_bytes = reclaimed,
            "compacted task log"
        );
        Ok(Compaction {
            records_reclaimed: records,
            reclaimed_bytes: reclaimed,
        })
    }

    /// Walk every record, validating live bodies. Returns the length of the
    /// longest prefix made of complete records and the live count within it.
    fn scan_all(&mut self) -> Result<(u64, u64), QueueError> {
        let len = self.len;
        self.file.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut reader = BufReader::new(&mut self.file);
        let mut offset = HEADER_LEN;
        let mut live = 0u64;

        while offset < len {
            if offset + PREFIX_LEN > len {
                break;
            }
            let prefix = read_prefix(&mut reader, offset)?;
            if offset + prefix.record_len() > len {
                break;
            }
            if prefix.tombstoned {
                reader.seek_relative(i64::from(prefix.body_len))?;
            } else {
                let mut body = vec![0u8; prefix.body_len as usize];
                reader.read_exact(&mut body)?;
                format::decode_body(&body, offset)?;
                live += 1;
            }
            offset += prefix.record_len();
        }
        Ok((offset, live))
    }

    /// Read the prefix at `offset`, or `None` if no record can start there.
    fn prefix_at(&mut self, offset: u64) -> Result<Option<RecordPrefix>, QueueError> {
        if offset < HEADER_LEN || offset + PREFIX_LEN > self.len {
            return Ok(None);
        }
        let mut buf = [0u8; PREFIX_LEN as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        format::decode_prefix(&buf, offset).map(Some)
    }

    fn write_header(&mut self) -> Result<(), QueueError> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&format::encode_header(self.live_count))?;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), QueueError> {
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

/// `<file name><suffix>` in the same directory as `path`.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn lock_exclusive(path: &Path) -> Result<File, QueueError> {
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(sibling(path, LOCK_SUFFIX))?;
    match lock.try_lock() {
        Ok(()) => Ok(lock),
        Err(TryLockError::WouldBlock) => Err(QueueError::Unavailable(format!(
            "task log {} is locked by another owner",
            path.display()
        ))),
        Err(TryLockError::Error(e)) => Err(e.into()),
    }
}

/// Delete `path` if it exists. Returns whether there was anything to delete.
fn remove_leftover(path: &Path) -> Result<bool, QueueError> {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!(path = %path.display(), "removed leftover compaction file");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove compaction file");
    }
}

fn write_synced(file: &mut File, header: &[u8], body: &[u8]) -> io::Result<()> {
    file.write_all(header)?;
    file.write_all(body)?;
    file.sync_all()
}

/// Make a rename in the directory of `path` durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<(), QueueError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<(), QueueError> {
    Ok(())
}

fn read_prefix<R: Read>(reader: &mut R, offset: u64) -> Result<RecordPrefix, QueueError> {
    let mut buf = [0u8; PREFIX_LEN as usize];
    reader.read_exact(&mut buf)?;
    format::decode_prefix(&buf, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(path: &Path) -> TaskLog {
        TaskLog::open(path, true).unwrap().0
    }

    fn types(records: &[LiveRecord]) -> Vec<&str> {
        records.iter().map(|r| r.task.task_type()).collect()
    }

    #[test]
    fn new_log_is_just_a_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let log = open(&path);

        assert_eq!(log.live_count(), 0);
        assert_eq!(log.len(), HEADER_LEN);
        assert_eq!(fs::read(&path).unwrap(), format::encode_header(0));
    }

    #[test]
    fn append_returns_record_offsets_and_updates_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let mut log = open(&path);

        let offsets = log
            .append(&[Task::new("a", "1"), Task::new("b", "22")])
            .unwrap();

        let first_len = format::encode_record(&Task::new("a", "1")).unwrap().len() as u64;
        assert_eq!(offsets, vec![HEADER_LEN, HEADER_LEN + first_len]);
        assert_eq!(log.live_count(), 2);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..HEADER_LEN as usize], &format::encode_header(2));
    }

    #[test]
    fn tombstoned_records_are_skipped_by_scan() {
        let dir = tempdir().unwrap();
        let mut log = open(&dir.path().join("q.log"));
        let offsets = log
            .append(&[Task::new("a", ""), Task::new("b", ""), Task::new("c", "")])
            .unwrap();

        assert_eq!(log.tombstone(&[offsets[1]]).unwrap(), 1);
        let live = log.scan_live(10).unwrap();
        assert_eq!(types(&live), vec!["a", "c"]);
        assert_eq!(log.live_count(), 2);
    }

    #[test]
    fn tombstone_is_idempotent_and_ignores_unknown_offsets() {
        let dir = tempdir().unwrap();
        let mut log = open(&dir.path().join("q.log"));
        let offsets = log.append(&[Task::new("a", "")]).unwrap();

        assert_eq!(log.tombstone(&[offsets[0], offsets[0]]).unwrap(), 1);
        assert_eq!(log.tombstone(&[offsets[0]]).unwrap(), 0);
        assert_eq!(log.tombstone(&[0, 10_000]).unwrap(), 0);
        assert_eq!(log.live_count(), 0);
    }

    #[test]
    fn bump_retry_patches_count_in_place() {
        let dir = tempdir().unwrap();
        let mut log = open(&dir.path().join("q.log"));
        let offsets = log.append(&[Task::new("a", "x"), Task::new("b", "y")]).unwrap();
        let len_before = log.len();

        log.bump_retry(&[offsets[1]]).unwrap();
        log.bump_retry(&[offsets[1]]).unwrap();

        let live = log.scan_live(10).unwrap();
        assert_eq!(live[0].retry_count, 0);
        assert_eq!(live[1].retry_count, 2);
        assert_eq!(live[1].task, Task::new("b", "y"));
        assert_eq!(log.len(), len_before);
    }

    #[test]
    fn bump_retry_skips_tombstoned_records() {
        let dir = tempdir().unwrap();
        let mut log = open(&dir.path().join("q.log"));
        let offsets = log.append(&[Task::new("a", "")]).unwrap();
        log.tombstone(&offsets).unwrap();

        assert_eq!(log.bump_retry(&offsets).unwrap(), 0);
    }

    #[test]
    fn compact_reclaims_only_the_dead_prefix() {
        let dir = tempdir().unwrap();
        let mut log = open(&dir.path().join("q.log"));
        let offsets = log
            .append(&[
                Task::new("a", "1"),
                Task::new("b", "2"),
                Task::new("c", "3"),
                Task::new("d", "4"),
            ])
            .unwrap();
        // a and b form the dead prefix; d is dead but follows live c
        log.tombstone(&[offsets[0], offsets[1], offsets[3]]).unwrap();
        let len_before = log.len();

        let compaction = log.compact().unwrap();
        assert_eq!(compaction.records_reclaimed, 2);
        assert_eq!(compaction.reclaimed_bytes, offsets[2] - HEADER_LEN);

        let live = log.scan_live(10).unwrap();
        assert_eq!(types(&live), vec!["c"]);
        assert_eq!(live[0].offset, HEADER_LEN);
        assert_eq!(log.len(), HEADER_LEN + (len_before - offsets[2]));
        assert_eq!(log.live_count(), 1);

        // the dead record behind c survives until c itself is removed
        log.tombstone(&[HEADER_LEN]).unwrap();
        assert_eq!(log.compact().unwrap().records_reclaimed, 2);
        assert_eq!(log.len(), HEADER_LEN);
    }

    #[test]
    fn compact_of_fully_dead_log_shrinks_to_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let mut log = open(&path);
        let offsets = log.append(&[Task::new("a", "1"), Task::new("b", "2")]).unwrap();
        log.tombstone(&offsets).unwrap();

        let compaction = log.compact().unwrap();
        assert_eq!(compaction.records_reclaimed, 2);
        assert_eq!(log.len(), HEADER_LEN);
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_LEN);
    }

    #[test]
    fn compact_without_dead_prefix_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut log = open(&dir.path().join("q.log"));
        let offsets = log.append(&[Task::new("a", "1"), Task::new("b", "2")]).unwrap();
        log.tombstone(&[offsets[1]]).unwrap();
        let len = log.len();

        assert_eq!(log.compact().unwrap(), Compaction::default());
        assert_eq!(log.len(), len);
    }

    #[test]
    fn log_can_be_appended_after_compaction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let mut log = open(&path);
        let offsets = log.append(&[Task::new("a", "1"), Task::new("b", "2")]).unwrap();
        log.tombstone(&[offsets[0]]).unwrap();
        log.compact().unwrap();

        log.append(&[Task::new("c", "3")]).unwrap();
        drop(log);

        let mut reopened = open(&path);
        assert_eq!(types(&reopened.scan_live(10).unwrap()), vec!["b", "c"]);
        assert_eq!(reopened.live_count(), 2);
    }

    #[test]
    fn reopen_preserves_records_and_retry_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        {
            let mut log = open(&path);
            let offsets = log.append(&[Task::new("a", "1"), Task::new("b", "2")]).unwrap();
            log.bump_retry(&[offsets[0]]).unwrap();
            log.tombstone(&[offsets[1]]).unwrap();
        }

        let (mut log, recovery) = TaskLog::open(&path, true).unwrap();
        assert_eq!(recovery, Recovery::default());
        let live = log.scan_live(10).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].retry_count, 1);
        assert_eq!(log.live_count(), 1);
    }

    #[test]
    fn open_truncates_torn_trailing_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let good_len = {
            let mut log = open(&path);
            log.append(&[Task::new("a", "1")]).unwrap();
            log.len()
        };

        // a record whose body never made it to disk
        let record = format::encode_record(&Task::new("b", "lost")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&record[..record.len() - 2]).unwrap();
        drop(file);

        let (mut log, recovery) = TaskLog::open(&path, true).unwrap();
        assert_eq!(recovery.torn_bytes, record.len() as u64 - 2);
        assert_eq!(log.len(), good_len);
        assert_eq!(types(&log.scan_live(10).unwrap()), vec!["a"]);
    }

    #[test]
    fn open_keeps_complete_prefix_of_torn_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        {
            let mut log = open(&path);
            log.append(&[Task::new("a", "1")]).unwrap();
        }

        // a batch of three whose last record and header rewrite were lost
        let mut batch = Vec::new();
        for t in ["b", "c", "d"] {
            batch.extend(format::encode_record(&Task::new(t, "payload")).unwrap());
        }
        let cut = 3;
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&batch[..batch.len() - cut]).unwrap();
        drop(file);

        let (mut log, recovery) = TaskLog::open(&path, true).unwrap();
        let last_len = format::encode_record(&Task::new("d", "payload")).unwrap().len();
        assert_eq!(recovery.torn_bytes, (last_len - cut) as u64);
        assert_eq!(recovery.stale_live_count, Some(1));
        assert_eq!(types(&log.scan_live(10).unwrap()), vec!["a", "b", "c"]);
        assert_eq!(log.live_count(), 3);
    }

    #[test]
    fn open_rejects_length_that_would_cut_off_live_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        {
            let mut log = open(&path);
            log.append(&[Task::new("a", "1"), Task::new("b", "2"), Task::new("c", "3")])
                .unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let len_before = bytes.len() as u64;
        // high byte of the first record's body_len
        bytes[HEADER_LEN as usize + 1] ^= 0x01;
        fs::write(&path, bytes).unwrap();

        let err = TaskLog::open(&path, true).unwrap_err();
        assert!(matches!(err, QueueError::Corrupted { offset: HEADER_LEN, .. }));
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
    }

    #[test]
    fn open_truncates_overlong_dead_record_at_the_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let offsets = {
            let mut log = open(&path);
            let offsets = log.append(&[Task::new("a", "1"), Task::new("b", "2")]).unwrap();
            log.tombstone(&[offsets[1]]).unwrap();
            offsets
        };
        let mut bytes = fs::read(&path).unwrap();
        bytes[offsets[1] as usize + 1] ^= 0x01;
        fs::write(&path, bytes).unwrap();

        // only the dead record is lost, so this is still a torn tail
        let (mut log, recovery) = TaskLog::open(&path, true).unwrap();
        assert_eq!(log.len(), offsets[1]);
        assert!(recovery.torn_bytes > 0);
        assert_eq!(types(&log.scan_live(10).unwrap()), vec!["a"]);
    }

    #[test]
    fn failed_tombstone_still_counts_records_already_flipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let mut log = open(&path);
        let offsets = log.append(&[Task::new("a", "1"), Task::new("b", "2")]).unwrap();

        // make the second flip fail after the first one landed
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(offsets[1])).unwrap();
        file.write_all(&[0x7f]).unwrap();
        drop(file);

        let err = log.tombstone(&offsets).unwrap_err();
        assert!(matches!(err, QueueError::Corrupted { .. }));
        assert_eq!(log.live_count(), 1);
        assert_eq!(&fs::read(&path).unwrap()[..9], &format::encode_header(1));

        // retrying the flipped handle is a no-op and the count stays right
        assert_eq!(log.tombstone(&[offsets[0]]).unwrap(), 0);
        assert_eq!(log.live_count(), 1);
    }

    #[test]
    fn second_owner_of_a_path_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let log = open(&path);

        assert!(matches!(
            TaskLog::open(&path, true),
            Err(QueueError::Unavailable(_))
        ));

        drop(log);
        TaskLog::open(&path, true).unwrap();
    }

    #[test]
    fn appends_after_compaction_reach_the_file_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let mut log = open(&path);
        let offsets = log.append(&[Task::new("a", "1"), Task::new("b", "2")]).unwrap();
        log.tombstone(&[offsets[0]]).unwrap();
        log.compact().unwrap();

        log.append(&[Task::new("c", "3")]).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), log.len());
        assert_eq!(&fs::read(&path).unwrap()[..9], &format::encode_header(2));
        assert!(!sibling(&path, COMPACT_SUFFIX).exists());
    }

    #[test]
    fn open_removes_only_its_own_leftover_compaction_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let own = dir.path().join("q.log.compact.tmp");
        let other = dir.path().join("q.queue.compact.tmp");
        fs::write(&own, b"partial").unwrap();
        fs::write(&other, b"partial").unwrap();

        let (_log, recovery) = TaskLog::open(&path, true).unwrap();
        assert!(recovery.removed_compaction_file);
        assert!(!own.exists());
        assert!(other.exists());
    }

    #[test]
    fn open_repairs_stale_live_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        {
            let mut log = open(&path);
            log.append(&[Task::new("a", "1"), Task::new("b", "2")]).unwrap();
        }
        // simulate a crash between the record write and the header rewrite
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all(&format::encode_header(1)).unwrap();
        drop(file);

        let (log, recovery) = TaskLog::open(&path, true).unwrap();
        assert_eq!(recovery.stale_live_count, Some(1));
        assert_eq!(log.live_count(), 2);
        assert_eq!(&fs::read(&path).unwrap()[..9], &format::encode_header(2));
    }

    #[test]
    fn open_rejects_corrupted_tombstone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        {
            let mut log = open(&path);
            log.append(&[Task::new("a", "1")]).unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_LEN as usize] = 0x7f;
        fs::write(&path, bytes).unwrap();

        let err = TaskLog::open(&path, true).unwrap_err();
        assert!(matches!(err, QueueError::Corrupted { offset: HEADER_LEN, .. }));
    }

    #[test]
    fn open_rejects_unknown_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        let mut header = format::encode_header(0);
        header[0] = 2;
        fs::write(&path, header).unwrap();

        assert!(matches!(
            TaskLog::open(&path, true),
            Err(QueueError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn open_rejects_truncated_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.log");
        fs::write(&path, [format::FORMAT_VERSION, 0, 0]).unwrap();

        assert!(matches!(
            TaskLog::open(&path, true),
            Err(QueueError::Corrupted { offset: 0, .. })
        ));
    }
}
