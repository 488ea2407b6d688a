//! Segment bookkeeping
//!
//! The ordered collection of finished segments plus at most one segment
//! currently being written. File naming uses a monotonically increasing
//! per-process counter, so a segment path is never reused within a session
//! even after removals. Mutations are confined to the write queue; see the
//! writer for the locking discipline.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{CaptureError, CaptureResult, WriterStateError};

pub const MANIFEST_FILE: &str = "manifest.json";

/// One finished or in-progress output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub index: u64,
    pub path: PathBuf,
    pub finished: bool,
    /// Container-derived duration; None while the segment is open.
    pub duration: Option<Duration>,
    pub created_at: DateTime<Utc>,
}

impl Segment {
    pub fn duration_or_zero(&self) -> Duration {
        self.duration.unwrap_or(Duration::ZERO)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    written_at: DateTime<Utc>,
    total_duration: Duration,
    segments: &'a [Segment],
}

/// Ordered finished segments plus the in-progress one.
pub struct SegmentCollection {
    dir: PathBuf,
    segments: Vec<Segment>,
    counter: u64,
    writing: Option<Segment>,
    writing_offset: Option<Duration>,
    writing_duration: Duration,
}

impl SegmentCollection {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            segments: Vec::new(),
            counter: 0,
            writing: None,
            writing_offset: None,
            writing_duration: Duration::ZERO,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn count(&self) -> usize {
        self.segments.len()
    }

    pub fn snapshot(&self) -> Vec<Segment> {
        self.segments.clone()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn writing(&self) -> Option<&Segment> {
        self.writing.as_ref()
    }

    pub fn is_writing(&self) -> bool {
        self.writing.is_some()
    }

    /// Rebasing offset for the segment being written; None until the first
    /// video sample establishes it.
    pub fn writing_offset(&self) -> Option<Duration> {
        self.writing_offset
    }

    pub fn set_writing_offset(&mut self, offset: Duration) {
        self.writing_offset = Some(offset);
    }

    /// Rebased duration of the segment being written.
    pub fn writing_duration(&self) -> Duration {
        self.writing_duration
    }

    pub fn set_writing_duration(&mut self, duration: Duration) {
        self.writing_duration = duration;
    }

    /// Sum of finished segment durations plus the in-progress duration.
    pub fn total_duration(&self) -> Duration {
        self.segments
            .iter()
            .map(Segment::duration_or_zero)
            .sum::<Duration>()
            + self.writing_duration
    }

    /// Allocate a fresh segment file and mark it as being written. Fails
    /// when the backing directory cannot be created.
    pub fn start_new(&mut self) -> CaptureResult<Segment> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| CaptureError::Io(format!("create segment directory: {e}")))?;

        let path = self.dir.join(format!("take-{:03}.mp4", self.counter));
        if path.exists() {
            // A stale file can only be left by an earlier crash; the counter
            // never repeats within a session.
            if let Err(err) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), %err, "failed to clear stale segment file");
            }
        }

        let segment = Segment {
            index: self.counter,
            path,
            finished: false,
            duration: None,
            created_at: Utc::now(),
        };
        self.counter += 1;
        self.writing_offset = None;
        self.writing_duration = Duration::ZERO;
        self.writing = Some(segment.clone());
        Ok(segment)
    }

    /// Mark the writing segment finished with its container duration and
    /// append it to the ordered list.
    pub fn finish_writing(&mut self, duration: Duration) -> Option<Segment> {
        let mut segment = self.writing.take()?;
        segment.finished = true;
        segment.duration = Some(duration);
        self.segments.push(segment.clone());
        self.writing_offset = None;
        self.writing_duration = Duration::ZERO;
        self.write_manifest();
        Some(segment)
    }

    /// Drop the writing segment without appending it to the list, for
    /// cancelled or failed containers. Optionally deletes its file.
    pub fn abandon_writing(&mut self, delete_file: bool) -> Option<Segment> {
        let segment = self.writing.take()?;
        self.writing_offset = None;
        self.writing_duration = Duration::ZERO;
        if delete_file {
            if let Err(err) = fs::remove_file(&segment.path) {
                tracing::warn!(path = %segment.path.display(), %err, "failed to delete abandoned segment file");
            }
        }
        Some(segment)
    }

    /// Remove one finished segment. Rejected while a segment is being
    /// written; out-of-range indices are ignored. File deletion failure is
    /// logged, not propagated.
    pub fn remove(&mut self, index: usize, delete_file: bool) -> CaptureResult<Option<Segment>> {
        if self.writing.is_some() {
            return Err(WriterStateError::RemoveWhileWriting.into());
        }
        if index >= self.segments.len() {
            tracing::debug!(index, count = self.segments.len(), "remove index out of range");
            return Ok(None);
        }

        let segment = self.segments.remove(index);
        if delete_file {
            if let Err(err) = fs::remove_file(&segment.path) {
                tracing::warn!(path = %segment.path.display(), %err, "failed to delete segment file");
            }
        }
        self.write_manifest();
        Ok(Some(segment))
    }

    /// Clear the collection, finalizing any open write's bookkeeping first.
    /// With `delete_files` the whole backing directory is removed and the
    /// file counter starts over.
    pub fn remove_all(&mut self, delete_files: bool) {
        if self.writing.is_some() {
            let writing_duration = self.writing_duration;
            self.finish_writing(writing_duration);
        }
        self.segments.clear();

        if delete_files {
            match fs::remove_dir_all(&self.dir) {
                Ok(()) => self.counter = 0,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => self.counter = 0,
                Err(err) => {
                    tracing::warn!(dir = %self.dir.display(), %err, "failed to remove segment directory");
                }
            }
        }
    }

    fn write_manifest(&self) {
        if !self.dir.exists() {
            return;
        }
        let manifest = Manifest {
            written_at: Utc::now(),
            total_duration: self.total_duration(),
            segments: &self.segments,
        };
        let path = self.dir.join(MANIFEST_FILE);
        let write = serde_json::to_vec_pretty(&manifest)
            .map_err(std::io::Error::other)
            .and_then(|json| fs::write(&path, json));
        if let Err(err) = write {
            tracing::warn!(path = %path.display(), %err, "failed to write segment manifest");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection() -> (tempfile::TempDir, SegmentCollection) {
        let dir = tempfile::tempdir().unwrap();
        let collection = SegmentCollection::new(dir.path().join("takes"));
        (dir, collection)
    }

    #[test]
    fn start_and_finish_track_durations() {
        let (_dir, mut c) = collection();
        let seg = c.start_new().unwrap();
        assert_eq!(seg.index, 0);
        assert!(c.is_writing());

        c.set_writing_duration(Duration::from_secs(2));
        assert_eq!(c.total_duration(), Duration::from_secs(2));

        let finished = c.finish_writing(Duration::from_secs(2)).unwrap();
        assert!(finished.finished);
        assert_eq!(finished.duration, Some(Duration::from_secs(2)));
        assert_eq!(c.count(), 1);
        assert!(!c.is_writing());
        assert_eq!(c.total_duration(), Duration::from_secs(2));
    }

    #[test]
    fn remove_is_rejected_while_writing() {
        let (_dir, mut c) = collection();
        c.start_new().unwrap();
        c.finish_writing(Duration::from_secs(1));
        c.start_new().unwrap();

        let err = c.remove(0, false).unwrap_err();
        assert_eq!(
            err,
            CaptureError::WriterState(WriterStateError::RemoveWhileWriting)
        );
        assert_eq!(c.count(), 1);
    }

    #[test]
    fn counter_is_monotonic_across_removals() {
        let (_dir, mut c) = collection();
        let first = c.start_new().unwrap();
        c.finish_writing(Duration::from_secs(1));
        c.remove(0, true).unwrap();

        let second = c.start_new().unwrap();
        assert_eq!(second.index, first.index + 1);
        assert_ne!(second.path, first.path);
    }

    #[test]
    fn remove_all_with_files_resets_the_counter_and_directory() {
        let (_dir, mut c) = collection();
        c.start_new().unwrap();
        c.finish_writing(Duration::from_secs(1));
        assert!(c.directory().exists());

        c.remove_all(true);
        assert_eq!(c.count(), 0);
        assert!(!c.directory().exists());
        assert_eq!(c.start_new().unwrap().index, 0);
    }

    #[test]
    fn manifest_lists_finished_segments() {
        let (_dir, mut c) = collection();
        c.start_new().unwrap();
        c.finish_writing(Duration::from_secs(3));

        let manifest = std::fs::read_to_string(c.directory().join(MANIFEST_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(value["segments"].as_array().unwrap().len(), 1);
        assert_eq!(value["segments"][0]["finished"], true);
    }
}
