//! Append-only per-domain corpus buffers.
//!
//! A bucket buffers appended sentences in memory until [`CorpusBucket::flush`]
//! commits them to its backing file. The analyzed prefix of the file is tracked
//! so the context index only ever receives content it has not seen.

use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::constants::BUCKET_FILE_EXTENSION;
use crate::error::Result;
use crate::types::{AnalysisOptions, BucketDescriptor, Domain};

#[derive(Debug)]
pub struct CorpusBucket {
    domain: Domain,
    path: PathBuf,
    file_name: String,
    file: Option<fs_err::File>,
    buffer: String,
    buffered_lines: u64,
    size: u64,
    analyzed_size: u64,
    lines: u64,
}

impl CorpusBucket {
    #[must_use]
    pub fn file_name_for(domain: Domain) -> String {
        format!("{domain}.{BUCKET_FILE_EXTENSION}")
    }

    /// A bucket with no content yet.
    #[must_use]
    pub fn new(directory: &Path, domain: Domain) -> Self {
        let file_name = Self::file_name_for(domain);
        Self {
            domain,
            path: directory.join(&file_name),
            file_name,
            file: None,
            buffer: String::new(),
            buffered_lines: 0,
            size: 0,
            analyzed_size: 0,
            lines: 0,
        }
    }

    #[must_use]
    pub fn from_descriptor(directory: &Path, descriptor: &BucketDescriptor) -> Self {
        Self {
            domain: descriptor.domain,
            path: directory.join(&descriptor.file_name),
            file_name: descriptor.file_name.clone(),
            file: None,
            buffer: String::new(),
            buffered_lines: 0,
            size: descriptor.size,
            analyzed_size: descriptor.analyzed_size.min(descriptor.size),
            lines: descriptor.lines,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> BucketDescriptor {
        BucketDescriptor {
            domain: self.domain,
            file_name: self.file_name.clone(),
            size: self.size,
            analyzed_size: self.analyzed_size,
            lines: self.lines,
        }
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Bytes committed to disk.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn analyzed_size(&self) -> u64 {
        self.analyzed_size
    }

    /// Lines committed to disk.
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    #[must_use]
    pub fn has_unflushed(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Open the backing file for appending.
    ///
    /// Bytes past the committed size belong to a flush whose metadata never
    /// reached disk; they are cut so the file agrees with the persisted stream
    /// offsets, from which upstream replication resumes.
    pub fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let file = fs_err::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > self.size {
            tracing::warn!(
                domain = self.domain,
                on_disk,
                committed = self.size,
                "truncating uncommitted bucket tail"
            );
            file.set_len(self.size)?;
        } else if on_disk < self.size {
            tracing::warn!(
                domain = self.domain,
                on_disk,
                committed = self.size,
                "bucket file shorter than recorded; continuing from file end"
            );
            self.size = on_disk;
            self.analyzed_size = self.analyzed_size.min(on_disk);
        }
        self.file = Some(file);
        Ok(())
    }

    /// Buffer one sentence. Line breaks inside the sentence become spaces so
    /// that every sentence occupies exactly one line.
    pub fn append(&mut self, sentence: &str) {
        self.buffer.reserve(sentence.len() + 1);
        for ch in sentence.chars() {
            self.buffer
                .push(if ch == '\n' || ch == '\r' { ' ' } else { ch });
        }
        self.buffer.push('\n');
        self.buffered_lines += 1;
    }

    /// Commit the in-memory buffer to the backing file.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.open()?;
        let size = self.size;
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => return Ok(()),
        };
        file.seek(SeekFrom::Start(size))?;
        file.write_all(self.buffer.as_bytes())?;
        file.sync_data()?;

        self.size += self.buffer.len() as u64;
        self.lines += self.buffered_lines;
        self.buffer.clear();
        self.buffered_lines = 0;
        Ok(())
    }

    /// Whether enough flushed content has accumulated to feed the context index.
    #[must_use]
    pub fn should_analyze(&self, options: &AnalysisOptions) -> bool {
        let pending = self.size.saturating_sub(self.analyzed_size);
        if pending == 0 {
            return false;
        }
        self.analyzed_size == 0
            || pending >= options.min_pending_bytes
            || pending as f64 >= self.analyzed_size as f64 * options.growth_ratio
    }

    /// Flushed lines that have not been fed to the context index yet.
    pub fn read_unanalyzed(&self) -> Result<Vec<String>> {
        let mut file = fs_err::File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.analyzed_size))?;
        let reader = BufReader::new(file.take(self.size - self.analyzed_size));
        let mut lines = Vec::new();
        for line in reader.lines() {
            lines.push(line?);
        }
        Ok(lines)
    }

    pub fn mark_analyzed(&mut self, analyzed_size: u64) {
        self.analyzed_size = analyzed_size.min(self.size);
    }

    /// Release the file handle. Buffered content is not flushed.
    pub fn close(&mut self) {
        self.file = None;
    }
}
