// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Line-oriented log files and the rewrite-and-rename update.
//!
//! A log is never edited in place. To change it, the new content is streamed
//! into a sibling copy file which is then renamed over the original:
//!
//! ```text
//!   messages ──read──► LogRewrite ──write──► copy_messages
//!                                               │
//!                      rename(copy_messages, messages)   ◄── commit point
//! ```
//!
//! The rename is the only moment the log changes. A crash before it leaves
//! the original intact and a stray copy file, which the next rewrite
//! truncates. A rewrite dropped without [`LogRewrite::commit`] deletes its
//! copy file.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use snafu::ResultExt;
use tracing::warn;

use crate::{Result, error::IoSnafu, record::Record};

/// Streams the non-empty lines of the log at `path`.
///
/// The iterator owns its file handle and path, so the caller may replace the
/// log while still reading the old one.
pub(crate) fn read_lines(path: &Path) -> Result<impl Iterator<Item = Result<String>> + use<>> {
    let file = File::open(path).context(IoSnafu { path })?;
    let path = path.to_path_buf();
    Ok(BufReader::new(file)
        .lines()
        .map(move |line| line.context(IoSnafu { path: &path }))
        .filter(|line| line.as_ref().map_or(true, |l| !l.is_empty())))
}

/// Streams and decodes every record of the log at `path`.
pub(crate) fn read_records(path: &Path) -> Result<impl Iterator<Item = Result<Record>> + use<>> {
    Ok(read_lines(path)?.map(|line| Record::decode(&line?)))
}

/// Counts the records in the log at `path`.
pub(crate) fn count_lines(path: &Path) -> Result<usize> {
    read_lines(path)?.try_fold(0, |count, line| line.map(|_| count + 1))
}

/// Creates an empty log at `path` unless one already exists.
pub(crate) fn touch(path: &Path) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(IoSnafu { path })?;
    Ok(())
}

/// Appends one record to the log at `path`.
pub(crate) fn append_record(path: &Path, record: &Record, sync: bool) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .context(IoSnafu { path })?;
    writeln!(file, "{}", record.encode()).context(IoSnafu { path })?;
    if sync {
        file.sync_data().context(IoSnafu { path })?;
    }
    Ok(())
}

/// An in-progress replacement of a log file.
pub(crate) struct LogRewrite {
    target:    PathBuf,
    copy:      PathBuf,
    writer:    Option<BufWriter<File>>,
    sync:      bool,
    committed: bool,
}

impl LogRewrite {
    /// Starts a rewrite of `target` through the (truncated) file `copy`.
    pub(crate) fn begin(target: PathBuf, copy: PathBuf, sync: bool) -> Result<Self> {
        let file = File::create(&copy).context(IoSnafu { path: &copy })?;
        Ok(Self {
            target,
            copy,
            writer: Some(BufWriter::new(file)),
            sync,
            committed: false,
        })
    }

    pub(crate) fn write_line(&mut self, line: &str) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{line}").context(IoSnafu { path: &self.copy })?;
        }
        Ok(())
    }

    pub(crate) fn write_record(&mut self, record: &Record) -> Result<()> {
        self.write_line(&record.encode())
    }

    /// Copies every remaining line of `lines` into the rewrite.
    pub(crate) fn write_all<I>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<String>>,
    {
        for line in lines {
            self.write_line(&line?)?;
        }
        Ok(())
    }

    /// Flushes the copy and renames it over the target.
    pub(crate) fn commit(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| e.into_error())
                .context(IoSnafu { path: &self.copy })?;
            if self.sync {
                file.sync_all().context(IoSnafu { path: &self.copy })?;
            }
        }
        fs::rename(&self.copy, &self.target).context(IoSnafu { path: &self.target })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for LogRewrite {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.writer.take();
        if let Err(e) = fs::remove_file(&self.copy)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = ?self.copy, error = %e, "Failed to remove abandoned copy file");
        }
    }
}
