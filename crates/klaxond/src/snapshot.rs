// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot framing shared by the silence store and the notification log.
//!
//! A snapshot is a flat file of `<4-byte little-endian length><payload>`
//! frames.  There is no checksum; integrity comes from writing to a temp
//! file and renaming it into place on close.  A truncated tail stops the
//! read; payloads that fail to decode are the caller's to skip and count.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Upper bound on a single frame, to keep a corrupt length prefix from
/// allocating unbounded memory.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Write `payloads` as a framed snapshot at `path` via temp-file rename.
pub fn write_snapshot<I>(path: &Path, payloads: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("snapshot path {} has no parent", path.display()))?;
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        for payload in payloads {
            let len = u32::try_from(payload.len())
                .map_err(|_| anyhow::anyhow!("snapshot record too large"))?;
            w.write_all(&len.to_le_bytes())?;
            w.write_all(&payload)?;
        }
        w.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Iterator over the framed payloads of a snapshot file.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    /// Set once a truncated or oversized frame is hit; reading stops.
    corrupt: bool,
}

impl FrameReader<File> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read> FrameReader<R> {
    pub fn new(r: R) -> Self {
        Self { inner: BufReader::new(r), corrupt: false }
    }

    /// True when reading stopped on a malformed frame rather than clean EOF.
    pub fn hit_corrupt_tail(&self) -> bool {
        self.corrupt
    }

    fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            self.corrupt = true;
            return Ok(None);
        }
        let mut payload = vec![0u8; len as usize];
        match self.inner.read_exact(&mut payload) {
            Ok(()) => Ok(Some(payload)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.corrupt = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.corrupt {
            return None;
        }
        self.read_frame().transpose()
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
