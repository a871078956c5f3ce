//! Append-only booking journal.
//!
//! The file starts with an 8-byte header (`DSKB`, little-endian format version,
//! two reserved bytes) followed by frames of `[u32 len][bincode Event][u32 crc32]`.
//! Every frame carries a full booking snapshot, so replay only needs the last
//! frame per booking id.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

const MAGIC: [u8; 4] = *b"DSKB";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 8;

/// Largest encoded snapshot the journal accepts.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

fn header() -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[..4].copy_from_slice(&MAGIC);
    h[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    h
}

#[derive(Debug)]
pub enum FrameError {
    Encode(bincode::Error),
    TooLarge(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Encode(e) => write!(f, "cannot encode snapshot: {e}"),
            FrameError::TooLarge(n) => write!(f, "snapshot of {n} bytes exceeds {MAX_FRAME_BYTES}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// One booking snapshot, framed and checksummed, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn encode(event: &Event) -> Result<Self, FrameError> {
        let payload = bincode::serialize(event).map_err(FrameError::Encode)?;
        if payload.len() > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge(payload.len()));
        }
        let mut bytes = Vec::with_capacity(payload.len() + 8);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        Ok(Self(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decode the frame starting at `pos`. `None` marks the end of the intact prefix.
fn decode_at(bytes: &[u8], pos: usize) -> Option<(Event, usize)> {
    let payload_start = pos.checked_add(4)?;
    let len = u32::from_le_bytes(bytes.get(pos..payload_start)?.try_into().ok()?) as usize;
    if len > MAX_FRAME_BYTES {
        return None;
    }
    let payload_end = payload_start + len;
    let payload = bytes.get(payload_start..payload_end)?;
    let crc = u32::from_le_bytes(bytes.get(payload_end..payload_end + 4)?.try_into().ok()?);
    if crc != crc32fast::hash(payload) {
        return None;
    }
    let event = bincode::deserialize(payload).ok()?;
    Some((event, payload_end + 4))
}

/// What a journal file holds.
#[derive(Debug, Default, PartialEq)]
pub struct Recovered {
    /// Intact snapshots in file order.
    pub events: Vec<Event>,
    /// Byte length of the header plus every intact frame.
    pub intact_len: u64,
    /// Bytes after the intact prefix: a torn or corrupt tail.
    pub discarded_bytes: u64,
}

pub struct Journal {
    file: File,
    path: PathBuf,
    /// Frames accepted by `stage` and not yet written.
    pending: Vec<u8>,
    pending_frames: u64,
    durable_len: u64,
    appends_since_compact: u64,
}

impl Journal {
    /// Read every intact snapshot without touching the file. A missing file
    /// is an empty journal; a file with a foreign header is an error.
    pub fn read(path: &Path) -> io::Result<Recovered> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Recovered::default()),
            Err(e) => return Err(e),
        };
        if bytes.len() < HEADER_LEN {
            // Crashed while writing the header of a fresh journal.
            return Ok(Recovered {
                discarded_bytes: bytes.len() as u64,
                ..Recovered::default()
            });
        }
        if bytes[..4] != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a deskbook journal"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported journal format {version}"),
            ));
        }

        let mut events = Vec::new();
        let mut pos = HEADER_LEN;
        while let Some((event, next)) = decode_at(&bytes, pos) {
            events.push(event);
            pos = next;
        }
        Ok(Recovered {
            events,
            intact_len: pos as u64,
            discarded_bytes: (bytes.len() - pos) as u64,
        })
    }

    /// Recover `path`, cut off any torn tail so new frames follow intact ones,
    /// and position for appends. A new file gets a header.
    pub fn open(path: &Path) -> io::Result<(Self, Recovered)> {
        let recovered = Self::read(path)?;
        let mut file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;

        let durable_len = if recovered.intact_len == 0 {
            file.set_len(0)?;
            file.write_all(&header())?;
            file.sync_all()?;
            HEADER_LEN as u64
        } else {
            if recovered.discarded_bytes > 0 {
                tracing::warn!(bytes = recovered.discarded_bytes, "discarding torn journal tail");
                file.set_len(recovered.intact_len)?;
                file.sync_all()?;
            }
            recovered.intact_len
        };
        file.seek(SeekFrom::Start(durable_len))?;

        let journal = Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_frames: 0,
            durable_len,
            appends_since_compact: 0,
        };
        Ok((journal, recovered))
    }

    /// Queue a frame for the next `commit`.
    pub fn stage(&mut self, frame: &Frame) {
        self.pending.extend_from_slice(&frame.0);
        self.pending_frames += 1;
    }

    /// Write and fsync every staged frame. On failure the file is cut back to
    /// its last durable length and the staged frames are dropped.
    pub fn commit(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let staged = std::mem::take(&mut self.pending);
        let frames = std::mem::take(&mut self.pending_frames);

        match self.file.write_all(&staged).and_then(|()| self.file.sync_data()) {
            Ok(()) => {
                self.durable_len += staged.len() as u64;
                self.appends_since_compact += frames;
                Ok(())
            }
            Err(e) => {
                let restored = self
                    .file
                    .set_len(self.durable_len)
                    .and_then(|()| self.file.seek(SeekFrom::Start(self.durable_len)));
                if let Err(undo) = restored {
                    tracing::error!("cannot roll back journal to {} bytes: {undo}", self.durable_len);
                }
                Err(e)
            }
        }
    }

    /// Encode, stage and commit one snapshot.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        let frame = Frame::encode(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.stage(&frame);
        self.commit()
    }

    /// Replace the journal with `frames`: write a sibling temp file, fsync,
    /// then rename it into place.
    pub fn rewrite(&mut self, frames: &[Frame]) -> io::Result<()> {
        self.commit()?;
        let tmp_path = self.path.with_extension("journal.tmp");
        let mut tmp = File::create(&tmp_path)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + frames.iter().map(Frame::len).sum::<usize>());
        bytes.extend_from_slice(&header());
        for frame in frames {
            bytes.extend_from_slice(&frame.0);
        }
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        self.file = file;
        self.durable_len = bytes.len() as u64;
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}
