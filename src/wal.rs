use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format. Returns the frame size.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(8 + u64::from(len))
}

/// Events recovered from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// A truncated or corrupt tail was dropped.
    pub discarded_tail: bool,
}

/// Append-only reservation journal.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// A torn write at the end of the file is detected by the length prefix or
/// the CRC and dropped on replay; everything before it is kept.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length as of the last successful sync.
    durable_len: u64,
    /// Bytes handed to the writer since then.
    pending_len: u64,
    appends_since_compact: u64,
    durable_appends: u64,
}

impl Journal {
    /// Open (or create) the journal file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len,
            pending_len: 0,
            appends_since_compact: 0,
            durable_appends: 0,
        })
    }

    /// Append and fsync one event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event; durable only after [`flush_sync`](Self::flush_sync).
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.pending_len += encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.pending_len = 0;
        self.durable_appends = self.appends_since_compact;
        Ok(())
    }

    /// Discard everything written since the last successful sync: buffered
    /// bytes are dropped and bytes that reached the file are truncated away.
    pub fn roll_back(&mut self) -> io::Result<()> {
        let fresh = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(fresh));
        // into_parts hands back the unflushed buffer instead of writing it.
        let (_, _unwritten) = stale.into_parts();
        self.pending_len = 0;
        self.appends_since_compact = self.durable_appends;

        let file = self.writer.get_ref();
        file.set_len(self.durable_len)?;
        file.sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the journal with `events`: write a temp file, fsync, rename over.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let durable_len;
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            let mut written = 0;
            for event in events {
                written += encode_event(&mut writer, event)?;
            }
            durable_len = written;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.durable_len = durable_len;
        self.pending_len = 0;
        self.appends_since_compact = 0;
        self.durable_appends = 0;
        Ok(())
    }

    /// Read every intact event. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            match read_frame_part(&mut reader, &mut len_buf) {
                Ok(Frame::Complete) => {}
                Ok(Frame::CleanEnd) => break,
                Ok(Frame::Torn) => {
                    replay.discarded_tail = true;
                    break;
                }
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            let body = read_frame_part(&mut reader, &mut payload)
                .and_then(|f| match f {
                    Frame::Complete => read_frame_part(&mut reader, &mut crc_buf),
                    other => Ok(other),
                })?;
            if !matches!(body, Frame::Complete) {
                replay.discarded_tail = true;
                break;
            }

            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                replay.discarded_tail = true;
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => {
                    replay.discarded_tail = true;
                    break;
                }
            }
        }

        Ok(replay)
    }
}

enum Frame {
    Complete,
    CleanEnd,
    Torn,
}

/// Fill `buf` completely, distinguishing a clean end of file from a torn frame.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Frame> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(Frame::CleanEnd),
            Ok(0) => return Ok(Frame::Torn),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Frame::Complete)
}
