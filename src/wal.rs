use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Frame overhead: u32 length prefix + u32 crc32 suffix.
const FRAME_OVERHEAD: u64 = 8;

/// Encode a single event as `[len][bincode][crc32]`. Returns the frame size.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large for WAL frame"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(FRAME_OVERHEAD + u64::from(len))
}

/// Outcome of reading a WAL file from the start.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
    /// True if bytes after `valid_len` were torn or corrupt.
    pub discarded_tail: bool,
}

/// Append-only write-ahead log holding every reservation and user event.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// A torn or corrupt tail (crash mid-write) is dropped on recovery.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by fsynced frames.
    durable_len: u64,
    /// Bytes and frames handed to `append_buffered` since the last sync.
    pending_len: u64,
    pending_appends: u64,
    appends_since_compact: u64,
    /// Set when a failed batch could not be rolled back. Appends are refused.
    failed: bool,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Wal {
    /// Open (or create) the WAL file at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = open_append(path)?;
        let durable_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len,
            pending_len: 0,
            pending_appends: 0,
            appends_since_compact: 0,
            failed: false,
        })
    }

    /// Replay the log, cut off any damaged tail so new frames land directly
    /// after the last good one, then open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        if replay.discarded_tail {
            warn!(
                path = %path.display(),
                valid_len = replay.valid_len,
                "discarding damaged WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self::open(path)?;
        Ok((wal, replay.events))
    }

    /// Append and fsync a single event. Production code goes through
    /// `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Call `flush_sync()` after the batch,
    /// or `rollback()` if anything in the batch failed.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.failed {
            return Err(io::Error::other("WAL is unusable after a failed rollback"));
        }
        let frame_len = encode_event(&mut self.writer, event)?;
        self.pending_len += frame_len;
        self.pending_appends += 1;
        Ok(())
    }

    /// Write out and fsync everything buffered. Only on success do the
    /// buffered frames count as durable.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.appends_since_compact += self.pending_appends;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Drop every frame since the last successful `flush_sync`: unwritten
    /// bytes are discarded and anything that reached the file is truncated
    /// away. If the file cannot be truncated the WAL refuses further appends.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.pending_len = 0;
        self.pending_appends = 0;
        let result = self.reset_to_durable();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn reset_to_durable(&mut self) -> io::Result<()> {
        let fresh = BufWriter::new(open_append(&self.path)?);
        // `into_parts` hands back the unwritten buffer instead of flushing it.
        let (_stale, _unwritten) = std::mem::replace(&mut self.writer, fresh).into_parts();
        let file = OpenOptions::new().write(true).open(&self.path)?;
        if file.metadata()?.len() != self.durable_len {
            file.set_len(self.durable_len)?;
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the compacted event set to `<path>.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the compacted file over the log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = open_append(&self.path)?;
        self.durable_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.failed = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read all intact frames. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u64::from(u32::from_le_bytes(len_buf));
            // A length running past EOF is a torn frame; don't allocate for it.
            if replay.valid_len + FRAME_OVERHEAD + len > file_len {
                break;
            }

            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload)?;
            let mut crc_buf = [0u8; 4];
            reader.read_exact(&mut crc_buf)?;

            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => break,
            }
            replay.valid_len += FRAME_OVERHEAD + len;
        }

        replay.discarded_tail = replay.valid_len < file_len;
        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reservation;
    use crate::time::{parse_date, parse_time};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(start: &str, end: &str) -> Event {
        Event::ReservationCreated(Reservation {
            id: Ulid::new(),
            user: "key M".into(),
            date: parse_date("2024-12-01").unwrap(),
            start_time: parse_time(start).unwrap(),
            end_time: parse_time(end).unwrap(),
        })
    }

    fn registered(name: &str) -> Event {
        Event::UserRegistered {
            id: Ulid::new(),
            username: name.into(),
            password_hash: "$argon2id$stub".into(),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![created("10:00", "11:00"), registered("alice"), Event::ReservationDeleted { id: Ulid::new() }];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert!(!replay.discarded_tail);
        assert_eq!(replay.valid_len, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let event = created("09:00", "10:00");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x40, 0, 0, 0, 1, 2]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event]);
        assert!(replay.discarded_tail);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt_crc.wal");
        let event = Event::ReservationDeleted { id: Ulid::new() };
        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert_eq!(replay.valid_len, 0);
        assert!(replay.discarded_tail);
    }

    #[test]
    fn recover_truncates_so_later_appends_survive() {
        let path = tmp_path("recover_truncate.wal");
        let first = created("08:00", "09:00");
        let second = created("09:00", "10:00");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xFF; 5]).unwrap();
        }

        {
            let (mut wal, events) = Wal::recover(&path).unwrap();
            assert_eq!(events, vec![first.clone()]);
            wal.append(&second).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![first, second]);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn compact_shrinks_log_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let keep = created("10:00", "11:00");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&keep).unwrap();
            for _ in 0..10 {
                let churn = created("12:00", "13:00");
                let Event::ReservationCreated(r) = &churn else { unreachable!() };
                let id = r.id;
                wal.append(&churn).unwrap();
                wal.append(&Event::ReservationDeleted { id }).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let later = registered("bob");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&keep)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&later).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap().events, vec![keep, later]);
    }

    #[test]
    fn buffered_appends_count_once_flushed() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|i| registered(&format!("user{i}"))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 0);
            wal.flush_sync().unwrap();
            assert_eq!(wal.appends_since_compact(), 5);
        }
        assert_eq!(Wal::replay(&path).unwrap().events, events);
    }

    #[test]
    fn rollback_discards_unflushed_frames() {
        let path = tmp_path("rollback_buffered.wal");
        let kept = registered("alice");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();

        wal.append_buffered(&registered("bob")).unwrap();
        assert!(!wal.writer.buffer().is_empty());
        wal.rollback().unwrap();
        assert!(wal.writer.buffer().is_empty());
        assert_eq!(wal.appends_since_compact(), 1);

        let later = registered("carol");
        wal.append(&later).unwrap();
        assert_eq!(Wal::replay(&path).unwrap().events, vec![kept, later]);
    }

    #[test]
    fn rollback_truncates_bytes_that_reached_the_file() {
        let path = tmp_path("rollback_partial.wal");
        let kept = created("10:00", "11:00");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();
        let durable = fs::metadata(&path).unwrap().len();

        // Half a frame hit the disk before the batch failed.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x40, 0, 0, 0, 9, 9, 9]).unwrap();
        }
        wal.rollback().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), durable);

        let later = created("11:00", "12:00");
        wal.append(&later).unwrap();
        let replay = Wal::replay(&path).unwrap();
        assert!(!replay.discarded_tail);
        assert_eq!(replay.events, vec![kept, later]);
    }

    #[test]
    fn failed_flush_leaves_nothing_queued() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let mut wal = Wal::open(full).unwrap();
        wal.append_buffered(&created("10:00", "11:00")).unwrap();
        assert!(wal.flush_sync().is_err());

        let _ = wal.rollback();
        assert!(wal.writer.buffer().is_empty());
        assert_eq!(wal.appends_since_compact(), 0);
    }
}
