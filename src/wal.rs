use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on a single encoded event. A larger length prefix can only
/// come from a corrupt file.
const MAX_ENTRY_LEN: usize = 1024 * 1024;

fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_ENTRY_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "event exceeds WAL entry limit"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Outcome of reading one entry during replay.
enum Entry {
    /// An intact event and the number of bytes it occupied.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Partial, oversized or checksum-failing entry. Replay stops here.
    Damaged(&'static str),
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn decode_entry(reader: &mut impl Read) -> io::Result<Entry> {
    let mut len_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut len_buf)? {
        return Ok(Entry::End);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(Entry::Damaged("length prefix out of range"));
    }

    let mut payload = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut payload)? {
        return Ok(Entry::Damaged("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(Entry::Damaged("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Entry::Damaged("checksum mismatch"));
    }

    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Entry::Event(event, len as u64 + 8)),
        Err(_) => Ok(Entry::Damaged("undecodable payload")),
    }
}

/// Result of scanning a log file.
struct Scan {
    events: Vec<Event>,
    /// Byte length of the intact prefix.
    intact_len: u64,
    damaged: bool,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let mut scan = Scan { events: Vec::new(), intact_len: 0, damaged: false };
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(scan),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);

    loop {
        match decode_entry(&mut reader)? {
            Entry::Event(event, size) => {
                scan.events.push(event);
                scan.intact_len += size;
            }
            Entry::End => break,
            Entry::Damaged(reason) => {
                tracing::warn!(
                    "WAL {}: damaged entry after {} events at byte {} ({reason})",
                    path.display(),
                    scan.events.len(),
                    scan.intact_len
                );
                scan.damaged = true;
                break;
            }
        }
    }
    Ok(scan)
}

/// Append-only event log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// `len` covers the payload only. A damaged tail left by a crash is cut off
/// by `recover` before the log is reopened for appends.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length after the last successful `flush_sync`.
    committed_len: u64,
    appends_since_compact: u64,
    committed_appends: u64,
    /// Set when a failed batch could not be rolled back. No further appends
    /// are accepted.
    poisoned: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed_len,
            appends_since_compact: 0,
            committed_appends: 0,
            poisoned: false,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL is poisoned by an earlier failed rollback"));
        }
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL is poisoned by an earlier failed rollback"));
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.committed_appends = self.appends_since_compact;
        Ok(())
    }

    /// Throw away everything written since the last successful `flush_sync`,
    /// buffered or already on disk. If that fails the log refuses further
    /// appends.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.appends_since_compact = self.committed_appends;
        let result = self.truncate_to_committed();
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn truncate_to_committed(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        // Dropping a BufWriter flushes it; take the buffer out unwritten.
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let _ = stale.into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot to `<path>.wal.tmp` and fsync it. The live log is untouched.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.committed_appends = 0;
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

    /// Every intact event in the log, oldest first. A missing file replays as
    /// empty. The file is not modified.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.events)
    }

    /// Replay, then cut a damaged tail off the file so that later appends
    /// follow the last intact entry.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let scan = scan(path)?;
        if scan.damaged {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scan.intact_len)?;
            file.sync_all()?;
            tracing::warn!("WAL {}: truncated to {} bytes", path.display(), scan.intact_len);
        }
        Ok(scan.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tabula_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn table_event(number: &str) -> Event {
        Event::TableCreated {
            table: Table {
                id: Ulid::new(),
                table_number: number.into(),
                capacity: 4,
                area: TableArea::Terrace,
                features: TableFeatures { window_seat: true, ..Default::default() },
                status: TableStatus::Available,
            },
        }
    }

    fn reservation_event(table_id: Ulid) -> Event {
        Event::ReservationCreated {
            reservation: Reservation {
                id: Ulid::new(),
                user_id: Ulid::new(),
                table_id: Some(table_id),
                date: parse_date("2025-06-01").unwrap(),
                start: parse_time("19:00").unwrap(),
                end: None,
                party_size: 3,
                status: ReservationStatus::Confirmed,
                confirmation_code: "RES-ABCDEFGH".into(),
                special_request: Some("high chair".into()),
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let first = table_event("T1");
        let Event::TableCreated { table } = &first else { unreachable!() };
        let events = vec![first.clone(), reservation_event(table.id), Event::TableDeleted { id: table.id }];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_truncated_tail() {
        let path = tmp_path("truncation.wal");
        let event = table_event("T1");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("corrupt_crc.wal");
        let good = table_event("T1");
        let bad = Event::TableDeleted { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_rejects_absurd_length_prefix() {
        let path = tmp_path("huge_len.wal");
        fs::write(&path, u32::MAX.to_le_bytes()).unwrap();
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let created = table_event("T1");
        let Event::TableCreated { table } = &created else { unreachable!() };

        let mut churn = vec![created.clone()];
        for _ in 0..10 {
            let r = reservation_event(table.id);
            let Event::ReservationCreated { reservation } = &r else { unreachable!() };
            let id = reservation.id;
            churn.push(r);
            churn.push(Event::ReservationDeleted { id });
        }
        let later = reservation_event(table.id);

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &churn {
                wal.append(e).unwrap();
            }
            let before = fs::metadata(&path).unwrap().len();
            assert_eq!(wal.appends_since_compact(), churn.len() as u64);

            wal.compact(std::slice::from_ref(&created)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(fs::metadata(&path).unwrap().len() < before);

            wal.append(&later).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![created, later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_are_durable_after_flush() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|i| table_event(&format!("T{i}"))).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_cuts_damaged_tail_before_new_appends() {
        let path = tmp_path("recover.wal");
        let first = table_event("T1");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40u8, 0, 0, 0, 7, 7, 7]).unwrap();
        }

        assert_eq!(Wal::recover(&path).unwrap(), vec![first.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);

        let second = table_event("T2");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_leaves_intact_log_alone() {
        let path = tmp_path("recover_intact.wal");
        let event = table_event("T1");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(Wal::recover(&path).unwrap(), vec![event]);
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rollback_discards_unflushed_and_flushed_but_uncommitted_bytes() {
        let path = tmp_path("rollback.wal");
        let kept = table_event("T1");
        let dropped = table_event("T2");
        let later = table_event("T3");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();

            wal.append_buffered(&dropped).unwrap();
            wal.rollback().unwrap();
            assert_eq!(wal.appends_since_compact(), 1);

            // Bytes that reached the file without a completed sync are cut too.
            wal.append_buffered(&dropped).unwrap();
            wal.writer.flush().unwrap();
            wal.rollback().unwrap();

            wal.append(&later).unwrap();
            assert_eq!(wal.appends_since_compact(), 2);
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, later]);
        let _ = fs::remove_file(&path);
    }
}
