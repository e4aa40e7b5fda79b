use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode one record as `[len][bincode][crc32]`.
fn encode_record<E: Serialize>(writer: &mut impl Write, record: &E) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the log ended (cleanly
/// or mid-record).
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of serde records.
///
/// Format per entry: `[u32: len][bincode: E][u32: crc32]`, little endian.
/// A torn or corrupt tail (crash mid-append) ends replay at the last good
/// record.
pub struct Wal<E> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// Records buffered since open; never reset.
    appends_total: u64,
    _record: PhantomData<fn(E)>,
}

impl<E: Serialize + DeserializeOwned> Wal<E> {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            appends_total: 0,
            _record: PhantomData,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &E) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record without syncing; `flush_sync` commits the batch.
    pub fn append_buffered(&mut self, record: &E) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        self.appends_total += 1;
        Ok(())
    }

    /// Flush the buffer and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a compacted log next to `path` and fsync it. Slow; the caller
    /// swaps it in with `swap_compact_file`.
    pub fn write_compact_file(path: &Path, records: &[E]) -> io::Result<()> {
        let file = File::create(Self::tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        for record in records {
            encode_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the live log and reopen for append.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[E]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    pub fn appends_total(&self) -> u64 {
        self.appends_total
    }

    /// Replay every intact record. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<E>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_full(&mut reader, &mut len_buf)? {
                break;
            }
            let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
            if !read_full(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            match bincode::deserialize::<E>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, TimeRange, WindowState};
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotd_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn declared(provider_id: Ulid, hour: u32) -> Event {
        Event::WindowDeclared {
            id: Ulid::new(),
            provider_id,
            date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            range: TimeRange::new(
                NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
            ),
            state: WindowState::Available,
            note: None,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let provider = Ulid::new();
        let events = vec![
            declared(provider, 9),
            Event::BookingTimedOut { id: Ulid::new(), provider_id: provider },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_is_discarded() {
        let path = tmp_path("torn_tail.wal");
        let event = declared(Ulid::new(), 9);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn missing_file_replays_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::<Event>::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = declared(Ulid::new(), 9);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&declared(Ulid::new(), 10)).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compaction_replaces_history_and_accepts_new_appends() {
        let path = tmp_path("compact.wal");
        let provider = Ulid::new();
        let kept = declared(provider, 9);
        let mut wal = Wal::open(&path).unwrap();
        for hour in 10..20 {
            let churn = declared(provider, hour);
            let Event::WindowDeclared { id, .. } = churn else { unreachable!() };
            wal.append(&churn).unwrap();
            wal.append(&Event::WindowRemoved { id, provider_id: provider }).unwrap();
        }
        wal.append(&kept).unwrap();
        assert_eq!(wal.appends_since_compact(), 21);
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(std::slice::from_ref(&kept)).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let later = declared(provider, 20);
        wal.append(&later).unwrap();
        assert_eq!(Wal::<Event>::replay(&path).unwrap(), vec![kept, later]);
    }
}
