use crate::wal::codec::{self, RecordRead};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::Path;

/// Append handle for the sync log. The write position is always the end of
/// the file; replication and replay read through an independent `WalCursor`
/// so the two never contend.
pub(crate) struct WalWriter {
    file: File,
    end_offset: u64,
}

impl WalWriter {
    pub(crate) fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let end_offset = file.metadata()?.len();

        Ok(WalWriter { file, end_offset })
    }

    /// Appends one length-prefixed record and returns its full on-disk size
    /// (4 + payload length).
    pub(crate) fn append(&mut self, payload: &[u8]) -> io::Result<u64> {
        let record_len = codec::write_record(&mut self.file, payload)?;
        self.end_offset += record_len;

        Ok(record_len)
    }

    pub(crate) fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Drops a torn tail found during crash recovery. The log is never
    /// rewritten in place otherwise.
    pub(crate) fn truncate(&mut self, offset: u64) -> io::Result<()> {
        self.file.set_len(offset)?;
        self.end_offset = offset;

        Ok(())
    }
}

/// Sequential read cursor over the sync log, independent of the writer.
pub(crate) struct WalCursor {
    file: File,
    position: u64,
}

impl WalCursor {
    pub(crate) fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;

        Ok(WalCursor { file, position: 0 })
    }

    pub(crate) fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.position = offset;

        Ok(())
    }

    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    /// Reads the record starting at the current position. On `EndOfLog` and
    /// `ShortRecord` the position is restored to the record start so a later
    /// pass re-reads from the same spot.
    pub(crate) fn read_entry(&mut self) -> io::Result<RecordRead> {
        let record_start = self.position;
        let outcome = codec::read_record(&mut self.file)?;
        match &outcome {
            RecordRead::Record(payload) => {
                self.position = record_start + codec::record_len(payload);
            }
            RecordRead::EndOfLog | RecordRead::ShortRecord => {
                self.file.seek(SeekFrom::Start(record_start))?;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::fs;

    #[test]
    fn append_then_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");

        let mut writer = WalWriter::open(&path).unwrap();
        assert_eq!(0, writer.end_offset());
        assert_eq!(9, writer.append(b"mkdir").unwrap());
        assert_eq!(7, writer.append(b"rmr").unwrap());
        assert_eq!(16, writer.end_offset());

        let mut cursor = WalCursor::open(&path).unwrap();
        assert_eq!(
            RecordRead::Record(Bytes::from_static(b"mkdir")),
            cursor.read_entry().unwrap()
        );
        assert_eq!(9, cursor.position());
        assert_eq!(
            RecordRead::Record(Bytes::from_static(b"rmr")),
            cursor.read_entry().unwrap()
        );
        assert_eq!(16, cursor.position());
        assert_eq!(RecordRead::EndOfLog, cursor.read_entry().unwrap());
        assert_eq!(16, cursor.position());
    }

    #[test]
    fn reopen_resumes_at_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");

        let mut writer = WalWriter::open(&path).unwrap();
        writer.append(b"mkdir").unwrap();
        drop(writer);

        let writer = WalWriter::open(&path).unwrap();
        assert_eq!(9, writer.end_offset());
    }

    #[test]
    fn seek_restarts_reads_mid_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");

        let mut writer = WalWriter::open(&path).unwrap();
        writer.append(b"mkdir").unwrap();
        writer.append(b"rmr").unwrap();

        let mut cursor = WalCursor::open(&path).unwrap();
        cursor.seek(9).unwrap();
        assert_eq!(
            RecordRead::Record(Bytes::from_static(b"rmr")),
            cursor.read_entry().unwrap()
        );
    }

    #[test]
    fn torn_tail_reads_short_and_restores_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");

        let mut writer = WalWriter::open(&path).unwrap();
        writer.append(b"mkdir").unwrap();
        writer.append(b"rmr").unwrap();
        // Chop 2 bytes off the last record, as a crash mid-append would.
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(14).unwrap();

        let mut cursor = WalCursor::open(&path).unwrap();
        cursor.seek(9).unwrap();
        assert_eq!(RecordRead::ShortRecord, cursor.read_entry().unwrap());
        // Position restored: a repaired log re-reads from the same spot.
        assert_eq!(9, cursor.position());
        assert_eq!(RecordRead::ShortRecord, cursor.read_entry().unwrap());
    }

    #[test]
    fn truncate_drops_the_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.log");

        let mut writer = WalWriter::open(&path).unwrap();
        writer.append(b"mkdir").unwrap();
        writer.append(b"rmr").unwrap();
        writer.truncate(9).unwrap();
        assert_eq!(9, writer.end_offset());

        // Appends continue cleanly after the truncation point.
        writer.append(b"link").unwrap();
        let mut cursor = WalCursor::open(&path).unwrap();
        cursor.seek(9).unwrap();
        assert_eq!(
            RecordRead::Record(Bytes::from_static(b"link")),
            cursor.read_entry().unwrap()
        );
    }
}
