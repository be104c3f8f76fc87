use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use bytes::Bytes;
use std::io::{self, ErrorKind, Read, Write};

/// Every record is its payload plus a u32 little-endian length prefix.
pub(crate) const RECORD_HEADER_LEN: u64 = 4;

/// On-disk size of a record holding `payload`.
pub(crate) fn record_len(payload: &[u8]) -> u64 {
    RECORD_HEADER_LEN + payload.len() as u64
}

/// Outcome of reading one record from the log.
#[derive(Debug, PartialEq)]
pub(crate) enum RecordRead {
    Record(Bytes),
    /// Clean end: no bytes past the previous record.
    EndOfLog,
    /// A length prefix is present but the record is cut short (partial write
    /// at crash). Nothing at or past this point is readable.
    ShortRecord,
}

pub(crate) fn write_record<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<u64> {
    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_all(payload)?;
    Ok(record_len(payload))
}

pub(crate) fn read_record<R: Read>(reader: &mut R) -> io::Result<RecordRead> {
    let mut header = [0u8; RECORD_HEADER_LEN as usize];
    let header_read = read_fully(reader, &mut header)?;
    if header_read == 0 {
        return Ok(RecordRead::EndOfLog);
    }
    if header_read < header.len() {
        return Ok(RecordRead::ShortRecord);
    }

    let payload_len = LittleEndian::read_u32(&header) as usize;
    let mut payload = vec![0u8; payload_len];
    let payload_read = read_fully(reader, &mut payload)?;
    if payload_read < payload_len {
        return Ok(RecordRead::ShortRecord);
    }

    Ok(RecordRead::Record(Bytes::from(payload)))
}

fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_two_records() {
        let mut buf = Vec::new();
        assert_eq!(9, write_record(&mut buf, b"hello").unwrap());
        assert_eq!(7, write_record(&mut buf, b"you").unwrap());

        let mut reader = Cursor::new(buf);
        assert_eq!(
            RecordRead::Record(Bytes::from_static(b"hello")),
            read_record(&mut reader).unwrap()
        );
        assert_eq!(
            RecordRead::Record(Bytes::from_static(b"you")),
            read_record(&mut reader).unwrap()
        );
        assert_eq!(RecordRead::EndOfLog, read_record(&mut reader).unwrap());
    }

    #[test]
    fn short_payload_is_short_record() {
        let mut buf = Vec::new();
        write_record(&mut buf, b"hello").unwrap();
        buf.truncate(7); // cut 2 payload bytes

        let mut reader = Cursor::new(buf);
        assert_eq!(RecordRead::ShortRecord, read_record(&mut reader).unwrap());
    }

    #[test]
    fn short_header_is_short_record() {
        let buf = vec![5u8, 0]; // 2 of 4 header bytes
        let mut reader = Cursor::new(buf);
        assert_eq!(RecordRead::ShortRecord, read_record(&mut reader).unwrap());
    }

    #[test]
    fn empty_payload_is_a_valid_record() {
        let mut buf = Vec::new();
        assert_eq!(4, write_record(&mut buf, b"").unwrap());

        let mut reader = Cursor::new(buf);
        assert_eq!(
            RecordRead::Record(Bytes::new()),
            read_record(&mut reader).unwrap()
        );
    }
}
