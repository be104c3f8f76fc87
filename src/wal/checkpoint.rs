use byteorder::{ByteOrder, LittleEndian};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Persists the applied watermark as a single u32 little-endian word. Saves
/// go through a temp file plus atomic rename, so a crash mid-write never
/// clobbers the previous checkpoint.
pub(crate) struct CheckpointFile {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl CheckpointFile {
    pub(crate) fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");

        CheckpointFile {
            path,
            tmp_path: PathBuf::from(tmp),
        }
    }

    /// An absent or short checkpoint reads as 0: replay starts from the log
    /// head.
    pub(crate) fn load(&self) -> io::Result<u64> {
        let buf = match fs::read(&self.path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        if buf.len() < 4 {
            return Ok(0);
        }

        Ok(u64::from(LittleEndian::read_u32(&buf)))
    }

    pub(crate) fn save(&self, applied_offset: u64) -> io::Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, applied_offset as u32);
        fs::write(&self.tmp_path, &buf)?;
        fs::rename(&self.tmp_path, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_checkpoint_loads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("applied.log"));
        assert_eq!(0, checkpoint.load().unwrap());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("applied.log"));

        checkpoint.save(16).unwrap();
        assert_eq!(16, checkpoint.load().unwrap());

        checkpoint.save(25).unwrap();
        assert_eq!(25, checkpoint.load().unwrap());
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("applied.log"));

        checkpoint.save(9).unwrap();
        assert!(!dir.path().join("applied.log.tmp").exists());
    }

    #[test]
    fn short_checkpoint_loads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("applied.log");
        fs::write(&path, &[7u8, 0]).unwrap();

        let checkpoint = CheckpointFile::new(&path);
        assert_eq!(0, checkpoint.load().unwrap());
    }
}
