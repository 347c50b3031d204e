//! Restartable IVF container reader, for the `.ivf` VP8-passthrough source
//! files mentioned in §6 External Interfaces. IVF frames are already
//! complete VP8 payloads — no further parsing is needed before handing
//! them to the RTP sample track.

use crate::source::{FrameSource, IvfFrame, ReadError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;

pub struct IvfReader {
    path: PathBuf,
    buf: Vec<u8>,
    pos: usize,
}

impl IvfReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReadError> {
        let path = path.as_ref().to_path_buf();
        let buf = read_all(&path)?;
        if buf.len() < FILE_HEADER_LEN || &buf[0..4] != b"DKIF" {
            return Err(ReadError::Malformed("missing DKIF signature".into()));
        }
        Ok(Self {
            path,
            buf,
            pos: FILE_HEADER_LEN,
        })
    }
}

fn read_all(path: &Path) -> Result<Vec<u8>, ReadError> {
    let mut f = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

impl FrameSource for IvfReader {
    type Frame = IvfFrame;

    fn next_frame(&mut self) -> Result<IvfFrame, ReadError> {
        if self.pos >= self.buf.len() {
            return Err(ReadError::Eof);
        }
        if self.pos + FRAME_HEADER_LEN > self.buf.len() {
            return Err(ReadError::ShortRead {
                needed: FRAME_HEADER_LEN,
            });
        }
        let header = &self.buf[self.pos..self.pos + FRAME_HEADER_LEN];
        let size = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let timestamp = u64::from_le_bytes(header[4..12].try_into().unwrap());

        let frame_start = self.pos + FRAME_HEADER_LEN;
        if frame_start + size > self.buf.len() {
            return Err(ReadError::ShortRead { needed: size });
        }
        let bytes = self.buf[frame_start..frame_start + size].to_vec();
        self.pos = frame_start + size;

        Ok(IvfFrame { bytes, timestamp })
    }

    fn restart(&mut self) -> Result<(), ReadError> {
        self.buf = read_all(&self.path)?;
        self.pos = FILE_HEADER_LEN;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File as StdFile;
    use std::io::Write;

    fn ivf_file(frames: &[(u64, &[u8])]) -> Vec<u8> {
        let mut f = vec![0u8; FILE_HEADER_LEN];
        f[0..4].copy_from_slice(b"DKIF");
        for (ts, payload) in frames {
            f.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            f.extend_from_slice(&ts.to_le_bytes());
            f.extend_from_slice(payload);
        }
        f
    }

    fn write_temp(bytes: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "streambench-ivf-test-{:?}",
            std::thread::current().id()
        ));
        let mut f = StdFile::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn reads_frames_with_timestamps() {
        let data = ivf_file(&[(0, b"abc"), (1, b"defg")]);
        let path = write_temp(&data);
        let mut reader = IvfReader::open(&path).unwrap();

        let f1 = reader.next_frame().unwrap();
        assert_eq!(f1.timestamp, 0);
        assert_eq!(f1.bytes, b"abc");

        let f2 = reader.next_frame().unwrap();
        assert_eq!(f2.timestamp, 1);

        assert!(matches!(reader.next_frame(), Err(ReadError::Eof)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_missing_signature() {
        let data = vec![0u8; FILE_HEADER_LEN];
        let path = write_temp(&data);
        assert!(matches!(
            IvfReader::open(&path),
            Err(ReadError::Malformed(_))
        ));
        let _ = std::fs::remove_file(&path);
    }
}
