// ============================================================
// Record Files
// ============================================================
// A record file is a flat sequence of
//
//   [ payload length: u64 little-endian ][ payload bytes ]
//
// Readers stop cleanly at EOF on a record boundary; EOF anywhere
// else is a truncated record.

use std::{
    fs::File,
    io::{BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use crate::error::DataError;

const HEADER_LEN: usize = 8;

pub struct RecordWriter {
    out:     BufWriter<File>,
    written: usize,
}

impl RecordWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let file = File::create(path.as_ref())?;
        Ok(Self { out: BufWriter::new(file), written: 0 })
    }

    pub fn write(&mut self, payload: &[u8]) -> Result<(), DataError> {
        self.out.write_all(&(payload.len() as u64).to_le_bytes())?;
        self.out.write_all(payload)?;
        self.written += 1;
        Ok(())
    }

    /// Flush and return the number of records written.
    pub fn finish(mut self) -> Result<usize, DataError> {
        self.out.flush()?;
        Ok(self.written)
    }
}

pub struct RecordReader {
    input: BufReader<File>,
    path:  PathBuf,
    done:  bool,
}

impl RecordReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { input: BufReader::new(file), path, done: false })
    }

    fn read_record(&mut self) -> Result<Option<Vec<u8>>, DataError> {
        let mut header = [0u8; HEADER_LEN];
        let got = read_full(&mut self.input, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(self.truncated(HEADER_LEN, got));
        }

        let len = u64::from_le_bytes(header) as usize;
        let mut payload = vec![0u8; len];
        let got = read_full(&mut self.input, &mut payload)?;
        if got < len {
            return Err(self.truncated(len, got));
        }
        Ok(Some(payload))
    }

    fn truncated(&self, wanted: usize, got: usize) -> DataError {
        DataError::TruncatedRecord { path: self.path.clone(), wanted, got }
    }
}

impl Iterator for RecordReader {
    type Item = Result<Vec<u8>, DataError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read until `buf` is full or EOF; returns the bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_read_back_in_order() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.records");

        let mut writer = RecordWriter::create(&path).unwrap();
        writer.write(b"first").unwrap();
        writer.write(b"").unwrap();
        writer.write(&[7u8; 300]).unwrap();
        assert_eq!(writer.finish().unwrap(), 3);

        let records: Vec<Vec<u8>> = RecordReader::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records, vec![b"first".to_vec(), Vec::new(), vec![7u8; 300]]);
    }

    #[test]
    fn truncated_payload_is_reported() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.records");
        let mut bytes = 10u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        std::fs::write(&path, bytes).unwrap();

        let mut reader = RecordReader::open(&path).unwrap();
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(err, DataError::TruncatedRecord { wanted: 10, got: 3, .. }));
        assert!(reader.next().is_none());
    }
}
