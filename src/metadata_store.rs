//! Line-oriented, length-prefixed record log persisting the RenameStore,
//! tombstones, and copy-up markers to a file in the writable top source
//! (§4.6, §6). Length-prefixing (rather than a separator character) is the
//! same defensive idiom the teacher's `parser`/`serializer` modules use for
//! wire framing, repurposed here with `byteorder` for on-disk records
//! instead of RPC messages.
//!
//! Writes always rewrite the whole file to a temporary path and rename it
//! into place, giving atomicity without requiring `SourceMount` to expose
//! a generic rename primitive (it deliberately doesn't, per §4.2 — real
//! rename-for-atomicity is source 0's own filesystem operation, not a
//! namespace-spanning union operation).

use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tokio::fs;

use crate::error::{map_io_error, CompositeError, Result};
use crate::path::VirtualPath;

/// One persisted record (§6 MetadataStore file format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Rename { virtual_path: VirtualPath, real_path: VirtualPath },
    Tombstone { virtual_path: VirtualPath },
    CopyUpMarker { virtual_path: VirtualPath },
}

pub struct MetadataStore {
    root: PathBuf,
    filename: String,
}

impl MetadataStore {
    pub fn new(root: PathBuf, filename: String) -> Self {
        Self { root, filename }
    }

    fn file_path(&self) -> PathBuf {
        self.root.join(&self.filename)
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(format!("{}.tmp", self.filename))
    }

    /// Replays the file, reconstructing the record list. An absent file
    /// (first mount) is treated as an empty log, not an error.
    pub async fn load(&self) -> Result<Vec<Record>> {
        let bytes = match fs::read(self.file_path()).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io_error(e)),
        };
        decode_records(&bytes)
    }

    /// Rewrites the file from the given full record set and atomically
    /// swaps it into place.
    pub async fn flush(&self, records: &[Record]) -> Result<()> {
        let mut buf = Vec::new();
        for record in records {
            encode_record(&mut buf, record);
        }
        let temp = self.temp_path();
        fs::write(&temp, &buf).await.map_err(map_io_error)?;
        fs::rename(&temp, self.file_path()).await.map_err(map_io_error)?;
        Ok(())
    }
}

fn write_field(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.write_u32::<LittleEndian>(bytes.len() as u32).expect("writing to a Vec never fails");
    buf.extend_from_slice(bytes);
}

fn encode_record(buf: &mut Vec<u8>, record: &Record) {
    match record {
        Record::Rename { virtual_path, real_path } => {
            buf.push(b'R');
            buf.push(b' ');
            write_field(buf, &virtual_path.to_string());
            write_field(buf, &real_path.to_string());
        }
        Record::Tombstone { virtual_path } => {
            buf.push(b'T');
            buf.push(b' ');
            write_field(buf, &virtual_path.to_string());
        }
        Record::CopyUpMarker { virtual_path } => {
            buf.push(b'C');
            buf.push(b' ');
            write_field(buf, &virtual_path.to_string());
        }
    }
    buf.push(b'\n');
}

fn read_field(cursor: &mut &[u8]) -> Result<String> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| CompositeError::MetadataCorrupt("truncated field length".into()))? as usize;
    if cursor.len() < len {
        return Err(CompositeError::MetadataCorrupt("truncated field body".into()));
    }
    let (field, rest) = cursor.split_at(len);
    *cursor = rest;
    String::from_utf8(field.to_vec()).map_err(|_| CompositeError::MetadataCorrupt("field is not utf-8".into()))
}

fn expect_byte(cursor: &mut &[u8], expected: u8) -> Result<()> {
    match cursor.first() {
        Some(&b) if b == expected => {
            *cursor = &cursor[1..];
            Ok(())
        }
        _ => Err(CompositeError::MetadataCorrupt("malformed record separator".into())),
    }
}

fn decode_records(bytes: &[u8]) -> Result<Vec<Record>> {
    let mut cursor: &[u8] = bytes;
    let mut records = Vec::new();
    while !cursor.is_empty() {
        let tag = cursor[0];
        cursor = &cursor[1..];
        expect_byte(&mut cursor, b' ')?;
        let record = match tag {
            b'R' => {
                let virtual_path = VirtualPath::parse(&read_field(&mut cursor)?);
                let real_path = VirtualPath::parse(&read_field(&mut cursor)?);
                Record::Rename { virtual_path, real_path }
            }
            b'T' => Record::Tombstone { virtual_path: VirtualPath::parse(&read_field(&mut cursor)?) },
            b'C' => Record::CopyUpMarker { virtual_path: VirtualPath::parse(&read_field(&mut cursor)?) },
            other => {
                return Err(CompositeError::MetadataCorrupt(format!("unknown record tag {other:#x}")))
            }
        };
        expect_byte(&mut cursor, b'\n')?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().to_path_buf(), ".mergefs.meta".to_owned());
        let records = vec![
            Record::Rename {
                virtual_path: VirtualPath::parse(r"\sub\b.txt"),
                real_path: VirtualPath::parse(r"\a.txt"),
            },
            Record::Tombstone { virtual_path: VirtualPath::parse(r"\deleted.txt") },
            Record::CopyUpMarker { virtual_path: VirtualPath::parse(r"\copied.txt") },
        ];
        store.flush(&records).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().to_path_buf(), ".mergefs.meta".to_owned());
        assert_eq!(store.load().await.unwrap(), Vec::new());
    }

    #[test]
    fn corrupt_tag_is_reported() {
        let mut buf = Vec::new();
        buf.push(b'Z');
        buf.push(b' ');
        assert!(decode_records(&buf).is_err());
    }
}
