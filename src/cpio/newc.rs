//! The newc ("070701") cpio wire format.
//!
//! Reader and writer for the SVR4 cpio variant the Linux kernel consumes
//! as an initramfs. Headers are 110 bytes of ASCII hex fields; names and
//! data are padded to four-byte boundaries; the stream ends with a
//! `TRAILER!!!` record.

use std::io::{self, Read, Write};

use super::{Record, RecordData, RecordKind, RecordReader, RecordWriter, TRAILER};

const MAGIC: &[u8; 6] = b"070701";
const HEADER_LEN: usize = 110;

fn pad4(n: u64) -> u64 {
    (4 - n % 4) % 4
}

/// Writes records in newc format. Inode numbers are assigned
/// sequentially in write order, so a sorted record stream yields a
/// byte-identical archive for identical inputs.
pub struct Writer<W: Write> {
    w: W,
    next_ino: u64,
}

impl<W: Write> Writer<W> {
    pub fn new(w: W) -> Writer<W> {
        Writer { w, next_ino: 0 }
    }

    fn write_header(
        &mut self,
        ino: u64,
        r: &Record,
        nlink: u32,
        filesize: u64,
    ) -> io::Result<()> {
        if filesize > u64::from(u32::MAX) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{}: too large for newc format", r.name),
            ));
        }
        let mut hdr = Vec::with_capacity(HEADER_LEN + r.name.len() + 4);
        hdr.extend_from_slice(MAGIC);
        for field in [
            ino,
            u64::from(r.mode),
            u64::from(r.uid),
            u64::from(r.gid),
            u64::from(nlink),
            r.mtime,
            filesize,
            0, // dev major
            0, // dev minor
            u64::from(r.rmajor),
            u64::from(r.rminor),
            r.name.len() as u64 + 1,
            0, // checksum (unused in newc)
        ] {
            hdr.extend_from_slice(format!("{:08x}", field as u32).as_bytes());
        }
        hdr.extend_from_slice(r.name.as_bytes());
        hdr.push(0);
        let pad = pad4((HEADER_LEN + r.name.len() + 1) as u64);
        hdr.extend(std::iter::repeat(0u8).take(pad as usize));
        self.w.write_all(&hdr)
    }

    /// Write the trailer record and flush. Must be called exactly once,
    /// after the last record.
    pub fn write_trailer(&mut self) -> io::Result<()> {
        let trailer = Record {
            name: TRAILER.to_string(),
            mode: 0,
            uid: 0,
            gid: 0,
            mtime: 0,
            rmajor: 0,
            rminor: 0,
            data: RecordData::Empty,
        };
        self.write_header(0, &trailer, 1, 0)?;
        self.w.flush()
    }
}

impl<W: Write> RecordWriter for Writer<W> {
    fn write_record(&mut self, r: Record) -> io::Result<()> {
        let ino = self.next_ino;
        self.next_ino += 1;

        let nlink = if r.kind() == RecordKind::Directory { 2 } else { 1 };
        let filesize = r.data.len()?;
        self.write_header(ino, &r, nlink, filesize)?;

        let written = match &r.data {
            RecordData::Empty => 0,
            RecordData::Bytes(b) => {
                self.w.write_all(b)?;
                b.len() as u64
            }
            RecordData::File(p) => {
                let mut f = std::fs::File::open(p)?;
                io::copy(&mut f, &mut self.w)?
            }
        };
        if written != filesize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: changed size while archiving", r.name),
            ));
        }
        for _ in 0..pad4(filesize) {
            self.w.write_all(&[0])?;
        }
        Ok(())
    }
}

/// Reads records from a newc stream until the trailer.
pub struct Reader<R: Read> {
    r: R,
}

impl<R: Read> Reader<R> {
    pub fn new(r: R) -> Reader<R> {
        Reader { r }
    }

    fn skip(&mut self, n: u64) -> io::Result<()> {
        io::copy(&mut (&mut self.r).take(n), &mut io::sink())?;
        Ok(())
    }
}

fn hex_field(buf: &[u8], i: usize) -> io::Result<u64> {
    let s = std::str::from_utf8(&buf[6 + i * 8..6 + (i + 1) * 8])
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-ASCII cpio header field"))?;
    u64::from_str_radix(s, 16)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad hex in cpio header"))
}

impl<R: Read> RecordReader for Reader<R> {
    fn read_record(&mut self) -> io::Result<Option<Record>> {
        let mut hdr = [0u8; HEADER_LEN];
        self.r.read_exact(&mut hdr)?;
        if &hdr[..6] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad cpio magic: not a newc archive",
            ));
        }

        let mode = hex_field(&hdr, 1)? as u32;
        let uid = hex_field(&hdr, 2)? as u32;
        let gid = hex_field(&hdr, 3)? as u32;
        let mtime = hex_field(&hdr, 5)?;
        let filesize = hex_field(&hdr, 6)?;
        let rmajor = hex_field(&hdr, 9)? as u32;
        let rminor = hex_field(&hdr, 10)? as u32;
        let namesize = hex_field(&hdr, 11)?;

        if namesize == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "cpio record with empty name",
            ));
        }
        let mut name_buf = vec![0u8; namesize as usize];
        self.r.read_exact(&mut name_buf)?;
        name_buf.pop(); // trailing NUL
        let name = String::from_utf8(name_buf)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 record name"))?;
        self.skip(pad4(HEADER_LEN as u64 + namesize))?;

        if name == TRAILER {
            return Ok(None);
        }

        let mut data = vec![0u8; filesize as usize];
        self.r.read_exact(&mut data)?;
        self.skip(pad4(filesize))?;

        Ok(Some(Record {
            name,
            mode,
            uid,
            gid,
            mtime,
            rmajor,
            rminor,
            data: if data.is_empty() {
                RecordData::Empty
            } else {
                RecordData::Bytes(data)
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpio::make_reproducible;

    fn write_all(records: Vec<Record>) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf);
        for r in records {
            w.write_record(r).unwrap();
        }
        w.write_trailer().unwrap();
        buf
    }

    fn read_all(buf: &[u8]) -> Vec<Record> {
        let mut rd = Reader::new(buf);
        let mut out = Vec::new();
        while let Some(r) = rd.read_record().unwrap() {
            out.push(r);
        }
        out
    }

    #[test]
    fn records_survive_odd_name_lengths() {
        // Name lengths chosen to hit all four padding phases.
        let records = vec![
            Record::directory("a", 0o755),
            Record::directory("ab", 0o755),
            Record::static_file("abc", "xyzzy", 0o644),
            Record::symlink("abcd", "a"),
        ];
        let got = read_all(&write_all(records.clone()));
        assert_eq!(got.len(), 4);
        for (want, got) in records.iter().zip(&got) {
            assert_eq!(want.name, got.name);
            assert_eq!(want.mode, got.mode);
            assert_eq!(want.data.read().unwrap(), got.data.read().unwrap());
        }
    }

    #[test]
    fn device_numbers_round_trip() {
        let got = read_all(&write_all(vec![Record::char_device("dev/null", 0o666, 1, 3)]));
        assert_eq!(got[0].rmajor, 1);
        assert_eq!(got[0].rminor, 3);
    }

    #[test]
    fn identical_input_is_byte_identical() {
        let records = vec![
            Record::directory("bin", 0o755),
            make_reproducible(Record::static_file("bin/ls", "binary", 0o755)),
        ];
        assert_eq!(write_all(records.clone()), write_all(records));
    }

    #[test]
    fn bad_magic_is_invalid_data() {
        let not_newc = vec![b'0'; HEADER_LEN];
        let err = Reader::new(&not_newc[..]).read_record().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
