//! Binary spike payloads.
//!
//! Layout: `MAGIC`, `VERSION` (u32), then tagged chunks until `END\0`:
//! - `HEAD`: label, population size (u32), event count (u64), uncompressed
//! - `SNDR`: sender neuron index per event (u32 LE), LZ4
//! - `TIME`: event time in ms (f32 LE), LZ4
//!
//! Unknown chunks are skipped so the format can grow.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const MAGIC: &[u8; 8] = b"CLSPK001";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

const TAG_HEAD: [u8; 4] = *b"HEAD";
const TAG_SENDERS: [u8; 4] = *b"SNDR";
const TAG_TIMES: [u8; 4] = *b"TIME";
const TAG_END: [u8; 4] = *b"END\0";

/// Spike events of one population, in emission order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpikeTrain {
    pub label: String,
    pub population_size: u32,
    pub senders: Vec<u32>,
    pub times_ms: Vec<f32>,
}

impl SpikeTrain {
    pub fn new(label: impl Into<String>, population_size: u32) -> Self {
        Self {
            label: label.into(),
            population_size,
            ..Self::default()
        }
    }

    pub fn push(&mut self, sender: u32, time_ms: f32) {
        self.senders.push(sender);
        self.times_ms.push(time_ms);
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_u32_le(w, bytes.len() as u32)?;
    w.write_all(bytes)
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_exact::<8, _>(r)?))
}

pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let n = read_u32_le(r)? as usize;
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8 string"))
}

pub fn write_chunk<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    w.write_all(&tag)?;
    write_u32_le(w, payload.len() as u32)?;
    w.write_all(payload)
}

/// Compressed chunk: payload is LZ4-compressed and preceded by the
/// uncompressed length (u32).
///
/// Layout:
/// - tag: [u8;4]
/// - len: u32 (bytes following, including the 4-byte uncompressed length)
/// - uncompressed_len: u32
/// - compressed payload bytes
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?;
    let total_len = 4u32.saturating_add(
        u32::try_from(compressed.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    );

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, uncompressed_len)?;
    w.write_all(&compressed)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}

fn read_chunk_lz4(body: &[u8]) -> io::Result<Vec<u8>> {
    if body.len() < 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated lz4 chunk"));
    }
    let (len, compressed) = body.split_at(4);
    let expected = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
    decompress_lz4(compressed, expected)
}

pub fn write_spike_train<W: Write>(w: &mut W, train: &SpikeTrain) -> io::Result<()> {
    if train.senders.len() != train.times_ms.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "senders and times differ in length",
        ));
    }
    w.write_all(MAGIC)?;
    write_u32_le(w, VERSION_CURRENT)?;

    let mut head = Vec::new();
    write_string(&mut head, &train.label)?;
    write_u32_le(&mut head, train.population_size)?;
    write_u64_le(&mut head, train.len() as u64)?;
    write_chunk(w, TAG_HEAD, &head)?;

    let senders: Vec<u8> = train.senders.iter().flat_map(|s| s.to_le_bytes()).collect();
    write_chunk_lz4(w, TAG_SENDERS, &senders)?;
    let times: Vec<u8> = train.times_ms.iter().flat_map(|t| t.to_le_bytes()).collect();
    write_chunk_lz4(w, TAG_TIMES, &times)?;

    write_chunk(w, TAG_END, &[])
}

pub fn read_spike_train<R: Read>(r: &mut R) -> io::Result<SpikeTrain> {
    let magic = read_exact::<8, _>(r)?;
    if &magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad spike file magic"));
    }
    let version = read_u32_le(r)?;
    if version != VERSION_V1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported spike file version {version}"),
        ));
    }

    let mut train = SpikeTrain::default();
    let mut count = None;
    loop {
        let (tag, len) = read_chunk_header(r)?;
        if tag == TAG_END {
            break;
        }
        let mut body = vec![0u8; len as usize];
        r.read_exact(&mut body)?;
        match tag {
            TAG_HEAD => {
                let mut cur = body.as_slice();
                train.label = read_string(&mut cur)?;
                train.population_size = read_u32_le(&mut cur)?;
                count = Some(read_u64_le(&mut cur)? as usize);
            }
            TAG_SENDERS => {
                train.senders = read_chunk_lz4(&body)?
                    .chunks_exact(4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
            }
            TAG_TIMES => {
                train.times_ms = read_chunk_lz4(&body)?
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
            }
            _ => {}
        }
    }

    let count = count.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing HEAD chunk"))?;
    if train.senders.len() != count || train.times_ms.len() != count {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "event count does not match payload",
        ));
    }
    Ok(train)
}

pub fn save_spike_train(path: &Path, train: &SpikeTrain) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    write_spike_train(&mut w, train)?;
    w.flush()
}

pub fn load_spike_train(path: &Path) -> io::Result<SpikeTrain> {
    let mut r = BufReader::new(File::open(path)?);
    read_spike_train(&mut r)
}
