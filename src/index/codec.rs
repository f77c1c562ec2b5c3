//! Postings block codec.
//!
//! Postings list chunks are serialized from the cache layout into an
//! integer array with a run-homogeneous layout, delta-encoded and
//! compressed into a byte stream with variable-byte coding. Reads apply
//! the exact inverses.
//!
//! Cache layout (per posting):  `FID, tf, (LID,T,E) x tf` interleaved.
//! Wire layout (per posting):   `dFID, tf, dLID[tf], dT[tf], E[tf]` with
//! each run of like-typed integers contiguous, which keeps the deltas
//! small and the byte stream predictable.

use crate::{Error, Result};

/// Variable-byte codec for u32 arrays. Each value is emitted as 7-bit
/// groups, least significant first; the high bit marks the last byte of a
/// value.
#[derive(Debug, Default)]
pub struct VByteCodec;

impl VByteCodec {
    /// Append the vbyte encoding of `values` to `out`. Returns the number
    /// of bytes written.
    pub fn encode(&self, values: &[u32], out: &mut Vec<u8>) -> usize {
        let start = out.len();
        for &val in values {
            if val < 1 << 7 {
                out.push((val as u8) | 0x80);
            } else if val < 1 << 14 {
                out.push((val & 0x7f) as u8);
                out.push(((val >> 7) as u8) | 0x80);
            } else if val < 1 << 21 {
                out.push((val & 0x7f) as u8);
                out.push(((val >> 7) & 0x7f) as u8);
                out.push(((val >> 14) as u8) | 0x80);
            } else if val < 1 << 28 {
                out.push((val & 0x7f) as u8);
                out.push(((val >> 7) & 0x7f) as u8);
                out.push(((val >> 14) & 0x7f) as u8);
                out.push(((val >> 21) as u8) | 0x80);
            } else {
                out.push((val & 0x7f) as u8);
                out.push(((val >> 7) & 0x7f) as u8);
                out.push(((val >> 14) & 0x7f) as u8);
                out.push(((val >> 21) & 0x7f) as u8);
                out.push(((val >> 28) as u8) | 0x80);
            }
        }
        out.len() - start
    }

    /// Decode a vbyte stream into `out`. A truncated trailing value is an
    /// error.
    pub fn decode(&self, bytes: &[u8], out: &mut Vec<u32>) -> Result<()> {
        let mut value = 0u32;
        let mut shift = 0u32;
        for &b in bytes {
            value += u32::from(b & 0x7f) << shift;
            if b & 0x80 != 0 {
                out.push(value);
                value = 0;
                shift = 0;
            } else {
                shift += 7;
            }
        }
        if shift != 0 {
            return Err(Error::InvalidIndexData(
                "truncated vbyte stream".to_string(),
            ));
        }
        Ok(())
    }
}

/// Worst-case decoded element count for an encoded stream (one byte per
/// value).
pub fn decoded_size_estimate(enc_size: usize) -> usize {
    enc_size
}

/// Worst-case encoded size for an integer array.
pub fn encoded_size_estimate(nvalues: usize) -> usize {
    nvalues * 5
}

/// Encoder for postings list chunks.
#[derive(Debug, Default)]
pub struct BlockEncoder {
    codec: VByteCodec,
    ser_chunk: Vec<u32>,
}

impl BlockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a postings chunk (a sequence of cache-layout posting slices)
    /// into a byte stream. `base_fid` is the FID the first posting's delta
    /// is computed against (the append block's current max FID).
    pub fn encode(&mut self, postings: &[&[u32]], base_fid: u32, out: &mut Vec<u8>) -> Result<usize> {
        self.serialize(postings, base_fid)?;
        Ok(self.codec.encode(&self.ser_chunk, out))
    }

    /// Decode a block body back into the flat integer layout. `base_fid`
    /// is the max FID of the previous block (0 for the first).
    pub fn decode(&mut self, body: &[u8], base_fid: u32, out: &mut Vec<u32>) -> Result<()> {
        out.clear();
        self.codec.decode(body, out)?;
        delta_decode(out, base_fid)
    }

    /// Convert cache-layout postings into the delta-encoded wire layout.
    fn serialize(&mut self, postings: &[&[u32]], base_fid: u32) -> Result<()> {
        self.ser_chunk.clear();
        let mut prev_fid = base_fid;

        for p in postings {
            if p.len() < 5 || (p.len() - 2) % 3 != 0 {
                return Err(Error::InvalidIndexData(
                    "malformed cache posting".to_string(),
                ));
            }
            let fid = p[0];
            let tf = p[1] as usize;
            debug_assert!(fid > prev_fid, "FIDs must be strict increasing");
            debug_assert_eq!(2 + tf * 3, p.len());

            self.ser_chunk.push(fid - prev_fid);
            self.ser_chunk.push(tf as u32);

            let base = self.ser_chunk.len();
            self.ser_chunk.resize(base + tf * 3, 0);
            for i in 0..tf {
                let lid = p[2 + i * 3];
                let t = p[3 + i * 3];
                let e = p[4 + i * 3];
                if i == 0 {
                    self.ser_chunk[base + i] = lid;
                    self.ser_chunk[base + tf + i] = t;
                } else {
                    let lid0 = p[2 + (i - 1) * 3];
                    let t0 = p[3 + (i - 1) * 3];
                    debug_assert!(lid > lid0, "LIDs must be strict increasing");
                    debug_assert!(t >= t0, "T must be non-decreasing");
                    self.ser_chunk[base + i] = lid - lid0;
                    self.ser_chunk[base + tf + i] = t - t0;
                }
                // quantization errors are small already and not
                // delta-encoded
                self.ser_chunk[base + 2 * tf + i] = e;
            }

            prev_fid = fid;
        }
        Ok(())
    }
}

/// In-place inverse delta coding of a decoded block: FIDs accumulate from
/// `base_fid` across postings, LIDs and Ts prefix-sum within each posting,
/// E values are stored raw.
pub fn delta_decode(chunk: &mut [u32], base_fid: u32) -> Result<()> {
    let mut pos = 0usize;
    let mut fid = base_fid;
    while pos < chunk.len() {
        if pos + 2 > chunk.len() {
            return Err(Error::InvalidIndexData("truncated posting header".to_string()));
        }
        fid = fid.wrapping_add(chunk[pos]);
        chunk[pos] = fid;
        let tf = chunk[pos + 1] as usize;
        if tf == 0 {
            return Err(Error::InvalidIndexData("posting with zero tf".to_string()));
        }
        pos += 2;
        if pos + tf * 3 > chunk.len() {
            return Err(Error::InvalidIndexData("truncated posting body".to_string()));
        }
        for run in 0..2 {
            let start = pos + run * tf;
            for i in 1..tf {
                chunk[start + i] = chunk[start + i].wrapping_add(chunk[start + i - 1]);
            }
        }
        pos += tf * 3;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vbyte_round_trip() {
        let codec = VByteCodec;
        let values = vec![
            0,
            1,
            127,
            128,
            16383,
            16384,
            2097151,
            2097152,
            268435455,
            268435456,
            u32::MAX,
        ];
        let mut enc = Vec::new();
        let n = codec.encode(&values, &mut enc);
        assert_eq!(n, enc.len());
        let mut dec = Vec::new();
        codec.decode(&enc, &mut dec).unwrap();
        assert_eq!(values, dec);
    }

    #[test]
    fn vbyte_rejects_truncation() {
        let codec = VByteCodec;
        let mut enc = Vec::new();
        codec.encode(&[300], &mut enc);
        let mut dec = Vec::new();
        assert!(codec.decode(&enc[..1], &mut dec).is_err());
    }

    #[test]
    fn block_round_trip() {
        // two postings in cache layout: FID, tf, (LID,T,E)*
        let p1: Vec<u32> = vec![3, 2, 10, 100, 7, 15, 100, 9];
        let p2: Vec<u32> = vec![9, 3, 1, 50, 0, 4, 55, 255, 9, 55, 30];
        let postings: Vec<&[u32]> = vec![&p1, &p2];

        let mut enc = BlockEncoder::new();
        let mut body = Vec::new();
        enc.encode(&postings, 0, &mut body).unwrap();

        let mut dec = Vec::new();
        enc.decode(&body, 0, &mut dec).unwrap();

        let expected: Vec<u32> = vec![
            3, 2, 10, 15, 100, 100, 7, 9, // posting 1: runs of LID, T, E
            9, 3, 1, 4, 9, 50, 55, 55, 0, 255, 30, // posting 2
        ];
        assert_eq!(dec, expected);
    }

    #[test]
    fn block_round_trip_with_base_fid() {
        let p: Vec<u32> = vec![42, 1, 5, 9, 3];
        let postings: Vec<&[u32]> = vec![&p];

        let mut enc = BlockEncoder::new();
        let mut body = Vec::new();
        enc.encode(&postings, 40, &mut body).unwrap();

        let mut dec = Vec::new();
        enc.decode(&body, 40, &mut dec).unwrap();
        assert_eq!(dec, vec![42, 1, 5, 9, 3]);

        // decoding with the wrong base shifts the FID
        enc.decode(&body, 0, &mut dec).unwrap();
        assert_eq!(dec[0], 2);
    }

    #[test]
    fn delta_decode_rejects_garbage() {
        // tf of zero
        assert!(delta_decode(&mut [1, 0], 0).is_err());
        // truncated body: claims tf=5 but has one occurrence
        assert!(delta_decode(&mut [1, 5, 1, 1, 1], 0).is_err());
        // truncated header
        assert!(delta_decode(&mut [1], 0).is_err());
    }

    #[test]
    fn delta_monotonic_sequences_are_inverses() {
        // strictly increasing FIDs across postings, LIDs within
        let mut postings = Vec::new();
        for fid in 1..40u32 {
            let mut p = vec![fid, 3];
            for i in 0..3u32 {
                p.push(i * 2 + 1); // LID
                p.push(i * 7); // T
                p.push(i); // E
            }
            postings.push(p);
        }
        let slices: Vec<&[u32]> = postings.iter().map(|p| p.as_slice()).collect();

        let mut enc = BlockEncoder::new();
        let mut body = Vec::new();
        enc.encode(&slices, 0, &mut body).unwrap();
        let mut dec = Vec::new();
        enc.decode(&body, 0, &mut dec).unwrap();

        let mut pos = 0;
        for fid in 1..40u32 {
            assert_eq!(dec[pos], fid);
            assert_eq!(dec[pos + 1], 3);
            assert_eq!(&dec[pos + 2..pos + 5], &[1, 3, 5]); // LIDs
            assert_eq!(&dec[pos + 5..pos + 8], &[0, 7, 14]); // Ts
            assert_eq!(&dec[pos + 8..pos + 11], &[0, 1, 2]); // Es
            pos += 11;
        }
        assert_eq!(pos, dec.len());
    }
}
