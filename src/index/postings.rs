//! Read-side cursor over a term's postings list.
//!
//! To iterate over the postings, two iterations are needed: over the
//! list's blocks and over the postings within a block. The block iteration
//! is folded into [`PostingIterator`], so clients only deal with a flat
//! posting cursor. Each iterator owns a scratch buffer holding the decoded
//! integers of the most recently fetched block.

use crate::index::codec::{decoded_size_estimate, BlockEncoder};
use crate::store::DataStore;
use crate::{Error, Result};

/// A decoded posting: one matched recording with the occurrences of the
/// term inside it. The slices all have `tf` elements and borrow the
/// iterator's scratch buffer.
#[derive(Debug, Clone, Copy)]
pub struct Posting<'a> {
    /// Fingerprint (recording) identifier.
    pub fid: u32,
    /// LF identifiers of the occurrences, strictly increasing.
    pub lid: &'a [u32],
    /// Time values of the occurrences (frames), non-decreasing.
    pub t: &'a [u32],
    /// Quantization errors of the occurrences.
    pub e: &'a [u32],
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    fid: u32,
    tf: usize,
    off: usize,
}

/// Cursor-style traversal over the postings of one term.
///
/// The iterator does not hold the store; the store is passed to each
/// advancing call, which keeps one store shareable across the many
/// iterators of a matching step.
pub struct PostingIterator {
    term: u32,
    next_block: u32,
    decoder: BlockEncoder,
    decoded: Vec<u32>,
    pos: usize,
    cursor: Option<Cursor>,
    /// Last FID decoded from the current block; the FID delta base for the
    /// next block.
    last_fid: u32,
    eol: bool,
    primed: bool,
}

impl PostingIterator {
    /// Create an iterator over the postings list of `term`.
    pub fn new(term: u32) -> Self {
        Self {
            term,
            next_block: 1,
            decoder: BlockEncoder::new(),
            decoded: Vec::with_capacity(decoded_size_estimate(
                crate::store::POSTINGS_BLOCK_THRESHOLD,
            )),
            pos: 0,
            cursor: None,
            last_fid: 0,
            eol: false,
            primed: false,
        }
    }

    pub fn term(&self) -> u32 {
        self.term
    }

    /// Whether the iterator has consumed the whole list.
    pub fn at_eol(&self) -> bool {
        self.eol
    }

    /// The posting at the current cursor position, `None` at end of list.
    /// The first call fetches the first block.
    pub fn get(&mut self, store: &mut dyn DataStore) -> Result<Option<Posting<'_>>> {
        if !self.primed {
            self.primed = true;
            self.next(store)?;
        }
        Ok(self.cursor.map(move |c| Posting {
            fid: c.fid,
            lid: &self.decoded[c.off..c.off + c.tf],
            t: &self.decoded[c.off + c.tf..c.off + 2 * c.tf],
            e: &self.decoded[c.off + 2 * c.tf..c.off + 3 * c.tf],
        }))
    }

    /// Advance the cursor to the next posting, fetching the next block
    /// when the current one is exhausted. At end of list the cursor
    /// becomes empty and stays empty.
    pub fn next(&mut self, store: &mut dyn DataStore) -> Result<()> {
        if self.eol {
            return Ok(());
        }
        self.primed = true;
        if !self.next_posting() && self.fetch_block(store)? {
            self.next_posting();
        }
        Ok(())
    }

    /// Decode the next posting of the scratch buffer into the cursor.
    fn next_posting(&mut self) -> bool {
        if self.pos >= self.decoded.len() {
            self.cursor = None;
            return false;
        }
        // the decoder validated the structure, so the bounds hold
        let fid = self.decoded[self.pos];
        let tf = self.decoded[self.pos + 1] as usize;
        self.cursor = Some(Cursor {
            fid,
            tf,
            off: self.pos + 2,
        });
        self.last_fid = fid;
        self.pos += 2 + 3 * tf;
        true
    }

    /// Fetch and decode the next block. Returns false at end of list.
    fn fetch_block(&mut self, store: &mut dyn DataStore) -> Result<bool> {
        let block = store.get_plist_block(self.term, self.next_block)?;
        match block {
            Some(body) if !body.is_empty() => {
                self.decoder
                    .decode(&body, self.last_fid, &mut self.decoded)?;
                if self.decoded.is_empty() {
                    return Err(Error::InvalidIndexData(format!(
                        "zero-size decode of a non-empty block (term {}, block {})",
                        self.term, self.next_block
                    )));
                }
                self.pos = 0;
                self.next_block += 1;
                Ok(true)
            }
            _ => {
                self.cursor = None;
                self.eol = true;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BlockHeader, ListHeader, MemoryStore};

    /// Store a chunk of postings as one block of the given term.
    fn put_block(store: &mut MemoryStore, term: u32, id: u32, postings: &[&[u32]], base: u32) {
        let mut enc = BlockEncoder::new();
        let mut body = Vec::new();
        enc.encode(postings, base, &mut body).unwrap();
        let last_fid = postings.last().unwrap()[0];
        store
            .on_indexer_new_block(
                term,
                ListHeader { block_count: id },
                BlockHeader {
                    id,
                    body_size: body.len() as u32,
                    fid_max: last_fid,
                },
                &body,
            )
            .unwrap();
    }

    #[test]
    fn iterates_across_blocks() {
        let mut store = MemoryStore::new();
        let p1: Vec<u32> = vec![1, 1, 4, 9, 2];
        let p2: Vec<u32> = vec![5, 2, 0, 3, 1, 8, 3, 0];
        let p3: Vec<u32> = vec![9, 1, 7, 7, 7];
        put_block(&mut store, 77, 1, &[&p1, &p2], 0);
        put_block(&mut store, 77, 2, &[&p3], 5);

        let mut it = PostingIterator::new(77);

        let p = it.get(&mut store).unwrap().unwrap();
        assert_eq!(p.fid, 1);
        assert_eq!(p.lid, &[4]);
        it.next(&mut store).unwrap();

        let p = it.get(&mut store).unwrap().unwrap();
        assert_eq!(p.fid, 5);
        assert_eq!(p.lid, &[0, 8]);
        assert_eq!(p.t, &[3, 3]);
        assert_eq!(p.e, &[1, 0]);
        it.next(&mut store).unwrap();

        // second block decodes against the first block's max FID
        let p = it.get(&mut store).unwrap().unwrap();
        assert_eq!(p.fid, 9);
        it.next(&mut store).unwrap();

        assert!(it.get(&mut store).unwrap().is_none());
        assert!(it.at_eol());
        // next() past EOL stays at EOL
        it.next(&mut store).unwrap();
        assert!(it.get(&mut store).unwrap().is_none());
    }

    #[test]
    fn missing_list_is_eol() {
        let mut store = MemoryStore::new();
        let mut it = PostingIterator::new(123);
        assert!(it.get(&mut store).unwrap().is_none());
        assert!(it.at_eol());
    }

    #[test]
    fn corrupt_block_is_fatal() {
        let mut store = MemoryStore::new();
        store
            .on_indexer_new_block(
                9,
                ListHeader { block_count: 1 },
                BlockHeader {
                    id: 1,
                    body_size: 2,
                    fid_max: 1,
                },
                &[0x01, 0x02], // truncated vbyte stream
            )
            .unwrap();
        let mut it = PostingIterator::new(9);
        assert!(matches!(
            it.get(&mut store),
            Err(Error::InvalidIndexData(_))
        ));
    }
}
