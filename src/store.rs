//! Data-layer access interfaces.
//!
//! The engine reads and writes two kinds of data: raw fingerprints and the
//! inverted index built over them. [`DataStore`] abstracts both behind a
//! capability set implemented by the host; how the data is physically
//! organized is irrelevant to the engine as long as blocks and headers come
//! back exactly as they were emitted. [`AudioProvider`] is the pull
//! interface the indexer uses to obtain the audio of a recording.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Cursor;
use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::Result;

/// Fuzzy block size limiter. Postings list blocks growing beyond this limit
/// are terminated (not truncated) and new chunks go into a new block, so
/// blocks end up with similar sizes.
pub const POSTINGS_BLOCK_THRESHOLD: usize = 32768;

/// Header of a term's postings list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    /// Number of blocks in the list
    pub block_count: u32,
}

/// Header of one block in a postings list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// The block's identifier (1-based, sequential)
    pub id: u32,
    /// Size of the block's body in bytes
    pub body_size: u32,
    /// Max FID value in the block
    pub fid_max: u32,
}

impl ListHeader {
    /// Serialized size in bytes.
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.block_count.to_le_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut rd = Cursor::new(bytes);
        Some(ListHeader {
            block_count: rd.read_u32::<LittleEndian>().ok()?,
        })
    }
}

impl BlockHeader {
    /// Serialized size in bytes.
    pub const SIZE: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut wr = Cursor::new(&mut out[..]);
        wr.write_u32::<LittleEndian>(self.id).unwrap();
        wr.write_u32::<LittleEndian>(self.body_size).unwrap();
        wr.write_u32::<LittleEndian>(self.fid_max).unwrap();
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut rd = Cursor::new(bytes);
        Some(BlockHeader {
            id: rd.read_u32::<LittleEndian>().ok()?,
            body_size: rd.read_u32::<LittleEndian>().ok()?,
            fid_max: rd.read_u32::<LittleEndian>().ok()?,
        })
    }
}

/// Storage interface consumed by the engine and implemented by the host.
///
/// The read path (`get_*`) serves identifications; the `on_indexer_*`
/// callbacks are events emitted during an indexing session. Every method
/// may block on I/O; the engine never retries.
pub trait DataStore {
    /// Return the body of the given block of a term's postings list, or
    /// `None` if the list has no such block (EOL included).
    fn get_plist_block(&mut self, term: u32, block_id: u32) -> Result<Option<Vec<u8>>>;

    /// Return the size in bytes of a stored fingerprint, 0 if absent.
    fn get_fingerprint_size(&mut self, fid: u32) -> Result<usize>;

    /// Return `nbytes` of fingerprint data starting at `byte_offset`, or
    /// the whole remainder when `nbytes` is 0. Short reads are an error on
    /// the engine side, so implementations should return exactly what was
    /// asked or fail.
    fn get_fingerprint(&mut self, fid: u32, nbytes: usize, byte_offset: usize)
        -> Result<Vec<u8>>;

    /// Indexing session started.
    fn on_indexer_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Indexing session finished.
    fn on_indexer_end(&mut self) -> Result<()> {
        Ok(())
    }

    /// The indexer cache is about to be processed and emitted.
    fn on_indexer_flush_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// The indexer cache has been completely emitted.
    fn on_indexer_flush_end(&mut self) -> Result<()> {
        Ok(())
    }

    /// Return the header of a term's list, `None` if the list does not
    /// exist yet.
    fn on_indexer_list_header(&mut self, term: u32) -> Result<Option<ListHeader>>;

    /// Return the header of a block in a term's list, `None` if the list
    /// or the block does not exist yet.
    fn on_indexer_block_header(&mut self, term: u32, block_id: u32)
        -> Result<Option<BlockHeader>>;

    /// Append a chunk to the current append-block of a term's list. The
    /// updated list and block headers are passed along; the store must
    /// persist them so that reads return the data exactly as emitted.
    fn on_indexer_chunk(
        &mut self,
        term: u32,
        list: ListHeader,
        block: BlockHeader,
        chunk: &[u8],
    ) -> Result<()>;

    /// Start a new block in a term's list with the given chunk as its body.
    fn on_indexer_new_block(
        &mut self,
        term: u32,
        list: ListHeader,
        block: BlockHeader,
        chunk: &[u8],
    ) -> Result<()>;

    /// Store the raw (packed QLF) fingerprint of a recording. Stores may
    /// ignore this if re-ranking is never used (MMS = 0).
    fn on_indexer_fingerprint(&mut self, fid: u32, data: &[u8]) -> Result<()>;
}

impl<S: DataStore + ?Sized> DataStore for Box<S> {
    fn get_plist_block(&mut self, term: u32, block_id: u32) -> Result<Option<Vec<u8>>> {
        (**self).get_plist_block(term, block_id)
    }
    fn get_fingerprint_size(&mut self, fid: u32) -> Result<usize> {
        (**self).get_fingerprint_size(fid)
    }
    fn get_fingerprint(
        &mut self,
        fid: u32,
        nbytes: usize,
        byte_offset: usize,
    ) -> Result<Vec<u8>> {
        (**self).get_fingerprint(fid, nbytes, byte_offset)
    }
    fn on_indexer_start(&mut self) -> Result<()> {
        (**self).on_indexer_start()
    }
    fn on_indexer_end(&mut self) -> Result<()> {
        (**self).on_indexer_end()
    }
    fn on_indexer_flush_start(&mut self) -> Result<()> {
        (**self).on_indexer_flush_start()
    }
    fn on_indexer_flush_end(&mut self) -> Result<()> {
        (**self).on_indexer_flush_end()
    }
    fn on_indexer_list_header(&mut self, term: u32) -> Result<Option<ListHeader>> {
        (**self).on_indexer_list_header(term)
    }
    fn on_indexer_block_header(
        &mut self,
        term: u32,
        block_id: u32,
    ) -> Result<Option<BlockHeader>> {
        (**self).on_indexer_block_header(term, block_id)
    }
    fn on_indexer_chunk(
        &mut self,
        term: u32,
        list: ListHeader,
        block: BlockHeader,
        chunk: &[u8],
    ) -> Result<()> {
        (**self).on_indexer_chunk(term, list, block, chunk)
    }
    fn on_indexer_new_block(
        &mut self,
        term: u32,
        list: ListHeader,
        block: BlockHeader,
        chunk: &[u8],
    ) -> Result<()> {
        (**self).on_indexer_new_block(term, list, block, chunk)
    }
    fn on_indexer_fingerprint(&mut self, fid: u32, data: &[u8]) -> Result<()> {
        (**self).on_indexer_fingerprint(fid, data)
    }
}

/// Shared-handle store: lets the host keep a handle to the same store an
/// engine session owns (the sessions are single-threaded, so a `RefCell`
/// is enough).
impl<S: DataStore> DataStore for Rc<RefCell<S>> {
    fn get_plist_block(&mut self, term: u32, block_id: u32) -> Result<Option<Vec<u8>>> {
        self.borrow_mut().get_plist_block(term, block_id)
    }
    fn get_fingerprint_size(&mut self, fid: u32) -> Result<usize> {
        self.borrow_mut().get_fingerprint_size(fid)
    }
    fn get_fingerprint(
        &mut self,
        fid: u32,
        nbytes: usize,
        byte_offset: usize,
    ) -> Result<Vec<u8>> {
        self.borrow_mut().get_fingerprint(fid, nbytes, byte_offset)
    }
    fn on_indexer_start(&mut self) -> Result<()> {
        self.borrow_mut().on_indexer_start()
    }
    fn on_indexer_end(&mut self) -> Result<()> {
        self.borrow_mut().on_indexer_end()
    }
    fn on_indexer_flush_start(&mut self) -> Result<()> {
        self.borrow_mut().on_indexer_flush_start()
    }
    fn on_indexer_flush_end(&mut self) -> Result<()> {
        self.borrow_mut().on_indexer_flush_end()
    }
    fn on_indexer_list_header(&mut self, term: u32) -> Result<Option<ListHeader>> {
        self.borrow_mut().on_indexer_list_header(term)
    }
    fn on_indexer_block_header(
        &mut self,
        term: u32,
        block_id: u32,
    ) -> Result<Option<BlockHeader>> {
        self.borrow_mut().on_indexer_block_header(term, block_id)
    }
    fn on_indexer_chunk(
        &mut self,
        term: u32,
        list: ListHeader,
        block: BlockHeader,
        chunk: &[u8],
    ) -> Result<()> {
        self.borrow_mut().on_indexer_chunk(term, list, block, chunk)
    }
    fn on_indexer_new_block(
        &mut self,
        term: u32,
        list: ListHeader,
        block: BlockHeader,
        chunk: &[u8],
    ) -> Result<()> {
        self.borrow_mut()
            .on_indexer_new_block(term, list, block, chunk)
    }
    fn on_indexer_fingerprint(&mut self, fid: u32, data: &[u8]) -> Result<()> {
        self.borrow_mut().on_indexer_fingerprint(fid, data)
    }
}

/// Audio provider interface used by the indexer to pull the audio of the
/// recording being fingerprinted.
pub trait AudioProvider {
    /// Fill `buffer` with up to `buffer.len()` samples of 11025 Hz mono
    /// audio normalized in [-1,1] for recording `fid`. Return the number of
    /// samples written, 0 when the recording is exhausted.
    fn on_audio_data(&mut self, fid: u32, buffer: &mut [f32]) -> Result<usize>;
}

#[derive(Debug, Default, Clone)]
struct PostingsList {
    header: ListHeader,
    blocks: Vec<Block>,
}

#[derive(Debug, Clone)]
struct Block {
    header: BlockHeader,
    body: Vec<u8>,
}

impl Default for ListHeader {
    fn default() -> Self {
        ListHeader { block_count: 0 }
    }
}

/// A complete in-memory [`DataStore`] implementation.
///
/// Useful as a reference for backend implementors, for tests, and for
/// small one-shot index-and-identify runs. Wrap it in `Rc<RefCell<_>>` to
/// keep a handle while an engine session owns it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: HashMap<u32, PostingsList>,
    fingerprints: HashMap<u32, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored fingerprints.
    pub fn fingerprints_count(&self) -> usize {
        self.fingerprints.len()
    }

    /// Number of non-empty postings lists.
    pub fn lists_count(&self) -> usize {
        self.lists.len()
    }

    /// Store a fingerprint directly, bypassing an indexing session.
    pub fn put_fingerprint(&mut self, fid: u32, data: &[u8]) {
        self.fingerprints.insert(fid, data.to_vec());
    }

    /// The terms with a non-empty postings list.
    pub fn terms(&self) -> Vec<u32> {
        self.lists.keys().copied().collect()
    }
}

impl DataStore for MemoryStore {
    fn get_plist_block(&mut self, term: u32, block_id: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.lists.get(&term).and_then(|list| {
            list.blocks
                .get(block_id.wrapping_sub(1) as usize)
                .map(|b| b.body.clone())
        }))
    }

    fn get_fingerprint_size(&mut self, fid: u32) -> Result<usize> {
        Ok(self.fingerprints.get(&fid).map_or(0, |fp| fp.len()))
    }

    fn get_fingerprint(
        &mut self,
        fid: u32,
        nbytes: usize,
        byte_offset: usize,
    ) -> Result<Vec<u8>> {
        let fp = self.fingerprints.get(&fid).ok_or_else(|| {
            crate::Error::InvalidFingerprint(format!("no fingerprint stored for FID {}", fid))
        })?;
        let end = if nbytes == 0 {
            fp.len()
        } else {
            byte_offset + nbytes
        };
        if byte_offset > fp.len() || end > fp.len() {
            return Err(crate::Error::InvalidFingerprint(format!(
                "fingerprint read out of bounds (FID {}, {}..{} of {})",
                fid,
                byte_offset,
                end,
                fp.len()
            )));
        }
        Ok(fp[byte_offset..end].to_vec())
    }

    fn on_indexer_list_header(&mut self, term: u32) -> Result<Option<ListHeader>> {
        Ok(self.lists.get(&term).map(|list| list.header))
    }

    fn on_indexer_block_header(
        &mut self,
        term: u32,
        block_id: u32,
    ) -> Result<Option<BlockHeader>> {
        Ok(self.lists.get(&term).and_then(|list| {
            list.blocks
                .get(block_id.wrapping_sub(1) as usize)
                .map(|b| b.header)
        }))
    }

    fn on_indexer_chunk(
        &mut self,
        term: u32,
        list: ListHeader,
        block: BlockHeader,
        chunk: &[u8],
    ) -> Result<()> {
        let plist = self.lists.entry(term).or_default();
        plist.header = list;
        let idx = block.id as usize - 1;
        if idx == plist.blocks.len() {
            plist.blocks.push(Block {
                header: block,
                body: chunk.to_vec(),
            });
        } else {
            let b = &mut plist.blocks[idx];
            b.header = block;
            b.body.extend_from_slice(chunk);
        }
        Ok(())
    }

    fn on_indexer_new_block(
        &mut self,
        term: u32,
        list: ListHeader,
        block: BlockHeader,
        chunk: &[u8],
    ) -> Result<()> {
        let plist = self.lists.entry(term).or_default();
        plist.header = list;
        plist.blocks.push(Block {
            header: block,
            body: chunk.to_vec(),
        });
        Ok(())
    }

    fn on_indexer_fingerprint(&mut self, fid: u32, data: &[u8]) -> Result<()> {
        self.fingerprints.insert(fid, data.to_vec());
        Ok(())
    }
}
