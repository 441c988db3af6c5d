//! Chunked transfer of ordered payloads
//!
//! A transfer is declared up front with its chunk count and completes when
//! either that many chunks have arrived or a chunk carries the last-marker,
//! whichever happens first. Items carry their own sequence number, so chunk
//! arrival order does not matter.

use std::collections::BTreeMap;
use tracing::warn;

/// Items that know their position in the original sequence
pub trait Sequenced {
    /// 0-based position in the original sequence
    fn sequence(&self) -> usize;
}

impl Sequenced for crate::capture::CapturedFrame {
    fn sequence(&self) -> usize {
        self.index
    }
}

/// Progress of a transfer after a chunk was appended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// More chunks expected
    Pending {
        /// Chunks received so far
        received: usize,
        /// Chunks declared
        total: usize,
    },
    /// Transfer finished; the payload can be taken
    Complete,
}

/// Reassembles a chunked sequence
#[derive(Debug)]
pub struct ChunkedTransfer<T> {
    total_chunks: usize,
    received_chunks: usize,
    last_seen: bool,
    items: BTreeMap<usize, T>,
}

impl<T: Sequenced> ChunkedTransfer<T> {
    /// `beginTransfer(totalChunks)`
    pub fn begin(total_chunks: usize) -> Self {
        Self {
            total_chunks,
            received_chunks: 0,
            last_seen: false,
            items: BTreeMap::new(),
        }
    }

    /// `appendChunk(chunk, isLast)`
    pub fn append(&mut self, chunk: Vec<T>, is_last: bool) -> TransferState {
        self.received_chunks += 1;
        self.last_seen |= is_last;
        for item in chunk {
            let seq = item.sequence();
            if self.items.insert(seq, item).is_some() {
                warn!(sequence = seq, "Duplicate item in chunked transfer, keeping the later one");
            }
        }
        self.state()
    }

    /// Current state
    pub fn state(&self) -> TransferState {
        if self.is_complete() {
            TransferState::Complete
        } else {
            TransferState::Pending {
                received: self.received_chunks,
                total: self.total_chunks,
            }
        }
    }

    /// Declared count reached or last-marker seen
    pub fn is_complete(&self) -> bool {
        self.last_seen || self.received_chunks >= self.total_chunks
    }

    /// Chunks received so far
    pub fn received_chunks(&self) -> usize {
        self.received_chunks
    }

    /// Chunks declared at `begin`
    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    /// Items received so far
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True before any item has arrived
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Payload in original order
    pub fn into_ordered(self) -> Vec<T> {
        self.items.into_values().collect()
    }
}

/// Split `items` into chunks of at most `chunk_size`, keeping order
pub fn split_into_chunks<T>(items: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size);
    for item in items {
        current.push(item);
        if current.len() == chunk_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Item(usize);

    impl Sequenced for Item {
        fn sequence(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_completes_on_declared_count() {
        let mut transfer = ChunkedTransfer::begin(2);
        assert_eq!(
            transfer.append(vec![Item(0), Item(1)], false),
            TransferState::Pending {
                received: 1,
                total: 2
            }
        );
        assert_eq!(transfer.append(vec![Item(2)], false), TransferState::Complete);
    }

    #[test]
    fn test_completes_on_last_marker_before_count() {
        let mut transfer = ChunkedTransfer::begin(5);
        transfer.append(vec![Item(0)], false);
        assert_eq!(transfer.append(vec![Item(1)], true), TransferState::Complete);
        assert_eq!(transfer.into_ordered(), vec![Item(0), Item(1)]);
    }

    #[test]
    fn test_out_of_order_chunks_are_reordered() {
        let mut transfer = ChunkedTransfer::begin(3);
        transfer.append(vec![Item(4), Item(5)], false);
        transfer.append(vec![Item(0), Item(1)], false);
        transfer.append(vec![Item(2), Item(3)], false);
        let ordered: Vec<usize> = transfer.into_ordered().into_iter().map(|i| i.0).collect();
        assert_eq!(ordered, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_split_into_chunks() {
        let chunks = split_into_chunks((0..23).collect::<Vec<_>>(), 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], vec![20, 21, 22]);
        assert!(split_into_chunks(Vec::<u8>::new(), 10).is_empty());
    }

    #[test]
    fn test_split_zero_chunk_size() {
        assert_eq!(split_into_chunks(vec![1, 2], 0).len(), 2);
    }
}
