//! # Chunked Log Range Fetcher
//!
//! Public endpoints reject wide `eth_getLogs` queries, so a block range is
//! split into fixed-size chunks fetched strictly sequentially (the shared
//! throttler paces them; parallel chunks would defeat it).
//!
//! Chunk-failure policy: by default a chunk that exhausts the reader's retry
//! budget is skipped with a warning and the fetch returns whatever the other
//! chunks produced. Partial history beats no history for a monitoring view.
//! Callers that need a consistency guarantee opt into
//! [`FetchMode::AllOrNothing`], which aborts the range on the first
//! exhausted chunk instead.

use ethers::types::{Filter, Log};
use tracing::{debug, warn};

use crate::chain::ChainReader;
use crate::errors::ChainError;

/// Chunk-failure policy for one range fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Skip chunks that exhaust retries; return the union of the rest.
    #[default]
    SkipFailedChunks,
    /// Abort the whole range on the first exhausted chunk.
    AllOrNothing,
}

/// Result of a range fetch. `skipped` lists the chunk ranges that were
/// dropped after exhausting retries; non-empty means the logs are a partial
/// snapshot, not a complete record.
#[derive(Debug, Default)]
pub struct RangeFetch {
    pub logs: Vec<Log>,
    pub skipped: Vec<(u64, u64)>,
}

impl RangeFetch {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Splits `[from, to]` (inclusive) into chunks of at most `chunk_size` blocks.
pub fn chunk_ranges(from: u64, to: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    if from > to || chunk_size == 0 {
        return Vec::new();
    }
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(chunk_size - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

pub struct LogRangeFetcher<'a> {
    reader: &'a ChainReader,
    chunk_size: u64,
}

impl<'a> LogRangeFetcher<'a> {
    pub fn new(reader: &'a ChainReader, chunk_size: u64) -> Self {
        Self { reader, chunk_size: chunk_size.max(1) }
    }

    /// Fetches all logs matching `filter` in `[from_block, to_block]`,
    /// chunk by chunk.
    pub async fn fetch_range(
        &self,
        filter: &Filter,
        from_block: u64,
        to_block: u64,
        mode: FetchMode,
    ) -> Result<RangeFetch, ChainError> {
        let ranges = chunk_ranges(from_block, to_block, self.chunk_size);
        let mut result = RangeFetch::default();

        for (start, end) in ranges {
            match self.reader.get_logs(filter, start, end).await {
                Ok(mut logs) => {
                    debug!(
                        target: "log_fetcher",
                        from = start,
                        to = end,
                        count = logs.len(),
                        "Fetched log chunk"
                    );
                    result.logs.append(&mut logs);
                }
                Err(e) if e.is_retryable() || matches!(e, ChainError::Unavailable { .. }) => {
                    match mode {
                        FetchMode::SkipFailedChunks => {
                            warn!(
                                target: "log_fetcher",
                                from = start,
                                to = end,
                                error = %e,
                                "Skipping log chunk after exhausting retries"
                            );
                            result.skipped.push((start, end));
                        }
                        FetchMode::AllOrNothing => return Err(e),
                    }
                }
                // Malformed responses and configuration errors abort the
                // range regardless of mode.
                Err(e) => return Err(e),
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_covers_range_exactly() {
        assert_eq!(chunk_ranges(0, 9, 5), vec![(0, 4), (5, 9)]);
        assert_eq!(chunk_ranges(100, 100, 20), vec![(100, 100)]);
        assert_eq!(chunk_ranges(0, 10, 4), vec![(0, 3), (4, 7), (8, 10)]);
    }

    #[test]
    fn chunking_handles_degenerate_inputs() {
        assert!(chunk_ranges(10, 5, 5).is_empty());
        assert!(chunk_ranges(0, 10, 0).is_empty());
    }

    #[test]
    fn chunks_are_contiguous_and_inclusive() {
        let ranges = chunk_ranges(37, 412, 20);
        assert_eq!(ranges.first().unwrap().0, 37);
        assert_eq!(ranges.last().unwrap().1, 412);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
        }
    }
}
