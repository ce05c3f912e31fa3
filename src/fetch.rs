//! Ranged retrieval of stored samples.

use log::debug;

use crate::codec::{CMD_FETCH_BLOCK, MAX_SAMPLES_PER_FETCH};
use crate::errors::{DriverError, Result, Shortfall};
use crate::records::{HeaderInfo, Sample};

/// What one fetch round trip produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Samples(Vec<Sample>),
    EndOfData,
}

/// Check that `count` samples from `start` lie inside the range the header announces.
pub fn validate_range(header: &HeaderInfo, start: u32, count: usize) -> Result<()> {
    let first = header.start_position() as u64;
    let end = header.end_position() as u64;
    let start64 = start as u64;
    if start64 < first || start64 + count as u64 > end {
        let available = if (first..end).contains(&start64) {
            (end - start64) as usize
        } else {
            0
        };
        return Err(DriverError::IncompleteRange {
            start,
            requested: count,
            received: 0,
            shortfall: Shortfall::BeyondLog { available },
        });
    }
    Ok(())
}

/// Collect `count` samples starting at logical position `start`.
///
/// `fetch_block(position, n)` performs one round trip for up to `n` samples
/// starting at `position`. Samples are returned in ascending position order.
/// The transfer is left open; closing it is the caller's job.
pub fn fetch_range<F>(
    header: &HeaderInfo,
    start: u32,
    count: usize,
    mut fetch_block: F,
) -> Result<Vec<Sample>>
where
    F: FnMut(u32, usize) -> Result<Block>,
{
    validate_range(header, start, count)?;

    let mut samples: Vec<Sample> = Vec::with_capacity(count);
    while samples.len() < count {
        let position = start + samples.len() as u32;
        let want = (count - samples.len()).min(MAX_SAMPLES_PER_FETCH as usize);
        match fetch_block(position, want)? {
            Block::Samples(block) => {
                if block.len() > want {
                    return Err(DriverError::ProtocolMismatch {
                        opcode: CMD_FETCH_BLOCK,
                        expected: vec![want as u8],
                        actual: vec![block.len() as u8],
                    });
                }
                let short = block.len() < want;
                for (i, sample) in block.into_iter().enumerate() {
                    debug_assert_eq!(sample.position, position + i as u32);
                    samples.push(sample);
                }
                if short {
                    debug!("Short block at position {} without end-of-data marker", position);
                    return Err(DriverError::IncompleteRange {
                        start,
                        requested: count,
                        received: samples.len(),
                        shortfall: Shortfall::ShortBlock,
                    });
                }
            }
            Block::EndOfData => {
                debug!(
                    "End of data at position {} after {} of {} samples",
                    position,
                    samples.len(),
                    count
                );
                return Err(DriverError::IncompleteRange {
                    start,
                    requested: count,
                    received: samples.len(),
                    shortfall: Shortfall::EndOfData,
                });
            }
        }
    }
    Ok(samples)
}
