//! Interval module
//!
//! Intervals are the leaf data unit of the history tree: one attribute holding
//! one value over a closed time range, plus the codec that packs them into
//! node blocks.

pub mod state_interval;
pub mod value;

// Re-export key types and functions
pub use state_interval::{DATA_ENTRY_SIZE, Interval};
pub use value::{MAX_STRING_LEN, StateValue};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{BlockReader, BlockWriter};

    #[test]
    fn test_mixed_entries_share_one_block() {
        let intervals = vec![
            Interval::new(0, 9, 0, StateValue::Null).unwrap(),
            Interval::new(0, 4, 1, "idle").unwrap(),
            Interval::new(5, 9, 1, "running").unwrap(),
            Interval::new(0, 9, 2, 2.5).unwrap(),
        ];

        let mut block = vec![0u8; 256];
        let mut strings_end = block.len();
        {
            let mut writer = BlockWriter::new(&mut block);
            for interval in &intervals {
                strings_end -= interval.encode(&mut writer, strings_end);
            }
            assert_eq!(writer.position(), intervals.len() * DATA_ENTRY_SIZE);
        }
        assert_eq!(256 - strings_end, (4 + 2) + (7 + 2));

        let mut reader = BlockReader::new(&block);
        for expected in &intervals {
            assert_eq!(&Interval::decode(&mut reader).unwrap(), expected);
        }
    }
}
