//! Circular buffer drain arithmetic.
//!
//! Given the last drained offset and the current write pointer, [`plan`]
//! returns the buffer segments holding samples that have not been read yet.
//! When the pointer has wrapped the tail of the buffer is read first, then the
//! head starting at offset 1 (the hardware's first addressable sample after a
//! wrap).

/// One contiguous read from the circular buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSegment {
    /// Absolute buffer offset of the first sample
    pub start: u32,
    /// Number of samples
    pub count: u32,
}

impl DrainSegment {
    /// One past the last offset read.
    pub fn end(&self) -> u32 {
        self.start + self.count
    }
}

/// Segments to read to catch up from `previous` to `current`.
///
/// Zero-length segments are omitted, so an unchanged pointer yields an empty
/// plan and no instrument traffic.
pub fn plan(previous: u32, current: u32, buffer_size: u32) -> Vec<DrainSegment> {
    let segments = if current < previous {
        [
            DrainSegment {
                start: previous,
                count: buffer_size.saturating_sub(previous),
            },
            DrainSegment {
                start: 1,
                count: current.saturating_sub(1),
            },
        ]
        .to_vec()
    } else {
        vec![DrainSegment {
            start: previous,
            count: current - previous,
        }]
    };

    segments.into_iter().filter(|s| s.count > 0).collect()
}

/// Total samples covered by `segments`.
pub fn total(segments: &[DrainSegment]) -> usize {
    segments.iter().map(|s| s.count as usize).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUFFER_SIZE: u32 = 16384;

    #[test]
    fn test_wraparound_reads_tail_then_head_from_one() {
        let segments = plan(16000, 50, BUFFER_SIZE);
        assert_eq!(
            segments,
            vec![
                DrainSegment {
                    start: 16000,
                    count: 384
                },
                DrainSegment { start: 1, count: 49 },
            ]
        );
        assert_eq!(segments[0].end(), BUFFER_SIZE);
        assert_eq!(segments[1].end(), 50);
    }

    #[test]
    fn test_forward_progress_is_one_segment() {
        assert_eq!(
            plan(1, 4000, BUFFER_SIZE),
            vec![DrainSegment {
                start: 1,
                count: 3999
            }]
        );
    }

    #[test]
    fn test_unchanged_pointer_plans_nothing() {
        assert!(plan(9000, 9000, BUFFER_SIZE).is_empty());
    }

    #[test]
    fn test_wrap_to_zero_or_one_skips_empty_head() {
        assert_eq!(
            plan(16000, 0, BUFFER_SIZE),
            vec![DrainSegment {
                start: 16000,
                count: 384
            }]
        );
        assert_eq!(total(&plan(16000, 1, BUFFER_SIZE)), 384);
    }

    #[test]
    fn test_cadence_does_not_change_covered_range() {
        // One large poll versus many small ones over the same span
        let single = plan(100, 12100, BUFFER_SIZE);

        let mut many = Vec::new();
        let mut previous = 100;
        for current in (1100..=12100).step_by(1000) {
            many.extend(plan(previous, current, BUFFER_SIZE));
            previous = current;
        }

        assert_eq!(total(&single), total(&many));
        let offsets = |segments: &[DrainSegment]| -> Vec<u32> {
            segments.iter().flat_map(|s| s.start..s.end()).collect()
        };
        assert_eq!(offsets(&single), offsets(&many));
    }
}
