use crate::alignment::Interval;

/// Finds the quality-qualifying window of a read as a read-local `[start, end)` interval.
///
/// The window starts at the first run of `min_length` consecutive base qualities at or
/// above `min_q` and ends one past the last such run. A read with no qualifying run
/// anywhere yields the empty interval; a uniformly low-quality read is never partially
/// trimmed.
pub fn calculate_trim(quals: &[u8], min_q: u8, min_length: usize) -> Interval {
    // find initial end-trim
    let mut read_start = 0;
    let mut hi_q_count = 0;
    while read_start < quals.len() {
        if quals[read_start] < min_q {
            hi_q_count = 0;
        } else {
            hi_q_count += 1;
            if hi_q_count == min_length {
                break;
            }
        }
        read_start += 1;
    }
    if read_start == quals.len() {
        return Interval::EMPTY;
    }
    read_start -= min_length - 1;

    // find final end-trim
    let mut idx = quals.len();
    hi_q_count = 0;
    while idx > 0 {
        idx -= 1;
        if quals[idx] < min_q {
            hi_q_count = 0;
        } else {
            hi_q_count += 1;
            if hi_q_count == min_length {
                break;
            }
        }
    }

    Interval::new(read_start, idx + min_length)
}
