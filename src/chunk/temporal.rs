//! Grouping of acquisition dates into temporal chunks.

use crate::chunk::TemporalChunk;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeMap;

/// Group acquisition dates by calendar year, each year's dates ascending.
pub fn group_dates_by_year(dates: &[DateTime<Utc>]) -> BTreeMap<i32, Vec<DateTime<Utc>>> {
    let mut by_year: BTreeMap<i32, Vec<DateTime<Utc>>> = BTreeMap::new();
    for &d in dates {
        by_year.entry(d.year()).or_default().push(d);
    }
    for year_dates in by_year.values_mut() {
        year_dates.sort();
    }
    by_year
}

/// Batch-mode chunking: the earliest year is the anchor, and every later
/// year becomes one `[anchor, comparison]` pair, in chronological order.
/// Fails when fewer than two years carry acquisitions.
pub fn pair_years_against_anchor(
    by_year: &BTreeMap<i32, Vec<DateTime<Utc>>>,
) -> Result<Vec<TemporalChunk>> {
    let mut years = by_year.iter();
    let (anchor_year, anchor) = years.next().ok_or_else(|| {
        PipelineError::Validation("no acquisitions in the requested time range".to_string())
    })?;

    let chunks: Vec<TemporalChunk> = years
        .enumerate()
        .map(|(index, (_, comparison))| TemporalChunk::Pair {
            index,
            anchor: anchor.clone(),
            comparison: comparison.clone(),
        })
        .collect();

    if chunks.is_empty() {
        return Err(PipelineError::Validation(format!(
            "comparison requires acquisitions in at least two calendar years, only {} has data",
            anchor_year
        )));
    }

    Ok(chunks)
}

/// Iterative-mode chunking: contiguous windows of `window_size` dates.
/// `reversed` orders the windows (and the dates inside them) most recent
/// first, for most-recent-first running statistics. Chunk indices always
/// follow the produced order.
pub fn create_time_windows(
    dates: &[DateTime<Utc>],
    window_size: usize,
    reversed: bool,
) -> Vec<TemporalChunk> {
    let mut sorted: Vec<DateTime<Utc>> = dates.to_vec();
    sorted.sort();
    if reversed {
        sorted.reverse();
    }

    let size = window_size.max(1);
    sorted
        .chunks(size)
        .enumerate()
        .map(|(index, window)| TemporalChunk::Window {
            index,
            dates: window.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_group_by_year_sorts_within_year() {
        let dates = vec![date(2015, 6, 1), date(2015, 1, 1), date(2017, 2, 2)];
        let by_year = group_dates_by_year(&dates);

        assert_eq!(by_year.len(), 2);
        assert_eq!(by_year[&2015], vec![date(2015, 1, 1), date(2015, 6, 1)]);
        assert_eq!(by_year[&2017], vec![date(2017, 2, 2)]);
    }

    #[test]
    fn test_anchor_pairing() {
        let dates = vec![
            date(2014, 3, 1),
            date(2015, 4, 1),
            date(2016, 5, 1),
            date(2016, 6, 1),
        ];
        let chunks = pair_years_against_anchor(&group_dates_by_year(&dates)).unwrap();

        // years - 1 pairs, all anchored to 2014
        assert_eq!(chunks.len(), 2);
        for (i, chunk) in chunks.iter().enumerate() {
            let TemporalChunk::Pair { index, anchor, .. } = chunk else {
                panic!("expected pair");
            };
            assert_eq!(*index, i);
            assert_eq!(anchor, &vec![date(2014, 3, 1)]);
        }
        let TemporalChunk::Pair { comparison, .. } = &chunks[1] else {
            panic!("expected pair");
        };
        assert_eq!(comparison.len(), 2);
    }

    #[test]
    fn test_anchor_pairing_requires_two_years() {
        let dates = vec![date(2015, 1, 1), date(2015, 9, 9)];
        assert!(pair_years_against_anchor(&group_dates_by_year(&dates)).is_err());
        assert!(pair_years_against_anchor(&BTreeMap::new()).is_err());
    }

    #[test]
    fn test_window_count_formula() {
        let dates: Vec<_> = (1..=5).map(|d| date(2015, 1, d)).collect();

        // ceil(5 / 2) = 3 windows
        let chunks = create_time_windows(&dates, 2, false);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].num_steps(), 2);
        assert_eq!(chunks[2].num_steps(), 1);
    }

    #[test]
    fn test_windows_are_chronological() {
        let dates = vec![date(2015, 3, 1), date(2015, 1, 1), date(2015, 2, 1)];
        let chunks = create_time_windows(&dates, 2, false);

        let TemporalChunk::Window { dates: w0, .. } = &chunks[0] else {
            panic!("expected window");
        };
        assert_eq!(w0, &vec![date(2015, 1, 1), date(2015, 2, 1)]);
    }

    #[test]
    fn test_reversed_windows_are_most_recent_first() {
        let dates = vec![date(2015, 1, 1), date(2015, 2, 1), date(2015, 3, 1)];
        let chunks = create_time_windows(&dates, 2, true);

        let TemporalChunk::Window { dates: w0, index } = &chunks[0] else {
            panic!("expected window");
        };
        assert_eq!(*index, 0);
        assert_eq!(w0, &vec![date(2015, 3, 1), date(2015, 2, 1)]);
    }

    #[test]
    fn test_zero_window_size_is_clamped() {
        let dates = vec![date(2015, 1, 1), date(2015, 2, 1)];
        let chunks = create_time_windows(&dates, 0, false);
        assert_eq!(chunks.len(), 2);
    }
}
