// Copyright 2022 RisingLight Project Authors. Licensed under Apache-2.0.

use std::ops::Range;

use crate::storage::{StorageResult, TracedStorageError};

/// A half-open range of marks `[begin, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkRange {
    pub begin: usize,
    pub end: usize,
}

impl MarkRange {
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }
}

pub type MarkRanges = Vec<MarkRange>;

/// Row counts of every mark of a part.
///
/// Stored as running sums, so that both "rows before mark i" and "mark of row x"
/// are cheap. The sum of all entries equals the row count of the part once the
/// table is initialized.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexGranularity {
    marks_rows_partial_sums: Vec<u64>,
    initialized: bool,
}

impl IndexGranularity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_granularities(granularities: impl IntoIterator<Item = u64>) -> Self {
        let mut index = Self::new();
        for rows in granularities {
            index.append_mark(rows);
        }
        index
    }

    pub fn append_mark(&mut self, rows: u64) {
        let total = self.total_rows();
        self.marks_rows_partial_sums.push(total + rows);
    }

    /// Resize to `marks_count` marks, every new mark holding `granularity` rows.
    pub fn resize_with_fixed_granularity(&mut self, marks_count: usize, granularity: u64) {
        self.marks_rows_partial_sums.truncate(marks_count);
        while self.marks_rows_partial_sums.len() < marks_count {
            self.append_mark(granularity);
        }
    }

    pub fn set_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn marks_count(&self) -> usize {
        self.marks_rows_partial_sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks_rows_partial_sums.is_empty()
    }

    pub fn total_rows(&self) -> u64 {
        self.marks_rows_partial_sums.last().copied().unwrap_or(0)
    }

    /// Index of the first row of mark `mark`. Equals `total_rows()` for `mark == marks_count()`.
    pub fn mark_starting_row(&self, mark: usize) -> u64 {
        match mark {
            0 => 0,
            _ => self.marks_rows_partial_sums[mark - 1],
        }
    }

    /// Rows of mark `mark`, or `None` past the last mark.
    pub fn mark_rows(&self, mark: usize) -> Option<u64> {
        let end = *self.marks_rows_partial_sums.get(mark)?;
        Some(end - self.mark_starting_row(mark))
    }

    pub fn last_mark_rows(&self) -> u64 {
        self.marks_count()
            .checked_sub(1)
            .and_then(|mark| self.mark_rows(mark))
            .unwrap_or(0)
    }

    /// Adaptive parts may end with a mark that holds no rows.
    pub fn has_final_mark(&self) -> bool {
        !self.is_empty() && self.last_mark_rows() == 0
    }

    pub fn rows_count_in_range(&self, range: MarkRange) -> u64 {
        self.mark_starting_row(range.end) - self.mark_starting_row(range.begin)
    }

    /// Rows covered by `range`.
    pub fn row_range(&self, range: MarkRange) -> Range<u64> {
        self.mark_starting_row(range.begin)..self.mark_starting_row(range.end)
    }

    pub fn rows_count_in_ranges(&self, ranges: &[MarkRange]) -> u64 {
        ranges
            .iter()
            .map(|range| self.rows_count_in_range(*range))
            .sum()
    }

    /// Find the mark containing `row`.
    pub fn mark_of_row(&self, row: u64) -> Option<usize> {
        // Mark `i` contains row x if `partial_sums[i - 1] <= x < partial_sums[i]`, so we
        // partition the marks by `partial_sums <= x`. Marks holding no rows never match.
        if row >= self.total_rows() {
            return None;
        }
        Some(
            self.marks_rows_partial_sums
                .partition_point(|&sum| sum <= row),
        )
    }

    pub fn granularities(&self) -> impl Iterator<Item = u64> + '_ {
        self.marks_rows_partial_sums
            .iter()
            .scan(0, |before, &sum| {
                let rows = sum - *before;
                *before = sum;
                Some(rows)
            })
    }

    /// Make the last mark hold the rows that are left over from `rows_count`.
    ///
    /// Fixed-granularity mark files only tell how many marks exist, so every mark
    /// starts out full. The real row count of the last mark is derived here.
    pub fn reconcile_last_mark(&mut self, rows_count: u64) -> StorageResult<()> {
        let marks_count = self.marks_count();
        if marks_count == 0 {
            if rows_count == 0 {
                return Ok(());
            }
            return Err(TracedStorageError::logical_error(format!(
                "part has {rows_count} rows but no marks"
            )));
        }
        let before_last = self.mark_starting_row(marks_count - 1);
        let total = self.total_rows();
        if rows_count <= before_last || rows_count > total {
            return Err(TracedStorageError::logical_error(format!(
                "part has {} rows but its marks describe between {} and {} rows",
                rows_count,
                before_last + 1,
                total
            )));
        }
        self.marks_rows_partial_sums[marks_count - 1] = rows_count;
        Ok(())
    }
}
