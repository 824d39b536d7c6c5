use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Counts of batch items by outcome
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressRecord {
    pub completed: usize,
    /// Completed items whose confidence could not be estimated, counted in `completed` too
    pub degraded: usize,
    pub missing: usize,
    pub no_peaks: usize,
    pub failed: usize,
}

impl ProgressRecord {
    /// The number of items that reached a final outcome, whatever it was
    pub fn processed(&self) -> usize {
        self.completed + self.missing + self.no_peaks + self.failed
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.completed += rhs.completed;
        self.degraded += rhs.degraded;
        self.missing += rhs.missing;
        self.no_peaks += rhs.no_peaks;
        self.failed += rhs.failed;
    }
}

impl Sum for ProgressRecord {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, x| acc + x)
    }
}

/// The final tally of a batch run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub progress: ProgressRecord,
}

impl BatchSummary {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            progress: ProgressRecord::default(),
        }
    }

    pub fn processed(&self) -> usize {
        self.progress.processed()
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed() as f64 * 100.0 / self.total as f64
        }
    }

    pub fn status_line(&self) -> String {
        format!(
            "Finished processing {} of {} ({:.2}%) items.",
            self.processed(),
            self.total,
            self.percent()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_summary() {
        let mut summary = BatchSummary::new(4);
        summary.progress += ProgressRecord {
            completed: 2,
            degraded: 1,
            ..Default::default()
        };
        summary.progress += ProgressRecord {
            missing: 1,
            ..Default::default()
        };
        assert_eq!(summary.processed(), 3);
        assert_eq!(summary.percent(), 75.0);
        assert_eq!(
            summary.status_line(),
            "Finished processing 3 of 4 (75.00%) items."
        );
        let total: ProgressRecord = [summary.progress, summary.progress].into_iter().sum();
        assert_eq!(total.completed, 4);
    }
}
