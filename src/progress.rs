//! Progress reporting infrastructure

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// CLI progress report of ongoing operations
///
/// To avoid corrupted terminal output, you should not write anything to stdout
/// or stderr yourself as long as a report is being displayed. Please use logs
/// for debug messages.
#[derive(Clone, Debug, Default)]
pub struct ProgressReport(MultiProgress);
//
impl ProgressReport {
    /// Prepare to report progress on the cli
    pub fn new() -> Self {
        Self::default()
    }

    /// Track how many datasets of a batch were processed
    pub fn datasets(&self, count: usize) -> ProgressTracker {
        self.track(
            "Transforming datasets",
            count as u64,
            "{prefix} {wide_bar} {pos}/{len}",
        )
    }

    /// Track the transfer of a stream of bytes of some expected size
    ///
    /// The expected size can be unknown (zero), in which case progress is
    /// tracked but nothing is displayed.
    pub fn bytes(&self, what: impl Into<String>, expected: u64) -> ProgressTracker {
        self.track(
            what.into(),
            expected,
            "{prefix} {wide_bar} {decimal_bytes}/{decimal_total_bytes} (~{eta} left)",
        )
    }

    /// Set up a progress bar, only displaying it if there is work to show
    fn track(&self, prefix: impl Into<String>, length: u64, template: &str) -> ProgressTracker {
        let style = ProgressStyle::with_template(template)
            .expect("all styles above should be valid indicatif styles");
        let bar = ProgressBar::new(length)
            .with_prefix(prefix.into())
            .with_style(style);
        if length > 0 {
            self.0.add(bar.clone());
        }
        ProgressTracker {
            bar,
            report: self.0.clone(),
        }
    }
}

/// Progress bar of one operation
///
/// The bar is removed from the report when the tracker is dropped, whether
/// the operation completed or not.
#[derive(Debug)]
pub struct ProgressTracker {
    /// Progress bar for this specific operation
    bar: ProgressBar,

    /// Report that the bar belongs to
    report: MultiProgress,
}
//
impl ProgressTracker {
    /// Record that `amount` more work was done
    ///
    /// Returns truth that the operation is now complete.
    pub fn advance(&self, amount: u64) -> bool {
        self.advance_to(self.bar.position() + amount)
    }

    /// Record that work was done up to some absolute position
    ///
    /// Expected sizes come from archive and HTTP metadata, which may be
    /// wrong, so the position saturates at the expected size. Returns truth
    /// that the operation is now complete.
    pub fn advance_to(&self, position: u64) -> bool {
        let expected = self.bar.length().unwrap_or(0);
        self.bar.set_position(position.min(expected));
        self.bar.position() == expected
    }
}
//
impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
        self.report.remove(&self.bar);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_progress_saturates_at_expected_size() {
        let report = ProgressReport::new();
        let tracker = report.bytes("Empresas0.zip", 100);
        assert!(!tracker.advance(40));
        assert_eq!(tracker.bar.position(), 40);
        assert!(!tracker.advance_to(99));
        assert!(tracker.advance_to(250));
        assert_eq!(tracker.bar.position(), 100);
    }

    #[test]
    fn datasets_count_up() {
        let report = ProgressReport::new();
        let tracker = report.datasets(2);
        assert!(!tracker.advance(1));
        assert!(tracker.advance(1));
    }

    #[test]
    fn unknown_sizes_are_tracked() {
        let report = ProgressReport::new();
        let tracker = report.bytes("download", 0);
        assert!(tracker.advance(10));
        assert_eq!(tracker.bar.position(), 0);
    }
}
