//! Transfer progress parsed from the rsync job's output.

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

const BAR_TEMPLATE: &str = "[{bar:40}] {percent}% {msg}";

/// A single progress sample reported by rsync `--info=progress2`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransferProgress {
    /// Bytes transferred so far.
    pub bytes: u64,
    /// Overall completion, 0 to 100.
    pub percent: u8,
}

/// Parses the most recent progress sample in `output`.
///
/// rsync rewrites its progress line with carriage returns, so only the last
/// non-empty segment is considered. Returns `None` when that segment is not a
/// progress line.
#[must_use]
pub fn parse_rsync_progress(output: &str) -> Option<TransferProgress> {
    let segment = output
        .rsplit(['\r', '\n'])
        .map(str::trim)
        .find(|segment| !segment.is_empty())?;
    let mut fields = segment.split_whitespace();
    let bytes = fields.next()?.replace(',', "").parse::<u64>().ok()?;
    let percent = fields
        .next()?
        .strip_suffix('%')?
        .parse::<u8>()
        .ok()
        .filter(|percent| *percent <= 100)?;
    Some(TransferProgress { bytes, percent })
}

/// Renders transfer progress on the terminal, or nothing when disabled.
#[derive(Debug)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Creates a percentage bar, hidden when `visible` is false.
    #[must_use]
    pub fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        Self { bar }
    }

    /// Moves the bar to `progress`.
    pub fn update(&self, progress: TransferProgress) {
        self.bar.set_position(u64::from(progress.percent));
        self.bar
            .set_message(format!("{} transferred", HumanBytes(progress.bytes)));
    }

    /// Current position, 0 to 100.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Completes the bar after a successful transfer.
    pub fn finish_success(&self) {
        self.bar.set_position(100);
        self.bar.finish_with_message("done");
    }

    /// Leaves the bar where it stopped after a failed transfer.
    pub fn finish_error(&self) {
        self.bar.abandon_with_message("failed");
    }
}
