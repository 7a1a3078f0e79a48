//! Transfer progress bar for `ftpsync sync`.
//!
//! ```text
//! ⠋      Syncing [=========>               ] 12/31 css/site.css
//! ```
//!
//! Drawn on stderr and only when stderr is a terminal, so piped output and
//! `--json` stay clean.

use indicatif::{ProgressBar, ProgressStyle};

use ftpsync_sync::ProgressEvent;

const SCANNING: &str = "Scanning";
const SYNCING: &str = "Syncing";

#[derive(Clone)]
pub struct SyncProgress {
    bar: ProgressBar,
}

impl SyncProgress {
    /// A visible bar, or a no-op one when `hidden` is set.
    pub fn new(hidden: bool) -> Self {
        if hidden {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg:>12} [{bar:25.cyan/dim}] {pos}/{len} {prefix:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(SCANNING);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    pub fn observe(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total } => {
                self.bar.set_length(total as u64);
                self.bar.set_position(0);
                self.bar.set_message(SYNCING);
            }
            ProgressEvent::Finished { relative_path, .. } => {
                self.bar.inc(1);
                self.bar.set_prefix(relative_path);
            }
        }
    }

    /// Remove the bar before the report is printed.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftpsync_sync::ChangeKind;

    #[test]
    fn counts_finished_entries() {
        let progress = SyncProgress::new(true);
        progress.observe(ProgressEvent::Started { total: 3 });
        for path in ["a", "b"] {
            progress.observe(ProgressEvent::Finished {
                relative_path: path.to_string(),
                kind: ChangeKind::Added,
                ok: true,
            });
        }
        assert_eq!(progress.bar.length(), Some(3));
        assert_eq!(progress.bar.position(), 2);
        progress.finish();
    }
}
