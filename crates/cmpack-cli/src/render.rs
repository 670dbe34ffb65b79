use std::cell::{Cell, RefCell};
use std::io::IsTerminal;

use indicatif::{ProgressBar, ProgressStyle};

use cmpack_installer::{NullProgress, ProgressSink};

/// Picks the progress sink for this invocation: the encoded stream for
/// tooling, a progress bar on interactive terminals, nothing otherwise.
pub fn select_progress(encoded: bool, quiet: bool) -> Box<dyn ProgressSink> {
    if encoded {
        Box::new(EncodedProgress::default())
    } else if quiet || !std::io::stdout().is_terminal() {
        Box::new(NullProgress)
    } else {
        Box::new(BarProgress::default())
    }
}

#[derive(Default)]
pub struct BarProgress {
    bar: RefCell<Option<ProgressBar>>,
}

impl ProgressSink for BarProgress {
    fn begin(&self, label: &str, total: u64) {
        let bar = ProgressBar::new(total.max(1));
        if let Ok(style) =
            ProgressStyle::with_template("{msg:<24} [{bar:30.cyan/blue}] {pos}/{len}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(label.to_string());
        *self.bar.borrow_mut() = Some(bar);
    }

    fn advance(&self, current: u64) {
        if let Some(bar) = self.bar.borrow().as_ref() {
            bar.set_position(current);
        }
    }

    fn finish(&self) {
        if let Some(bar) = self.bar.borrow_mut().take() {
            bar.finish_and_clear();
        }
    }
}

/// Line-oriented progress for tooling integration: `[S|label|total]` at
/// the start, `[P|current|total]` whenever the integer percentage
/// moves, `[E]` at the end.
#[derive(Default)]
pub struct EncodedProgress {
    total: Cell<u64>,
    last_step: Cell<i64>,
}

impl ProgressSink for EncodedProgress {
    fn begin(&self, label: &str, total: u64) {
        self.total.set(total);
        self.last_step.set(-1);
        println!("{}", format_encoded_start(label, total));
    }

    fn advance(&self, current: u64) {
        let total = self.total.get();
        let step = encoded_step(current, total);
        if step != self.last_step.get() {
            self.last_step.set(step);
            println!("{}", format_encoded_progress(current, total));
        }
    }

    fn finish(&self) {
        println!("[E]");
    }
}

pub fn format_encoded_start(label: &str, total: u64) -> String {
    format!("[S|{label}|{total}]")
}

pub fn format_encoded_progress(current: u64, total: u64) -> String {
    format!("[P|{current}|{total}]")
}

/// Emission step for the encoded stream: integer percent of a known
/// total, whole mebibytes of an unknown one.
pub fn encoded_step(current: u64, total: u64) -> i64 {
    if total == 0 {
        return (current / (1024 * 1024)) as i64;
    }
    ((current.min(total) * 100) / total) as i64
}
