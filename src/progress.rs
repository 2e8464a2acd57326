use std::io::Write;

pub const TOTAL_STEPS: usize = 4;
const BAR_WIDTH: usize = 50;
const FILL: char = '█';
const EMPTY: char = '-';

/// Milestones reported while a workbook is repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    Authenticated = 1,
    Uploaded = 2,
    Patched = 3,
    Downloaded = 4,
}

pub fn render_bar(iteration: usize, total: usize, width: usize) -> String {
    let total = total.max(1);
    let iteration = iteration.min(total);
    let percent = 100.0 * iteration as f64 / total as f64;
    let filled = width * iteration / total;
    let bar: String = std::iter::repeat_n(FILL, filled)
        .chain(std::iter::repeat_n(EMPTY, width - filled))
        .collect();
    format!("\rProgress: |{bar}| {percent:.1}% Complete")
}

pub struct ProgressReporter<W: Write> {
    out: Option<W>,
    last_step: usize,
}

impl<W: Write> ProgressReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Some(out),
            last_step: 0,
        }
    }

    pub fn disabled() -> Self {
        Self {
            out: None,
            last_step: 0,
        }
    }

    pub fn mark(&mut self, milestone: Milestone) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        let step = milestone as usize;
        self.last_step = step;
        let mut line = render_bar(step, TOTAL_STEPS, BAR_WIDTH);
        if step == TOTAL_STEPS {
            line.push('\n');
        }
        // Cosmetic; write errors are ignored.
        let _ = out.write_all(line.as_bytes()).and_then(|_| out.flush());
    }
}

impl<W: Write> Drop for ProgressReporter<W> {
    /// An abandoned bar still ends its line so later messages start clean.
    fn drop(&mut self) {
        if self.last_step == 0 || self.last_step >= TOTAL_STEPS {
            return;
        }
        if let Some(out) = self.out.as_mut() {
            let _ = out.write_all(b"\n").and_then(|_| out.flush());
        }
    }
}
