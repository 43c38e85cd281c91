use corridor_watch::RunStage;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
    Quiet,
}

/// Stage progress on stderr. Spinners only when stderr is a terminal.
#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn pretty(&self) -> bool {
        self.is_tty && matches!(self.mode, UiMode::Auto | UiMode::Pretty)
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.mode == UiMode::Quiet {
            return StageGuard::new(name.to_string(), None, false);
        }
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner), true)
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None, true)
        }
    }

    /// Tracks a pipeline run: each transition closes the previous stage.
    pub fn run_tracker(&self) -> RunTracker<'_> {
        RunTracker {
            ui: self,
            current: Some(self.stage(label_for_next(None))),
        }
    }
}

pub struct RunTracker<'a> {
    ui: &'a Ui,
    current: Option<StageGuard>,
}

impl RunTracker<'_> {
    pub fn on_stage(&mut self, reached: RunStage) {
        // Finish the stage that just completed before opening the next.
        self.current.take();
        if reached != RunStage::Reported {
            self.current = Some(self.ui.stage(label_for_next(Some(reached))));
        }
    }
}

fn label_for_next(reached: Option<RunStage>) -> &'static str {
    match reached {
        None => "Extract candidates",
        Some(RunStage::Extracted) => "Classify candidates",
        Some(RunStage::Classified) => "Geolocate",
        Some(RunStage::Geolocated) => "Check compliance and score",
        Some(RunStage::Scored) => "Dispatch alerts and tickets",
        Some(RunStage::Dispatched) | Some(RunStage::Reported) => "Write report",
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    announce: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>, announce: bool) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            announce,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if !self.announce {
            return;
        }
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
