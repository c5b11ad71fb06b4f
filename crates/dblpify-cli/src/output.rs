use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use dblpify_core::{EntryStatus, ProgressEvent, RunSummary};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Live progress: one bar for entries, plus a transient countdown while a
/// rate-limit wait is in progress.
pub struct ProgressView {
    multi: MultiProgress,
    entries: ProgressBar,
    wait: Mutex<Option<ProgressBar>>,
}

impl ProgressView {
    pub fn new() -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stdout());
        let entries = multi.add(ProgressBar::new(0));
        entries.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.green/dim}] {pos}/{len} {wide_msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        entries.enable_steady_tick(Duration::from_millis(120));
        Self {
            multi,
            entries,
            wait: Mutex::new(None),
        }
    }

    pub fn handle(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Processing { total, key, .. } => {
                if self.entries.length() != Some(total as u64) {
                    self.entries.set_length(total as u64);
                }
                self.entries.set_message(truncate(&key, 50));
            }
            ProgressEvent::Finished { .. } => {
                self.clear_wait();
                self.entries.inc(1);
            }
            ProgressEvent::RateLimitWait { remaining, total } => {
                let Ok(mut wait) = self.wait.lock() else {
                    return;
                };
                let bar = wait.get_or_insert_with(|| {
                    let bar = self.multi.add(ProgressBar::new(total.as_secs().max(1)));
                    bar.set_style(
                        ProgressStyle::with_template(
                            "  {spinner:.yellow} rate limited by dblp, retrying in {msg}",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                    );
                    bar
                });
                bar.set_position(total.saturating_sub(remaining).as_secs());
                bar.set_message(format!("{}s", remaining.as_secs_f64().ceil() as u64));
            }
            ProgressEvent::Persisted { what, path } => {
                tracing::debug!(what, path = %path.display(), "written");
            }
        }
    }

    fn clear_wait(&self) {
        if let Ok(mut wait) = self.wait.lock()
            && let Some(bar) = wait.take()
        {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }

    pub fn finish(&self) {
        self.clear_wait();
        self.entries.finish_and_clear();
    }
}

fn status_line(status: EntryStatus, count: usize, color: ColorMode) -> String {
    let label = format!("{}:", status.label());
    if !color.enabled() {
        return format!("  {label} {count}");
    }
    match status {
        EntryStatus::Updated => format!("  {} {count}", label.green()),
        EntryStatus::AlreadyFromDblp => format!("  {} {count}", label.cyan()),
        EntryStatus::NoHit | EntryStatus::NoMatch => format!("  {} {count}", label.yellow()),
        EntryStatus::Matched | EntryStatus::NotYetProcessed => {
            format!("  {} {count}", label.red())
        }
    }
}

/// Print per-status counts, request statistics and output locations.
pub fn print_summary(
    w: &mut dyn Write,
    summary: &RunSummary,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", "SUMMARY".bold())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "SUMMARY")?;
        writeln!(w, "{}", sep)?;
    }

    writeln!(w, "  Entries: {}", summary.total())?;
    for (status, count) in &summary.counts {
        writeln!(w, "{}", status_line(*status, *count, color))?;
    }
    writeln!(w)?;

    let requests = &summary.requests;
    let msg = format!(
        "dblp requests: {} sent, {} served from cache, {} rate limited, {} failed",
        requests.network_calls, requests.cache_hits, requests.rate_limited, requests.transport_errors
    );
    if color.enabled() {
        writeln!(w, "  {}", msg.dimmed())?;
    } else {
        writeln!(w, "  {}", msg)?;
    }
    writeln!(w)?;

    writeln!(w, "  Enriched bibliography: {}", summary.outputs.enriched.display())?;
    writeln!(w, "  Status report:         {}", summary.outputs.report.display())?;
    if summary.saved_formatted {
        writeln!(w, "  Formatted original:    {}", summary.outputs.formatted.display())?;
    }
    writeln!(w)?;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}
