use std::io::{self, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::builder::{BuildReport, ProgressEvent, ProgressSink};
use crate::result::{ComparisonReport, ResultInfo};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_build(result: &BuildReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_results(result: &ResultInfo) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_comparison(result: &ComparisonReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Terminal spinner fed by pipeline progress events.
pub struct SpinnerSink {
    bar: ProgressBar,
}

impl SpinnerSink {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for SpinnerSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for SpinnerSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => self
                .bar
                .println(format!("{} ({:.1}s)", event.message, elapsed.as_secs_f64())),
            None => self.bar.set_message(event.message),
        }
    }
}

pub fn print_build_summary(report: &BuildReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}spice library {}{reset}", report.library);
    for (stage, done) in &report.flags {
        let (mark, color) = if *done { ("done", green) } else { ("pending", yellow) };
        let label = stage.to_string();
        println!("{color}  {label:<28} {mark}{reset}");
    }
    let c = &report.counters;
    println!(
        "  genes={} transcripts={} proteins={} sequences={} fas_scored={}",
        c.gene_count,
        c.transcript_count,
        c.protein_count,
        c.collected_sequences_count,
        c.fas_scored_sequences_count
    );
    for stage in &report.healed {
        println!("{yellow}  re-opened {stage}: recorded state did not match the data{reset}");
    }
    if let Some(stage) = report.pending {
        println!("{yellow}  next: {stage}{reset}");
    }
}
