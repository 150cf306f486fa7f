use std::fmt::Write;
use std::io::{self, IsTerminal};

use console::Style;
use stratus_domain::{ArtifactAction, ArtifactChange, ArtifactKind, RunReport, Status};

mod error;
mod options;
mod redaction;

pub use error::ReportError;
pub use options::{ColorChoice, OutputFormat, RenderOptions};
pub use redaction::redact_sensitive;

/// Render an operation report in the requested output format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_report(
    report: &RunReport,
    format: OutputFormat,
    options: &RenderOptions,
) -> std::result::Result<String, ReportError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|source| ReportError::JsonSerialize { source }),
        OutputFormat::Text => Ok(render_report_text(report, options)),
    }
}

// ---------------------------------------------------------------------------
// Report text
// ---------------------------------------------------------------------------

fn render_report_text(report: &RunReport, options: &RenderOptions) -> String {
    let mut output = String::new();
    let style = TextStyle::new(options.color);

    append_header(&mut output, report, &style);
    let _ = writeln!(
        output,
        "  {} {}",
        style.status(report.status),
        style.dim(&format!("(phase: {})", report.phase))
    );

    append_warnings(&mut output, &report.warnings, &style);

    let (visible, quiet): (Vec<&ArtifactChange>, Vec<&ArtifactChange>) = report
        .artifacts
        .iter()
        .partition(|change| options.verbose || is_persistent(change.action));
    if !visible.is_empty() {
        let _ = writeln!(output);
        for change in &visible {
            append_artifact_line(&mut output, change, &style);
        }
    }
    if !quiet.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "  {}",
            style.dim(&format!("{} staged file(s) handled", quiet.len()))
        );
    }

    if let Some(backend) = &report.output {
        append_backend_output(&mut output, backend, options.verbose, &style);
    }

    let _ = writeln!(output);
    let tally = ArtifactTally::from_changes(&report.artifacts);
    let _ = writeln!(output, "{}", tally.format(&style));

    output
}

fn append_header(output: &mut String, report: &RunReport, style: &TextStyle) {
    let _ = writeln!(
        output,
        "{} {}",
        style.header_command(&report.operation.to_string()),
        style.header_target(report.deployment.as_str())
    );
}

fn append_warnings(output: &mut String, warnings: &[String], style: &TextStyle) {
    if warnings.is_empty() {
        return;
    }
    let _ = writeln!(output);
    for warning in warnings {
        let _ = writeln!(output, "  {} {warning}", style.warn_prefix("warn:"));
    }
}

fn append_artifact_line(output: &mut String, change: &ArtifactChange, style: &TextStyle) {
    let (symbol, label) = action_symbol_and_label(change.action, style);
    let path = change.path.file_name().map_or_else(
        || change.path.display().to_string(),
        |name| name.to_string_lossy().to_string(),
    );
    let _ = writeln!(
        output,
        "  {symbol} {label}{} {}",
        style.primary_text(&path),
        style.dim(&format!("({})", kind_label(&change.kind)))
    );
}

/// Backend output is summarized unless verbose; failures carry it in the error.
fn append_backend_output(output: &mut String, backend: &str, verbose: bool, style: &TextStyle) {
    let lines: Vec<&str> = backend.lines().collect();
    let _ = writeln!(output);
    if !verbose {
        let last = lines
            .iter()
            .rev()
            .find(|line| !line.trim().is_empty())
            .copied()
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "  {} {}",
            style.dim(&format!("backend ({} lines):", lines.len())),
            last.trim()
        );
        return;
    }
    let _ = writeln!(output, "  {}", style.dim("backend output:"));
    for line in lines {
        let _ = writeln!(output, "    {line}");
    }
}

const fn is_persistent(action: ArtifactAction) -> bool {
    !matches!(action, ArtifactAction::Staged | ArtifactAction::Discarded)
}

fn action_symbol_and_label(action: ArtifactAction, style: &TextStyle) -> (String, String) {
    match action {
        ArtifactAction::Written => (
            style.add_symbol("+"),
            TextStyle::pad_label(&style.add_label("written")),
        ),
        ArtifactAction::Promoted => (
            style.change_symbol("~"),
            TextStyle::pad_label(&style.change_label("promoted")),
        ),
        ArtifactAction::Removed => (
            style.remove_symbol("-"),
            TextStyle::pad_label(&style.remove_label("removed")),
        ),
        ArtifactAction::Staged => (
            style.noop_symbol("."),
            TextStyle::pad_label(&style.noop_label("staged")),
        ),
        ArtifactAction::Discarded => (
            style.noop_symbol("."),
            TextStyle::pad_label(&style.noop_label("discarded")),
        ),
    }
}

fn kind_label(kind: &ArtifactKind) -> String {
    match kind {
        ArtifactKind::Graph => "resource graph".to_string(),
        ArtifactKind::Variables => "instance variables".to_string(),
        ArtifactKind::Bootstrap { node } => format!("bootstrap for {node}"),
        ArtifactKind::ServiceAccount => "service account".to_string(),
        ArtifactKind::BackendState => "backend state".to_string(),
        ArtifactKind::PhaseRecord => "phase record".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Artifact tally
// ---------------------------------------------------------------------------

struct ArtifactTally {
    written: usize,
    promoted: usize,
    removed: usize,
}

impl ArtifactTally {
    fn from_changes(changes: &[ArtifactChange]) -> Self {
        let mut tally = Self {
            written: 0,
            promoted: 0,
            removed: 0,
        };
        for change in changes {
            match change.action {
                ArtifactAction::Written => tally.written += 1,
                ArtifactAction::Promoted => tally.promoted += 1,
                ArtifactAction::Removed => tally.removed += 1,
                ArtifactAction::Staged | ArtifactAction::Discarded => {}
            }
        }
        tally
    }

    fn format(&self, style: &TextStyle) -> String {
        let mut parts = Vec::new();
        if self.written > 0 {
            parts.push(style.add_label(&format!("{} written", self.written)));
        }
        if self.promoted > 0 {
            parts.push(style.change_label(&format!("{} promoted", self.promoted)));
        }
        if self.removed > 0 {
            parts.push(style.remove_label(&format!("{} removed", self.removed)));
        }
        if parts.is_empty() {
            format!("{} unchanged", style.tally_label("Artifacts:"))
        } else {
            format!("{} {}", style.tally_label("Artifacts:"), parts.join(", "))
        }
    }
}

// ---------------------------------------------------------------------------
// TextStyle
// ---------------------------------------------------------------------------

const LABEL_WIDTH: usize = 12;

#[derive(Debug, Clone)]
struct TextStyle {
    color_enabled: bool,
    add_style: Style,
    change_style: Style,
    remove_style: Style,
    noop_style: Style,
    skipped_style: Style,
    primary_style: Style,
    dim_style: Style,
    header_cmd_style: Style,
    header_target_style: Style,
    warn_prefix_style: Style,
    tally_label_style: Style,
}

impl TextStyle {
    fn new(choice: ColorChoice) -> Self {
        Self {
            color_enabled: should_color(choice),
            add_style: Style::new().green(),
            change_style: Style::new().cyan(),
            remove_style: Style::new().red(),
            noop_style: Style::new().dim(),
            skipped_style: Style::new().yellow(),
            primary_style: Style::new().white(),
            dim_style: Style::new().dim(),
            header_cmd_style: Style::new().white().bold(),
            header_target_style: Style::new().dim(),
            warn_prefix_style: Style::new().yellow().bold(),
            tally_label_style: Style::new().white().bold(),
        }
    }

    fn paint<T: std::fmt::Display>(&self, style: &Style, text: T) -> String {
        // `should_color` already decided; console's own TTY check must not veto it.
        if self.color_enabled {
            style.clone().force_styling(true).apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn pad_label(painted: &str) -> String {
        let visible_len = console::measure_text_width(painted);
        if visible_len < LABEL_WIDTH {
            format!("{painted}{}", " ".repeat(LABEL_WIDTH - visible_len))
        } else {
            format!("{painted} ")
        }
    }

    fn status(&self, status: Status) -> String {
        let style = match status {
            Status::Skipped | Status::DryRun => &self.skipped_style,
            Status::Undeployed | Status::UpdatedUndeployed => &self.remove_style,
            Status::UpdatedNothing | Status::Init => &self.noop_style,
            _ => &self.add_style,
        };
        self.paint(&style.clone().bold(), status.label())
    }

    fn add_symbol(&self, s: &str) -> String {
        self.paint(&self.add_style.clone().bold(), s)
    }
    fn change_symbol(&self, s: &str) -> String {
        self.paint(&self.change_style.clone().bold(), s)
    }
    fn remove_symbol(&self, s: &str) -> String {
        self.paint(&self.remove_style.clone().bold(), s)
    }
    fn noop_symbol(&self, s: &str) -> String {
        self.paint(&self.noop_style, s)
    }

    fn add_label(&self, s: &str) -> String {
        self.paint(&self.add_style, s)
    }
    fn change_label(&self, s: &str) -> String {
        self.paint(&self.change_style, s)
    }
    fn remove_label(&self, s: &str) -> String {
        self.paint(&self.remove_style, s)
    }
    fn noop_label(&self, s: &str) -> String {
        self.paint(&self.noop_style, s)
    }

    fn primary_text(&self, s: &str) -> String {
        self.paint(&self.primary_style, s)
    }
    fn dim(&self, s: &str) -> String {
        self.paint(&self.dim_style, s)
    }

    fn header_command(&self, s: &str) -> String {
        self.paint(&self.header_cmd_style, s)
    }
    fn header_target(&self, s: &str) -> String {
        self.paint(&self.header_target_style, s)
    }

    fn warn_prefix(&self, s: &str) -> String {
        self.paint(&self.warn_prefix_style, s)
    }

    fn tally_label(&self, s: &str) -> String {
        self.paint(&self.tally_label_style, s)
    }
}

fn should_color(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stdout().is_terminal(),
    }
}

#[cfg(test)]
mod tests;
