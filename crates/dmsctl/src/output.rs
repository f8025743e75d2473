//! Output formatting - ASCII-only terminal output
//!
//! Reports are rendered by the engine; this module only adds color when
//! stdout is a terminal.

use crate::cli::OutputFormat;
use dms_doctor::{format_markdown, format_text, Report, RuleSet};
use owo_colors::OwoColorize;
use std::io::IsTerminal;

/// Color only for an interactive stdout without NO_COLOR
pub fn use_color() -> bool {
    std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

/// Render a report in the requested format
pub fn render_report(report: &Report, format: OutputFormat, color: bool) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Text if color => colorize_text(&format_text(report)),
        OutputFormat::Text => format_text(report),
        OutputFormat::Markdown => format_markdown(report),
        OutputFormat::Json => {
            let mut json = report.to_json()?;
            json.push('\n');
            json
        }
    })
}

/// Highlight headers, confidence bands and the verdict line
pub fn colorize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 256);
    for line in text.lines() {
        let styled = if is_header(line) {
            line.bold().to_string()
        } else if line.contains("[HIGH]") {
            line.bright_red().to_string()
        } else if line.contains("[MEDIUM]") {
            line.yellow().to_string()
        } else if line.contains("[LOW]") {
            line.dimmed().to_string()
        } else if line.trim_start().starts_with("Verdict: INCONCLUSIVE") {
            line.yellow().to_string()
        } else if line.trim_start().starts_with("Fix:") {
            line.green().to_string()
        } else {
            line.to_string()
        };
        out.push_str(&styled);
        out.push('\n');
    }
    out
}

fn is_header(line: &str) -> bool {
    !line.is_empty()
        && !line.starts_with(' ')
        && line.chars().all(|c| c.is_ascii_uppercase() || c == ' ' || c == '=')
}

/// Causes with the rules that point at them
pub fn render_rules(rule_set: &RuleSet, color: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "RULES ({} rules, {} causes)\n\n",
        rule_set.len(),
        rule_set.causes().count()
    ));

    for cause in rule_set.causes() {
        let heading = format!("{} - {}", cause.id, cause.title);
        if color {
            out.push_str(&heading.bold().to_string());
        } else {
            out.push_str(&heading);
        }
        if !cause.category.is_empty() {
            out.push_str(&format!(" [{}]", cause.category));
        }
        out.push('\n');

        let rules: Vec<_> = rule_set.rules().iter().filter(|r| r.cause_id == cause.id).collect();
        if rules.is_empty() {
            out.push_str("  (no rules)\n");
        }
        for rule in rules {
            let id = format!("{:<40}", rule.id);
            let id = if color { id.cyan().to_string() } else { id };
            out.push_str(&format!(
                "  {} {:.2}  {} ({} slots)\n",
                id,
                rule.base_confidence,
                rule.name,
                rule.slots.len()
            ));
        }
        out.push('\n');
    }
    out
}

/// Display an error on stderr
pub fn display_error(message: &str) {
    if std::io::stderr().is_terminal() {
        eprintln!("[ERROR] {}", message.red());
    } else {
        eprintln!("[ERROR] {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms_doctor::{CauseInfo, EvidenceSlot, Condition, Rule};

    #[test]
    fn test_header_detection() {
        assert!(is_header("DIAGNOSTIC REPORT"));
        assert!(is_header("================="));
        assert!(!is_header("  Task: t-1"));
        assert!(!is_header("Most likely cause"));
    }

    #[test]
    fn test_colorize_keeps_every_line() {
        let text = "SUMMARY\n  Verdict: INCONCLUSIVE\n  1. [HIGH] Source down (90%)\n";
        let colored = colorize_text(text);
        assert_eq!(colored.lines().count(), 3);
        assert!(colored.contains("Source down"));
    }

    #[test]
    fn test_render_rules_plain() {
        let rule_set = RuleSet::new(
            vec![CauseInfo::new("disk_full", "Disk full", "", "capacity")],
            vec![Rule::new("metric.disk", "Low free storage", "disk_full", 0.7)
                .slot(EvidenceSlot::metric("FreeStorageSpace", Condition::below(1.0)))],
        )
        .unwrap();
        let text = render_rules(&rule_set, false);
        assert!(text.starts_with("RULES (1 rules, 1 causes)"));
        assert!(text.contains("disk_full - Disk full [capacity]"));
        assert!(text.contains("metric.disk"));
        assert!(text.contains("0.70  Low free storage (1 slots)"));
    }
}
