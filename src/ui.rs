use console::{style, Term};

use crate::app::Outcome;

/// Human-readable command summary on stderr, so stdout stays pure JSON.
pub struct TerminalUI {
    term: Term,
    quiet: bool,
}

impl TerminalUI {
    pub fn new(quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            quiet,
        }
    }

    pub fn print_outcome(&self, outcome: &Outcome) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        let (icon, headline) = if outcome.success {
            (style("✓").green().bold(), style(&outcome.headline).white().bold())
        } else {
            (style("✗").red().bold(), style(&outcome.headline).red().bold())
        };
        self.term.write_line(&format!(
            "    {} {} {}",
            style("▶").cyan(),
            style(outcome.command).dim(),
            icon
        ))?;
        self.term.write_line(&format!("    {}", headline))?;

        let width = outcome
            .details
            .iter()
            .map(|(label, _)| label.len())
            .max()
            .unwrap_or(0);
        for (i, (label, value)) in outcome.details.iter().enumerate() {
            let branch = if i + 1 == outcome.details.len() { "└─" } else { "├─" };
            self.term.write_line(&format!(
                "    {} {:<width$}  {}",
                style(branch).dim(),
                label,
                style(value).white().bold(),
                width = width
            ))?;
        }
        Ok(())
    }
}
