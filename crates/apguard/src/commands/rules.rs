//! Policy rule checks.

use serde::Serialize;
use tabled::Tabled;

use apguard_core::{PolicyRule, is_forwardable};

use crate::cli::{GlobalOpts, RulesArgs, RulesCommand};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct RuleVerdict {
    pid: Option<String>,
    #[serde(rename = "type")]
    rule_type: Option<String>,
    target: Option<String>,
    disabled: bool,
    forwardable: bool,
}

impl From<&PolicyRule> for RuleVerdict {
    fn from(rule: &PolicyRule) -> Self {
        Self {
            pid: rule.pid(),
            rule_type: rule.rule_type.clone(),
            target: rule.target.clone(),
            disabled: rule.is_disabled(),
            forwardable: rule.pid().is_some() && is_forwardable(rule),
        }
    }
}

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "Type")]
    rule_type: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Disabled")]
    disabled: String,
    #[tabled(rename = "Forwardable")]
    forwardable: String,
}

fn yes_no(flag: bool) -> String {
    if flag { "yes".into() } else { "no".into() }
}

impl From<&RuleVerdict> for RuleRow {
    fn from(v: &RuleVerdict) -> Self {
        let dash = || "-".to_owned();
        Self {
            pid: v.pid.clone().unwrap_or_else(dash),
            rule_type: v.rule_type.clone().unwrap_or_else(dash),
            target: v.target.clone().unwrap_or_else(dash),
            disabled: yes_no(v.disabled),
            forwardable: yes_no(v.forwardable),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &RulesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match &args.command {
        RulesCommand::Check { file } => {
            let raw = std::fs::read_to_string(file)?;
            let rules: Vec<PolicyRule> = serde_json::from_str(&raw)?;
            let verdicts: Vec<RuleVerdict> = rules.iter().map(RuleVerdict::from).collect();
            println!(
                "{}",
                output::render_list(global.output, &verdicts, |v| RuleRow::from(v))?
            );
            Ok(())
        }
    }
}
