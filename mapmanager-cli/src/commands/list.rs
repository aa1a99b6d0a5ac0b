//! `list` command.

use clap::{Args, ValueEnum};
use mapmanager::manager::ListKind;
use serde_json::Value;

use super::common::{format_country_row, open_manager, print_json};
use crate::error::CliError;
use crate::GlobalArgs;

/// Which country list to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Which {
    /// Countries installed and usable
    Available,
    /// Countries subscribed to
    Requested,
    /// Countries offered by the server
    #[default]
    Provided,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(value_enum, default_value_t = Which::Provided)]
    pub which: Which,

    /// Group countries by region
    #[arg(long)]
    pub tree: bool,

    /// Print JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(global: &GlobalArgs, args: ListArgs) -> Result<(), CliError> {
    let (_runner, manager) = open_manager(global, "list")?;

    let value = match (args.which, args.tree) {
        (Which::Available, false) => manager.available_countries_json(),
        (Which::Requested, false) => manager.requested_countries_json(),
        (Which::Provided, tree) => manager.provided_countries_json(tree),
        (which, true) => manager.state().countries_json(list_kind(which), true),
    };

    if args.json {
        return print_json(&value);
    }

    let lines = render(&value);
    if lines.is_empty() {
        if args.which == Which::Provided && !manager.check_provided_available() {
            println!("No feature list yet. Run `mapmanager refresh` first.");
        } else {
            println!("No countries.");
        }
        return Ok(());
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn list_kind(which: Which) -> ListKind {
    match which {
        Which::Available => ListKind::Available,
        Which::Requested => ListKind::Requested,
        Which::Provided => ListKind::Provided,
    }
}

/// Text lines for a flat or tree listing.
fn render(value: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(nodes) = value.as_array() {
        render_nodes(nodes, 0, &mut lines);
    }
    lines
}

fn render_nodes(nodes: &[Value], depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        match node.get("children").and_then(Value::as_array) {
            Some(children) => {
                lines.push(format!(
                    "{}{}",
                    indent,
                    node["name"].as_str().unwrap_or_default()
                ));
                render_nodes(children, depth + 1, lines);
            }
            None => lines.push(format!("{}{}", indent, format_country_row(node))),
        }
    }
}
