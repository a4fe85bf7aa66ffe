//! `tollgate stages`: print the transition table.

use serde::Serialize;
use tollgate_engine::{transitions, Stage};

use crate::OutputFormat;

#[derive(Serialize)]
struct TableView {
    initial: Stage,
    terminal: Stage,
    transitions: Vec<Edges>,
}

#[derive(Serialize)]
struct Edges {
    from: Stage,
    to: &'static [Stage],
}

pub(crate) fn cmd_stages(output: OutputFormat) -> Result<(), String> {
    match output {
        OutputFormat::Json => {
            let view = TableView {
                initial: Stage::INITIAL,
                terminal: Stage::TERMINAL,
                transitions: Stage::ALL
                    .into_iter()
                    .map(|from| Edges {
                        from,
                        to: transitions::allowed_next(from),
                    })
                    .collect(),
            };
            crate::print_json(&view)
        }
        OutputFormat::Text => {
            for from in Stage::ALL {
                let next = transitions::allowed_next(from);
                if next.is_empty() {
                    println!("{from} (terminal)");
                    continue;
                }
                let next: Vec<&str> = next.iter().map(|s| s.as_str()).collect();
                println!("{from} -> {}", next.join(", "));
            }
            Ok(())
        }
    }
}
