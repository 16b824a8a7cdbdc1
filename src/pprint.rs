use itertools::Itertools;
use prettytable::{self, format, row, Cell, Row};

use crate::compilation::TuningConfiguration;
use crate::utils::Bracketed;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PrintMode {
    #[default]
    Summary,
    /// Also print every rendered configuration of each candidate.
    Full,
}

/// Builds a table with one row per candidate, in the order given.
pub fn candidate_table(candidates: &[Vec<TuningConfiguration>], mode: PrintMode) -> prettytable::Table {
    let mut table = prettytable::Table::new();
    let mut titles = row![
        "",
        "Pipeline",
        "Workgroup",
        "Reduction",
        "Threads",
        "Subgroup",
        "Intrinsic",
        "Waves",
        "Options"
    ];
    if mode == PrintMode::Full {
        titles.add_cell(Cell::new("Configuration"));
    }
    table.set_titles(titles);

    for (i, candidate) in candidates.iter().enumerate() {
        let mut r = match candidate.iter().find_map(|c| c.compilation_info()) {
            Some(info) => {
                let lowering = &info.lowering_config;
                let translation = &info.translation_info;
                let intrinsic = lowering
                    .mma_kind
                    .map_or_else(|| String::from("-"), |m| m.to_string());
                row![
                    i,
                    translation.pipeline,
                    Bracketed(&lowering.workgroup),
                    Bracketed(&lowering.reduction),
                    Bracketed(&translation.workgroup_size),
                    translation.subgroup_size,
                    intrinsic,
                    translation.waves_per_eu,
                    translation.pipeline_options
                ]
            }
            None => {
                let mut r = Row::new(vec![Cell::new(&i.to_string())]);
                for _ in 0..8 {
                    r.add_cell(Cell::new("-"));
                }
                r
            }
        };
        if mode == PrintMode::Full {
            let rendered = candidate
                .iter()
                .map(|c| format!("{}: {}", c.name(), c.configuration))
                .join("\n");
            r.add_cell(Cell::new(&rendered));
        }
        table.add_row(r);
    }

    let format = format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build();
    table.set_format(format);
    table
}

pub fn pprint(candidates: &[Vec<TuningConfiguration>], mode: PrintMode) {
    candidate_table(candidates, mode).printstd();
}
