use super::Outcome;
use crate::cli::QueryArg;
use crate::input::read_query;
use anyhow::Result;
use quarry_engine::Converter;

pub fn execute(converter: &Converter, query: &QueryArg) -> Result<Outcome> {
    let text = read_query(query)?;
    let report = converter.validate(&text, query.from);
    Outcome::json(&report, report.valid)
}
