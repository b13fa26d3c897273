use super::Outcome;
use crate::cli::QueryArg;
use crate::input::read_query;
use anyhow::Result;
use quarry_engine::Converter;
use quarry_syntax::QueryFormat;
use tracing::info;

pub fn execute(converter: &Converter, query: &QueryArg, to: QueryFormat) -> Result<Outcome> {
    let text = read_query(query)?;
    let translated = converter.convert(&text, query.from, to, &converter.options())?;
    info!(to = to.id(), "translated query");
    Ok(Outcome::ok(translated))
}
