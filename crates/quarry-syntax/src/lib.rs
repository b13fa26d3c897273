//! Query text in and out of the action tree.
//!
//! - [`detect`] scores text against every known query language
//! - [`grammar`] holds one chumsky grammar per input format, producing a CST
//! - [`bridge`] walks a CST into an [`Action`](quarry_core::Action) tree
//! - [`generate`] renders an action tree back to text via output grammars
//! - [`template`] is the small logic-light template engine those grammars use

pub mod bridge;
pub mod cst;
pub mod detect;
pub mod format;
pub mod generate;
pub mod grammar;
pub mod template;

pub use bridge::{BuildContext, ParseOutcome, ParserBridge};
pub use cst::{SyntaxNode, TokenType};
pub use detect::{detect_query_format, Detection, FormatDetector, DEFAULT_CONFIDENCE_THRESHOLD};
pub use format::QueryFormat;
pub use generate::{output_formats, Generator, OutputGrammar};
pub use grammar::{Grammar, GrammarRegistry};
pub use template::{Template, TemplateEngine, TemplateError};
