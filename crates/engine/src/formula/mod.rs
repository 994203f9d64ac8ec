// Formula tokens, parsing and the function library

pub mod functions;
pub mod parser;
pub mod token;

pub use functions::{AreaResolver, FunctionLibrary, StandardLibrary};
pub use parser::parse_formula;
pub use token::{format_tokens, FunctionId, Op, Token};
