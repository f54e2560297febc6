pub mod scanner;
pub mod token;

pub use scanner::{tokenize, Tokenizer, DEFAULT_KEYWORDS};
pub use token::{split_lines, Category, Span};
