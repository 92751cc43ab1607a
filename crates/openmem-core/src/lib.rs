mod path;
mod redact;
mod token;

pub use path::*;
pub use redact::*;
pub use token::*;
