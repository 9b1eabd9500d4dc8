pub mod evaluation;
pub mod record;
pub mod report;

pub use evaluation::*;
pub use record::*;
pub use report::*;
