pub mod backend;
pub mod gemini;
pub mod openai;
pub mod prompts;
pub mod retry;
pub mod validation;

pub use backend::*;
pub use gemini::*;
pub use openai::*;
pub use prompts::*;
pub use retry::*;
pub use validation::*;
