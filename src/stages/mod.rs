pub mod stage0_normalize;
pub mod stage1_transcribe;
pub mod stage2_evaluate;
pub mod stage3_render;

pub use stage0_normalize::*;
pub use stage1_transcribe::*;
pub use stage2_evaluate::*;
pub use stage3_render::*;
