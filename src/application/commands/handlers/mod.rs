//! Command Handlers 实现
//!
//! 所有 CommandHandler 的具体实现

mod inference_handlers;
mod model_handlers;

pub use inference_handlers::*;
pub use model_handlers::*;
