//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod chat_context;
mod engine;
mod inference;
mod model_repository;
mod task_queue;
mod transport;

pub use chat_context::{history_hash, version_hash, ChatContextError, ChatContextPort};
pub use engine::{
    ChatSession, ContextParams, EngineContext, EngineError, EngineGrammar, EngineModel,
    EnginePort, EngineState, GenerationRequest, ModelParams,
};
pub use inference::{
    ContextRequest, ExecuteOutcome, ExecuteRequest, InferencePort, SessionError, SessionStatus,
};
pub use model_repository::{GcReport, ModelFiles, ModelRepositoryPort, RepositoryError};
pub use task_queue::{
    TaskContext, TaskError, TaskExecutor, TaskQueuePort, TaskReporter, TaskTicket,
};
pub use transport::{Listener, Transport, TransportError};
