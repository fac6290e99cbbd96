pub mod entities;
mod rows;
mod seaorm;
mod sink;
mod storage;

pub use rows::{
    AuthKeyInput, AuthKeyRow, BindingInput, BindingRow, ChatLogDraft, ChatLogFilter, ChatLogPage,
    ChatLogRow, LogStatus, ModelInput, ModelRow, ProviderInput, ProviderRow,
};
pub use seaorm::SeaOrmStorage;
pub use sink::{LogEntry, LogSink};
pub use storage::{Storage, StorageError, StorageResult};
