pub mod auth_keys;
pub mod chat_ios;
pub mod chat_logs;
pub mod configs;
pub mod model_providers;
pub mod models;
pub mod providers;

pub use auth_keys::Entity as AuthKeys;
pub use chat_ios::Entity as ChatIos;
pub use chat_logs::Entity as ChatLogs;
pub use configs::Entity as Configs;
pub use model_providers::Entity as ModelProviders;
pub use models::Entity as Models;
pub use providers::Entity as Providers;
