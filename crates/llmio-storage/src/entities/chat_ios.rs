use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "chat_ios")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub chat_log_id: i64,
    pub request: String,
    pub response: String,
    pub created_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "chat_log_id", to = "id", on_delete = "Cascade")]
    pub chat_log: HasOne<super::chat_logs::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
