use sea_orm::entity::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::{
    big_integer, boolean, pk_auto, string, string_null, text_null, timestamp,
};
use sea_orm_migration::sea_query::ForeignKeyAction as MigrationForeignKeyAction;
use sea_query::Expr;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "zv_agents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    /// Identifier assigned by the voice provider once the agent is mirrored.
    pub provider_agent_id: Option<String>,
    pub voice_id: Option<String>,
    pub language: String,
    pub first_message: Option<String>,
    pub system_prompt: Option<String>,
    pub llm: Option<String>,
    /// Provider-side phone number used as caller id for outbound calls.
    pub phone_number_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn can_place_calls(&self) -> bool {
        self.is_active
            && self.provider_agent_id.as_deref().is_some_and(|v| !v.is_empty())
            && self.phone_number_id.as_deref().is_some_and(|v| !v.is_empty())
    }
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entity)
                    .if_not_exists()
                    .col(pk_auto(Column::Id))
                    .col(big_integer(Column::UserId))
                    .col(string(Column::Name))
                    .col(string_null(Column::ProviderAgentId))
                    .col(string_null(Column::VoiceId))
                    .col(string(Column::Language).default("en"))
                    .col(text_null(Column::FirstMessage))
                    .col(text_null(Column::SystemPrompt))
                    .col(string_null(Column::Llm))
                    .col(string_null(Column::PhoneNumberId))
                    .col(boolean(Column::IsActive).default(true))
                    .col(timestamp(Column::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp(Column::UpdatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_zv_agents_user")
                            .from(Entity, Column::UserId)
                            .to(super::user::Entity, super::user::Column::Id)
                            .on_delete(MigrationForeignKeyAction::Cascade)
                            .on_update(MigrationForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_zv_agents_provider_agent_id")
                    .table(Entity)
                    .col(Column::ProviderAgentId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Entity).to_owned())
            .await
    }
}
