use sea_orm::entity::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::{
    big_integer, integer, pk_auto, string, text_null, timestamp, timestamp_null,
};
use sea_orm_migration::sea_query::ForeignKeyAction as MigrationForeignKeyAction;
use sea_query::Expr;
use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum CampaignStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "paused")]
    Paused,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "zv_campaigns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub user_id: i64,
    pub agent_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: CampaignStatus,
    pub concurrency_limit: i32,
    pub scheduled_at: Option<DateTimeUtc>,
    pub started_at: Option<DateTimeUtc>,
    pub paused_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
    pub cancelled_at: Option<DateTimeUtc>,
    pub total_contacts: i32,
    pub calls_placed: i32,
    pub completed_calls: i32,
    pub failed_calls: i32,
    pub last_error: Option<String>,
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
    #[sea_orm(
        belongs_to = "super::agent::Entity",
        from = "Column::AgentId",
        to = "super::agent::Column::Id",
        on_delete = "Restrict",
        on_update = "Cascade"
    )]
    Agent,
    #[sea_orm(has_many = "super::contact::Entity")]
    Contact,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::agent::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Agent.def()
    }
}

impl Related<super::contact::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contact.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

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
                    .col(big_integer(Column::AgentId))
                    .col(string(Column::Name))
                    .col(text_null(Column::Description))
                    .col(string(Column::Status).default("draft"))
                    .col(integer(Column::ConcurrencyLimit).default(1))
                    .col(timestamp_null(Column::ScheduledAt))
                    .col(timestamp_null(Column::StartedAt))
                    .col(timestamp_null(Column::PausedAt))
                    .col(timestamp_null(Column::CompletedAt))
                    .col(timestamp_null(Column::CancelledAt))
                    .col(integer(Column::TotalContacts).default(0))
                    .col(integer(Column::CallsPlaced).default(0))
                    .col(integer(Column::CompletedCalls).default(0))
                    .col(integer(Column::FailedCalls).default(0))
                    .col(text_null(Column::LastError))
                    .col(timestamp(Column::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp(Column::UpdatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_zv_campaigns_user")
                            .from(Entity, Column::UserId)
                            .to(super::user::Entity, super::user::Column::Id)
                            .on_delete(MigrationForeignKeyAction::Cascade)
                            .on_update(MigrationForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_zv_campaigns_agent")
                            .from(Entity, Column::AgentId)
                            .to(super::agent::Entity, super::agent::Column::Id)
                            .on_delete(MigrationForeignKeyAction::Restrict)
                            .on_update(MigrationForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_zv_campaigns_user_status")
                    .table(Entity)
                    .col(Column::UserId)
                    .col(Column::Status)
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
