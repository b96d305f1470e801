use sea_orm::entity::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::{
    big_integer, big_integer_null, boolean, double, integer, json_null, pk_auto, string,
    string_null, text_null, timestamp, timestamp_null,
};
use sea_orm_migration::sea_query::ForeignKeyAction as MigrationForeignKeyAction;
use sea_query::Expr;
use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum CallDirection {
    #[sea_orm(string_value = "outbound")]
    Outbound,
    #[sea_orm(string_value = "inbound")]
    Inbound,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum CallStatus {
    #[sea_orm(string_value = "initiated")]
    Initiated,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "no_answer")]
    NoAnswer,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl CallStatus {
    /// Calls that still hold a concurrency slot.
    pub fn in_flight() -> [CallStatus; 2] {
        [CallStatus::Initiated, CallStatus::InProgress]
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Initiated | CallStatus::InProgress)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "zv_call_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub user_id: i64,
    pub agent_id: i64,
    pub campaign_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    #[sea_orm(unique)]
    pub conversation_id: Option<String>,
    pub call_sid: Option<String>,
    pub duration_secs: i32,
    pub billable_secs: i32,
    pub plan_secs: i32,
    pub overage_secs: i32,
    pub charge: f64,
    pub usage_recorded: bool,
    pub transcript: Option<Json>,
    pub summary: Option<String>,
    pub outcome: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTimeUtc,
    pub ended_at: Option<DateTimeUtc>,
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
    #[sea_orm(
        belongs_to = "super::campaign::Entity",
        from = "Column::CampaignId",
        to = "super::campaign::Column::Id",
        on_delete = "SetNull",
        on_update = "Cascade"
    )]
    Campaign,
    #[sea_orm(
        belongs_to = "super::contact::Entity",
        from = "Column::ContactId",
        to = "super::contact::Column::Id",
        on_delete = "SetNull",
        on_update = "Cascade"
    )]
    Contact,
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
                    .col(big_integer_null(Column::CampaignId))
                    .col(big_integer_null(Column::ContactId))
                    .col(string(Column::Direction))
                    .col(string(Column::Status))
                    .col(string_null(Column::FromNumber))
                    .col(string_null(Column::ToNumber))
                    .col(string_null(Column::ConversationId))
                    .col(string_null(Column::CallSid))
                    .col(integer(Column::DurationSecs).default(0))
                    .col(integer(Column::BillableSecs).default(0))
                    .col(integer(Column::PlanSecs).default(0))
                    .col(integer(Column::OverageSecs).default(0))
                    .col(double(Column::Charge).default(0.0))
                    .col(boolean(Column::UsageRecorded).default(false))
                    .col(json_null(Column::Transcript))
                    .col(text_null(Column::Summary))
                    .col(string_null(Column::Outcome))
                    .col(text_null(Column::Error))
                    .col(timestamp(Column::StartedAt))
                    .col(timestamp_null(Column::EndedAt))
                    .col(timestamp(Column::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp(Column::UpdatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_zv_call_records_user")
                            .from(Entity, Column::UserId)
                            .to(super::user::Entity, super::user::Column::Id)
                            .on_delete(MigrationForeignKeyAction::Cascade)
                            .on_update(MigrationForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_zv_call_records_agent")
                            .from(Entity, Column::AgentId)
                            .to(super::agent::Entity, super::agent::Column::Id)
                            .on_delete(MigrationForeignKeyAction::Restrict)
                            .on_update(MigrationForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_zv_call_records_campaign")
                            .from(Entity, Column::CampaignId)
                            .to(super::campaign::Entity, super::campaign::Column::Id)
                            .on_delete(MigrationForeignKeyAction::SetNull)
                            .on_update(MigrationForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_zv_call_records_contact")
                            .from(Entity, Column::ContactId)
                            .to(super::contact::Entity, super::contact::Column::Id)
                            .on_delete(MigrationForeignKeyAction::SetNull)
                            .on_update(MigrationForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_zv_call_records_conversation_id")
                    .table(Entity)
                    .col(Column::ConversationId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_zv_call_records_call_sid")
                    .table(Entity)
                    .col(Column::CallSid)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_zv_call_records_campaign_status")
                    .table(Entity)
                    .col(Column::CampaignId)
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
