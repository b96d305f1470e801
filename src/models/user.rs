use sea_orm::entity::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::{
    big_integer, boolean, double, pk_auto, string, string_null, string_uniq, timestamp,
    timestamp_null,
};
use sea_query::Expr;
use serde::Serialize;

/// A tenant account. Plan usage and the prepaid wallet live on the account row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "zv_users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    #[sea_orm(unique)]
    pub email: String,
    #[sea_orm(unique)]
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: Option<String>,
    pub company: Option<String>,
    pub is_active: bool,
    pub is_staff: bool,
    pub plan: String,
    pub plan_period_start: DateTimeUtc,
    pub plan_period_end: DateTimeUtc,
    pub seconds_used: i64,
    pub wallet_balance: f64,
    pub last_login_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::agent::Entity")]
    Agent,
    #[sea_orm(has_many = "super::campaign::Entity")]
    Campaign,
}

impl Related<super::agent::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Agent.def()
    }
}

impl Related<super::campaign::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Campaign.def()
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
                    .col(string_uniq(Column::Email))
                    .col(string_uniq(Column::Username))
                    .col(string(Column::PasswordHash))
                    .col(string_null(Column::FullName))
                    .col(string_null(Column::Company))
                    .col(boolean(Column::IsActive).default(true))
                    .col(boolean(Column::IsStaff).default(false))
                    .col(string(Column::Plan).default("trial"))
                    .col(timestamp(Column::PlanPeriodStart).default(Expr::current_timestamp()))
                    .col(timestamp(Column::PlanPeriodEnd).default(Expr::current_timestamp()))
                    .col(big_integer(Column::SecondsUsed).default(0))
                    .col(double(Column::WalletBalance).default(0.0))
                    .col(timestamp_null(Column::LastLoginAt))
                    .col(timestamp(Column::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp(Column::UpdatedAt).default(Expr::current_timestamp()))
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
