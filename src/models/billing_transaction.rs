use sea_orm::entity::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::{
    big_integer, big_integer_null, double, double_null, pk_auto, string, string_null, timestamp,
};
use sea_orm_migration::sea_query::ForeignKeyAction as MigrationForeignKeyAction;
use sea_query::Expr;
use serde::{Deserialize, Serialize};

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum TransactionKind {
    #[sea_orm(string_value = "topup")]
    Topup,
    #[sea_orm(string_value = "plan_purchase")]
    PlanPurchase,
    #[sea_orm(string_value = "call_charge")]
    CallCharge,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum TransactionStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "zv_billing_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub user_id: i64,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub amount: f64,
    pub currency: String,
    #[sea_orm(unique)]
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub plan_key: Option<String>,
    pub call_id: Option<i64>,
    pub description: Option<String>,
    /// Wallet balance right after this transaction was applied.
    pub balance_after: Option<f64>,
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
                    .col(string(Column::Kind))
                    .col(string(Column::Status))
                    .col(double(Column::Amount).default(0.0))
                    .col(string(Column::Currency).default("INR"))
                    .col(string_null(Column::GatewayOrderId))
                    .col(string_null(Column::GatewayPaymentId))
                    .col(string_null(Column::PlanKey))
                    .col(big_integer_null(Column::CallId))
                    .col(string_null(Column::Description))
                    .col(double_null(Column::BalanceAfter))
                    .col(timestamp(Column::CreatedAt).default(Expr::current_timestamp()))
                    .col(timestamp(Column::UpdatedAt).default(Expr::current_timestamp()))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_zv_billing_transactions_user")
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
                    .name("idx_zv_billing_transactions_order")
                    .table(Entity)
                    .col(Column::GatewayOrderId)
                    .unique()
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
