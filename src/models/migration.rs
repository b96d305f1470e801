use sea_orm_migration::{MigrationTrait, MigratorTrait};
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(super::user::Migration),
            Box::new(super::agent::Migration),
            Box::new(super::campaign::Migration),
            Box::new(super::contact::Migration),
            Box::new(super::call_record::Migration),
            Box::new(super::billing_transaction::Migration),
            Box::new(super::ticket::Migration),
            Box::new(super::ticket_message::Migration),
        ]
    }
}
