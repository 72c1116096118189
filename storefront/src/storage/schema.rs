use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, EntityName, EntityTrait, Schema};
use tracing::{debug, info};

use crate::storage_model::{order, order_item, payment, product, tax_rate};

async fn create_table<E>(db: &DatabaseConnection, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let table_name = entity.table_name().to_string();
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();

    debug!("Creating table {}", table_name);
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// Create all storefront tables if they do not exist yet.
///
/// Parents are created before children so the foreign keys resolve.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    create_table(db, product::Entity).await?;
    create_table(db, tax_rate::Entity).await?;
    create_table(db, order::Entity).await?;
    create_table(db, order_item::Entity).await?;
    create_table(db, payment::Entity).await?;
    info!("Storefront schema ready");
    Ok(())
}
