use sqlx::postgres::PgPoolOptions;
use url::Url;

pub use seeder::seed_system_account;

mod seeder;

pub type Database = sqlx::Pool<sqlx::Postgres>;
pub(crate) type Transaction = sqlx::Transaction<'static, sqlx::Postgres>;

pub async fn connect(url: &Url, max_connections: u32) -> Result<Database, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url.as_str())
        .await
}

#[derive(Debug, sqlx::FromRow, Default)]
pub(crate) struct SumRow<T> {
    pub sum: T,
}
