use diesel_async::pooled_connection::deadpool::{BuildError, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

pub type DbPool = Pool<AsyncPgConnection>;

/// Connections reserved for the comment log and block list.
const MAX_POOL_SIZE: usize = 16;

/// Build the Postgres pool backing the durable comment log.
///
/// Connections are opened lazily; the first failing query surfaces as a
/// storage error on the request that issued it.
pub fn connect(database_url: &str) -> Result<DbPool, BuildError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager).max_size(MAX_POOL_SIZE).build()?;

    tracing::info!(max_size = MAX_POOL_SIZE, "comment database pool created");

    Ok(pool)
}
