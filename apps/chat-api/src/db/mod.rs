pub mod blocked_ips;
pub mod comments;
pub mod kv;
pub mod pool;
pub mod schema;
