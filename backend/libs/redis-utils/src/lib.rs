//! Redis helpers shared by backend services.
//!
//! - [`RedisPool`]: connection bootstrap around a shared `ConnectionManager`
//! - [`lock`]: short-lived named locks used to serialize read-modify-write
//!   sequences across workers and instances

pub mod lock;
mod pool;

pub use lock::{
    with_lock, with_lock_observed, DistributedLock, InMemoryLock, LockError, LockOptions,
    LockToken, RedisLock,
};
pub use pool::{with_timeout, RedisPool, SharedConnectionManager, DEFAULT_REDIS_TIMEOUT};
