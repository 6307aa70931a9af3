//! Background Tasks Module
//!
//! Contains background tasks that run periodically alongside a shared cache.
//!
//! # Tasks
//! - Retention sweep: removes expired cache entries at configured intervals

mod sweep;

pub use sweep::spawn_sweep_task;
