pub mod database;
pub mod dedup;
pub mod health;
pub mod memory;
pub mod queue;
pub mod rbmq;
