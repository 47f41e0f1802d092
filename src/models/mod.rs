pub mod fault;
pub mod health;
pub mod message;
pub mod producer;
pub mod record;
pub mod response;
pub mod retry;
