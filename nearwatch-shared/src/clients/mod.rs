pub mod db;
pub mod email;
pub mod queue;
pub mod rabbitmq;
