pub mod activemq;
pub mod db;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
