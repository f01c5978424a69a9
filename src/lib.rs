pub mod config;
pub mod corruptor;
pub mod records;
pub mod recovery;
pub mod storage;
pub mod transport;
pub mod types;
pub mod utils;
