pub mod ai;
pub mod audit;
pub mod dispatcher;
pub mod domain;
pub mod memory_queue;
pub mod notify;
pub mod photo_analysis;
pub mod queue;
pub mod registry;
pub mod storage;
