pub mod analysis;
pub mod job;
pub mod payload;
pub mod photo;
pub mod violation;
