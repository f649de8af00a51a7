pub mod actor;
pub mod beer;
pub mod event;
