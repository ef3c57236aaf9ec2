pub mod config;
pub mod draft;
pub mod error;
pub mod events;
pub mod gesture;
pub mod order;
pub mod photo;
pub mod processing;
pub mod scan;
pub mod session;
pub mod tasks {
    pub mod autosave;
    pub mod baker;
    pub mod export_queue;
    pub mod exporter;
}
