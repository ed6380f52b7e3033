pub mod api;
pub mod realtime;
pub mod static_files;
