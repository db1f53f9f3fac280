pub mod effects;
pub mod models;
pub mod settings;
