pub(crate) mod app_paths;
pub(crate) mod git_config;
pub mod settings;
