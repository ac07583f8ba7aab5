pub mod errors;
pub mod orchestrate;
pub mod randomize;
pub mod settings;
pub mod spoiler_log;
pub mod traverse;
