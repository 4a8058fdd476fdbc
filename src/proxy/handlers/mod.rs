// Handlers module - API endpoint handlers

pub mod completions;
pub mod status;
