pub mod bootstrap;
pub mod commands;
pub mod declarations;
pub mod learning;
pub mod sync_apply;
pub mod sync_preview;
