//! Core value types shared by every stage.

mod item;

pub use item::PipelineItem;
