pub mod group;
pub mod render;
pub mod replay;
