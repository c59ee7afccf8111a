pub mod curve;
pub mod efficiency;
pub mod pipeline;
pub mod scan;
pub mod sf;
