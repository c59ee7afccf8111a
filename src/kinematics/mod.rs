pub mod jet;
pub mod matching;
pub mod vector;
