pub mod chunker;

pub use chunker::{preprocess, Chunk};
