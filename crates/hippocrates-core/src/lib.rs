pub mod config;
pub mod consultation;
pub mod dialogue;
pub mod engine;
pub mod error;
pub mod generation;
pub mod hub;
pub mod lexicon;
pub mod prompt;
pub mod ranking;
pub mod retriever;

pub use config::*;
pub use consultation::*;
pub use dialogue::*;
pub use engine::*;
pub use error::*;
pub use generation::*;
pub use hub::*;
pub use lexicon::*;
pub use prompt::*;
pub use ranking::*;
pub use retriever::*;
