pub mod config;
pub mod error;
pub mod flashcards;
pub mod generation;
pub mod models;
pub mod pdf;
pub mod service;

pub use config::Config;
pub use error::{AppError, ErrorKind, Result};
pub use flashcards::FlashcardService;
pub use generation::{GenerationEngine, OpenRouterEngine};
pub use pdf::PdfService;
pub use service::{AppState, build_router};
