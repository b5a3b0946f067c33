pub mod engine;
pub mod recommender;

pub use engine::{PairingEngine, UserState};
pub use recommender::{
    CannedRecommender, GeminiRecommender, Recommender, FALLBACK_RECOMMENDATION,
};
