pub mod annotation;
pub mod cli;
pub mod clustering;
pub mod column_map;
pub mod conesearch;
pub mod coords;
pub mod cosmology;
pub mod crossmatcher;
pub mod db;
pub mod engine;
pub mod error;
pub mod htm;
pub mod output;
pub mod ranker;
pub mod refresh;
pub mod search;
pub mod settings;
pub mod utils;

pub use cli::run;
pub use engine::{BatchReport, ClassifiedBatch, Engine, WorkerTask};
pub use error::{ClassifierError, ClassifierResult};
pub use settings::Settings;
