pub mod detectors;
pub mod error;
pub mod event;
pub mod intervals;
pub mod io;
pub mod metrics;
pub mod recipe;
pub mod signal;
pub mod threshold;
pub mod transform;

pub use detectors::{Detection, Detector};
pub use error::{DetectError, Result};
pub use event::{Event, EventSet, Features};
pub use metrics::agreement::{consensus, match_events, MatchedEvents};
pub use recipe::{method_names, Recipe, RecipeOverrides};
pub use signal::*;
