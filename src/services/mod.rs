pub mod forecasting;
pub mod sink;

pub use forecasting::{ForecastingService, TrainingOutcome, TrainingSummary};
pub use sink::{ForecastSink, WriteReport, FIRESTORE_BATCH_LIMIT};
