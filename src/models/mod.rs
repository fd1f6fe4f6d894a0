//! Domain records shared by the sales sources, the forecasting pipeline and the sinks.

pub mod forecast;
pub mod sales;

pub use forecast::{ForecastDocument, ForecastRow};
pub use sales::{group_by_item, parse_sales_date, ItemHistory, SalesRecord};
