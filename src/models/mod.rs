pub mod aggregation;
pub mod entity;
pub mod query;

pub use aggregation::{
    AggregationResult, Forecast, FunnelStage, Kpis, RankingEntry, TrendGranularity, TrendPoint,
};
pub use entity::{entities_from_value, Entity};
pub use query::{
    filter_and_sort, Filter, FilterOp, FilterSpec, Pagination, SortDirection, SortSpec,
};
