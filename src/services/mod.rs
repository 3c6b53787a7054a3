pub mod aggregation;
pub mod api_client;
pub mod cache;
pub mod data_source;
pub mod pipeline;
pub mod store;
pub mod supabase;

pub use aggregation::{aggregate, AggregationConfig};
pub use api_client::{CallContext, CallOptions, ErrorReporter, RemoteResponse, RetryingClient};
pub use cache::{CacheStats, TtlCache};
pub use data_source::{DataSource, EntityRepository, InMemoryDataSource};
pub use pipeline::{ChangeEvent, DashboardPipeline, RefreshSummary};
pub use store::{Clock, StateStore, StoreSnapshot, StoreState};
pub use supabase::SupabaseDataSource;
