pub mod config;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod state;
pub mod store;
pub mod watermark;

pub use config::{Config, GoldConfig, ServerConfig, SinkConfig, SourceConfig, WarehouseConfig};
pub use pipeline::{DrainPolicy, Pipeline, PipelineOptions, TimeDomain};
pub use sink::clickhouse::ClickHouseGoldSink;
pub use sink::file::FileLineSink;
pub use sink::memory::{MemoryGoldSink, MemoryLineSink};
pub use sink::sqlite::SqliteGoldSink;
pub use sink::{GoldRow, GoldSink, LineSink};
pub use source::MessageSource;
pub use source::mock::MockSource;
pub use source::tcp::TcpSource;
pub use state::{PipelineState, PipelineStats};
pub use store::WindowStore;
pub use watermark::Watermark;
