// Tick aggregation
pub mod buffer;
pub mod builder;

pub use buffer::CandleBuffer;
pub use builder::CandleBuilder;
