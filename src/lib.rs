//! perfassess core library: profile one call and chart its time and memory cost.

mod arguments;
mod assessor;
mod chart;
mod chart_html;
mod config;
mod error;
mod fsutil;
mod loader;
mod normalize;
pub mod runtime;
mod testor;

pub use arguments::*;
pub use assessor::*;
pub use chart::*;
pub use chart_html::*;
pub use config::*;
pub use error::*;
pub use fsutil::*;
pub use loader::*;
pub use normalize::*;
pub use runtime::{AllocationRecord, MemoryStats, ProfileSession, RawStatistics, TimeRecord, TimeStats};
pub use testor::*;

#[cfg(test)]
#[global_allocator]
static TEST_ALLOCATOR: runtime::TracingAllocator = runtime::TracingAllocator::new(std::alloc::System);
