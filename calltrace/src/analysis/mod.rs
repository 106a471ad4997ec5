//! Counting-mode analysis
//!
//! - **`count_table`**: the runtime's sparse address → count table
//! - **`function_counts`**: counts resolved and summed per function

pub mod count_table;
pub mod function_counts;

pub use count_table::{CountTableLayout, CounterSnapshot};
pub use function_counts::{aggregate_counts, FunctionCount, FunctionCounts};
