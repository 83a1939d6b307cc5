/// Result type of the binary's top-level functions.
pub type BenchResult<T> = Result<T, Box<dyn std::error::Error>>;
