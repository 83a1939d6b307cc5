use crate::tool::ToolKind;
use std::time::Duration;

/// Output of one compression tool over the target project, already capped to the configured size.
#[derive(Clone, Debug, PartialEq)]
pub struct CompressedContext {
    pub tool: ToolKind,
    /// Total size of the source files the tool was pointed at.
    pub raw_size_bytes: usize,
    pub compressed_text: String,
    pub compressed_size_bytes: usize,
    pub build_duration: Duration,
    /// The external tool was unavailable and a built-in extractor produced the text.
    pub degraded: bool,
    /// The tool output exceeded the cap and was cut.
    pub truncated: bool,
    /// Size of the tool output before the cap was applied.
    pub tool_output_bytes: usize,
}

impl CompressedContext {
    /// Compressed size divided by raw size; lower is better. Zero when there is no raw source.
    pub fn compression_ratio(&self) -> f64 {
        if self.raw_size_bytes == 0 {
            0.0
        } else {
            self.compressed_size_bytes as f64 / self.raw_size_bytes as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_compressed_over_raw() {
        let mut ctx = CompressedContext {
            tool: ToolKind::Nfo,
            raw_size_bytes: 400,
            compressed_text: "x".repeat(100),
            compressed_size_bytes: 100,
            build_duration: Duration::ZERO,
            degraded: false,
            truncated: false,
            tool_output_bytes: 100,
        };
        assert_eq!(ctx.compression_ratio(), 0.25);
        ctx.raw_size_bytes = 0;
        assert_eq!(ctx.compression_ratio(), 0.0);
    }
}
