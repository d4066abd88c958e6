// src/print_job.rs - Job splitting and transmission bookkeeping
use uuid::Uuid;

/// One print's worth of work: the instruction text split into size-bounded
/// blocks, plus the cursor tracking how far transmission has progressed.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: String,
    /// Ordered blocks; rejoining them with newlines reproduces the source
    /// text exactly.
    pub blocks: Vec<String>,
    /// Approximate count of instructions the box will execute, used only for
    /// the progress ratio. Comment-only lines and block boundaries are
    /// excluded.
    pub total_lines: usize,
    /// Index of the next block to send. Advanced only after the box confirms
    /// a send; equal to `blocks.len()` once everything is on the wire.
    pub current_block: usize,
}

impl PrintJob {
    pub fn from_text(text: &str, block_size_limit: usize) -> Self {
        let blocks = split_blocks(text, block_size_limit);
        let total_lines = count_executable_lines(text, blocks.len());
        Self {
            id: Uuid::new_v4().to_string(),
            blocks,
            total_lines,
            current_block: 0,
        }
    }

    pub fn is_fully_sent(&self) -> bool {
        self.current_block >= self.blocks.len()
    }

    /// True for a job with nothing to execute. An empty instruction source
    /// still yields one (empty) block, so check the content, not the count.
    pub fn is_empty(&self) -> bool {
        self.total_lines == 0 && self.blocks.iter().all(|block| block.is_empty())
    }
}

/// Split newline-joined instruction text into blocks no larger than `limit`
/// estimated bytes. Lines are never split; a block closes when appending the
/// next line would push it past the limit, and the final partial block is
/// always emitted (so empty input produces one empty block).
pub fn split_blocks(text: &str, limit: usize) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut lines_in_block = 0usize;

    for line in text.split('\n') {
        if lines_in_block > 0 && current.len() + line.len() + 1 > limit {
            blocks.push(std::mem::take(&mut current));
            lines_in_block = 0;
        }
        if lines_in_block > 0 {
            current.push('\n');
        }
        current.push_str(line);
        lines_in_block += 1;
    }
    blocks.push(current);
    blocks
}

/// Count the instructions the box is expected to execute: one per newline,
/// minus comment lines (a `;` directly after a newline), minus one per block
/// boundary. Display-grade accuracy only.
pub fn count_executable_lines(text: &str, block_count: usize) -> usize {
    let newlines = text.matches('\n').count();
    let comment_lines = text.matches("\n;").count();
    newlines
        .saturating_sub(comment_lines)
        .saturating_sub(block_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_exclude_comments_and_block_boundaries() {
        let text = "G1 X0\nG1 X1\n;comment\nG1 X2\n";
        let blocks = split_blocks(text, 7000);
        assert_eq!(blocks.len(), 1);
        assert_eq!(count_executable_lines(text, blocks.len()), 2);
    }

    #[test]
    fn empty_source_yields_one_empty_block() {
        let job = PrintJob::from_text("", 7000);
        assert_eq!(job.blocks, vec![String::new()]);
        assert_eq!(job.total_lines, 0);
        assert!(job.is_empty());
    }

    #[test]
    fn blocks_rejoin_to_the_original_text() {
        let text = "G28\nG1 X10 Y10\nG1 X20 Y20\n;layer 1\nG1 X30 Y5 E2.5\nM104 S0\n";
        for limit in [8, 16, 24, 7000] {
            let blocks = split_blocks(text, limit);
            assert_eq!(blocks.join("\n"), text, "limit {}", limit);
        }
    }

    #[test]
    fn blocks_respect_the_size_limit() {
        let text = (0..100)
            .map(|i| format!("G1 X{} Y{}", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let limit = 64;
        let blocks = split_blocks(&text, limit);
        assert!(blocks.len() > 1);
        for block in &blocks {
            assert!(block.len() <= limit, "block of {} bytes", block.len());
        }
    }

    #[test]
    fn oversized_single_line_still_becomes_a_block() {
        let long_line = "G1 ".repeat(100);
        let blocks = split_blocks(&long_line, 16);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], long_line);
    }

    #[test]
    fn cursor_starts_at_zero_and_reports_fully_sent() {
        let mut job = PrintJob::from_text("G28\nG1 X0\n", 7000);
        assert_eq!(job.current_block, 0);
        assert!(!job.is_fully_sent());
        job.current_block = job.blocks.len();
        assert!(job.is_fully_sent());
    }
}
