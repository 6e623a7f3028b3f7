//! Reading service log files for the `logs` command.
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Returns the last `lines` lines of the file at `path`.
///
/// The whole file is read; service logs are small enough that streaming from
/// the tail is not worth the complexity.
pub fn tail_file(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}
