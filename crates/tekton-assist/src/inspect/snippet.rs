//! Log excerpt heuristic.

const KEYWORDS: [&str; 5] = ["error", "fatal", "panic", "fail", "exit code"];

/// Picks up to `n` lines around the last error-looking line of `log`.
///
/// The window starts `n / 2` lines before the match and is shifted back when
/// it would run past the end. Without a match the last `n` lines are used.
/// Blank lines at either edge are dropped.
pub fn extract_error_snippet(log: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let lines: Vec<&str> = log.split('\n').collect();

    let matched = lines.iter().rposition(|line| {
        let lower = line.to_lowercase();
        KEYWORDS.iter().any(|kw| lower.contains(kw))
    });

    let (mut start, mut end) = match matched {
        Some(idx) => {
            let start = idx.saturating_sub(n / 2);
            let end = start + n;
            if end > lines.len() {
                (lines.len().saturating_sub(n), lines.len())
            } else {
                (start, end)
            }
        }
        None => (lines.len().saturating_sub(n), lines.len()),
    };

    while start < end && lines[start].trim().is_empty() {
        start += 1;
    }
    while end > start && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    lines[start..end].join("\n")
}
