//! Splits raw text into overlapping passages.
//!
//! Paragraphs (blank-line separated) are packed together up to the target
//! size; a paragraph group that is still too long is cut into fixed windows
//! that overlap by `overlap` characters. All lengths count `char`s.

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_MIN_CHUNK_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub size: usize,
    pub overlap: usize,
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            min_chars: DEFAULT_MIN_CHUNK_CHARS,
        }
    }
}

impl ChunkingConfig {
    pub fn new(size: usize, overlap: usize) -> Self {
        Self {
            size,
            overlap,
            ..Self::default()
        }
    }

    /// Window advance for hard splits. Never zero for a non-zero size.
    fn step(&self) -> usize {
        if self.overlap >= self.size {
            self.size
        } else {
            self.size - self.overlap
        }
    }

    fn effective_min(&self) -> usize {
        self.min_chars.min(self.size)
    }
}

/// Normalizes line endings, strips trailing whitespace before line breaks and
/// collapses three or more line breaks into a single blank line.
pub fn normalize_line_breaks(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines = unified
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    let mut normalized = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for (position, line) in lines.into_iter().enumerate() {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if position > 0 {
            normalized.push('\n');
        }
        normalized.push_str(line);
    }

    normalized
}

pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    if config.size == 0 {
        return Vec::new();
    }

    let normalized = normalize_line_breaks(text);
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let min_chars = config.effective_min();
    if trimmed.chars().count() < min_chars {
        return vec![trimmed.to_string()];
    }

    let paragraphs = trimmed
        .split("\n\n")
        .map(|paragraph| paragraph.trim().replace('\t', " "))
        .filter(|paragraph| !paragraph.is_empty());

    let mut passages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut previous: Option<String> = None;

    for paragraph in paragraphs {
        let paragraph_len = paragraph.chars().count();
        if current.is_empty() {
            current = paragraph;
            current_len = paragraph_len;
            continue;
        }

        let fits = current_len + 2 + paragraph_len <= config.size;
        if fits || current_len < min_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
            current_len += 2 + paragraph_len;
        } else {
            flush_group(&current, current_len, config, &mut passages);
            previous = Some(std::mem::replace(&mut current, paragraph));
            current_len = paragraph_len;
        }
    }

    match previous {
        // A short tail is widened backwards into the previous group.
        Some(previous) if current_len < min_chars => {
            let combined: Vec<char> = format!("{previous}\n\n{current}").chars().collect();
            let start = combined.len().saturating_sub(min_chars);
            passages.push(combined[start..].iter().collect());
        }
        _ => flush_group(&current, current_len, config, &mut passages),
    }

    passages
}

fn flush_group(group: &str, group_len: usize, config: ChunkingConfig, out: &mut Vec<String>) {
    if group_len <= config.size {
        if group_len >= config.effective_min() {
            out.push(group.to_string());
        }
        return;
    }

    out.extend(split_windows(group, config));
}

fn split_windows(text: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = config.step();
    let min_chars = config.effective_min();

    let mut windows = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + config.size).min(chars.len());
        let mut window_start = start;
        if end == chars.len() && end - window_start < min_chars {
            window_start = end.saturating_sub(min_chars);
        }

        let window: String = chars[window_start..end].iter().collect();
        if !window.trim().is_empty() {
            windows.push(window);
        }

        if end == chars.len() {
            break;
        }
        start += step;
    }

    windows
}
