//! Continuation: checkpoint resume prompts and regenerated-prefix dedup.
//!
//! When a resumed stream regenerates the tail of the checkpoint before
//! producing new text, [`ContinuationFilter`] removes that regenerated
//! prefix exactly once, so the final content equals checkpoint + new suffix.
//! The overlap search is bounded by `max_overlap` chars of incoming text.

/// Options controlling regenerated-prefix dedup.
#[derive(Debug, Clone)]
pub struct DedupOptions {
    /// Smallest overlap worth stripping, in chars.
    pub min_overlap: usize,
    /// Upper bound on the overlap search, in chars of incoming text.
    pub max_overlap: usize,
    /// Compare case-sensitively.
    pub case_sensitive: bool,
    /// Collapse whitespace runs to a single space before comparing.
    pub normalize_whitespace: bool,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            min_overlap: 1,
            max_overlap: 256,
            case_sensitive: true,
            normalize_whitespace: false,
        }
    }
}

impl DedupOptions {
    /// An inverted bound disables dedup entirely.
    pub fn enabled(&self) -> bool {
        self.min_overlap <= self.max_overlap
    }
}

/// Default continuation instruction embedding the checkpoint, used when the
/// caller supplies no prompt builder.
pub fn default_continuation_prompt(checkpoint: &str) -> String {
    format!(
        "Continue this text exactly from where it stops. Do not repeat any part \
         of it, do not add any preamble.\n\n{}",
        checkpoint
    )
}

fn normalize(text: &str, opts: &DedupOptions) -> String {
    let mut out = if opts.case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    };
    if opts.normalize_whitespace {
        let mut collapsed = String::with_capacity(out.len());
        let mut in_ws = false;
        for ch in out.chars() {
            if ch.is_whitespace() {
                if !in_ws {
                    collapsed.push(' ');
                }
                in_ws = true;
            } else {
                collapsed.push(ch);
                in_ws = false;
            }
        }
        out = collapsed;
    }
    out
}

fn last_chars(text: &str, k: usize) -> &str {
    let count = text.chars().count();
    if count <= k {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - k)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[start..]
}

fn split_at_chars(text: &str, k: usize) -> (&str, &str) {
    match text.char_indices().nth(k) {
        Some((i, _)) => text.split_at(i),
        None => (text, ""),
    }
}

/// Length in chars of the longest overlap between a suffix of `checkpoint`
/// and a prefix of `incoming`, within the configured bounds. Returns 0 when
/// no qualifying overlap exists.
pub fn longest_overlap(checkpoint: &str, incoming: &str, opts: &DedupOptions) -> usize {
    if !opts.enabled() || checkpoint.is_empty() || incoming.is_empty() {
        return 0;
    }
    let bound = opts
        .max_overlap
        .min(checkpoint.chars().count())
        .min(incoming.chars().count());
    if bound < opts.min_overlap {
        return 0;
    }
    for k in (opts.min_overlap..=bound).rev() {
        let suffix = last_chars(checkpoint, k);
        let (prefix, _) = split_at_chars(incoming, k);
        if normalize(suffix, opts) == normalize(prefix, opts) {
            return k;
        }
    }
    0
}

/// Streaming dedup filter applied to the head of a resumed stream.
///
/// Buffers incoming deltas until enough text has arrived to decide the
/// overlap (at most `max_overlap` chars), strips the regenerated prefix
/// once, and passes everything after that through untouched.
#[derive(Debug)]
pub struct ContinuationFilter {
    checkpoint: String,
    opts: DedupOptions,
    pending: String,
    resolved: bool,
    dropped: usize,
    decide_at: usize,
}

impl ContinuationFilter {
    pub fn new(checkpoint: &str, opts: DedupOptions) -> Self {
        let decide_at = opts.max_overlap.min(checkpoint.chars().count());
        let resolved = !opts.enabled() || checkpoint.is_empty();
        Self {
            checkpoint: checkpoint.to_string(),
            opts,
            pending: String::new(),
            resolved,
            dropped: 0,
            decide_at,
        }
    }

    /// A filter that passes everything through (dedup disabled).
    pub fn passthrough() -> Self {
        Self::new("", DedupOptions::default())
    }

    /// Feed a delta; returns text ready to append, if any.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        if self.resolved {
            return if delta.is_empty() {
                None
            } else {
                Some(delta.to_string())
            };
        }
        self.pending.push_str(delta);
        if self.pending.chars().count() >= self.decide_at {
            return self.resolve();
        }
        None
    }

    /// Flush at end of stream; resolves the overlap with whatever arrived.
    pub fn finish(&mut self) -> Option<String> {
        if self.resolved {
            return None;
        }
        self.resolve()
    }

    fn resolve(&mut self) -> Option<String> {
        self.resolved = true;
        let overlap = longest_overlap(&self.checkpoint, &self.pending, &self.opts);
        self.dropped = overlap;
        let (_, rest) = split_at_chars(&self.pending, overlap);
        let rest = rest.to_string();
        self.pending.clear();
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Whether the overlap decision has been made.
    pub fn resolved(&self) -> bool {
        self.resolved
    }

    /// Chars stripped from the incoming stream.
    pub fn dropped_chars(&self) -> usize {
        self.dropped
    }

    /// Whether a prefix was actually stripped.
    pub fn applied(&self) -> bool {
        self.dropped > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_law_content_is_checkpoint_plus_suffix() {
        let checkpoint = "Hello world";
        let opts = DedupOptions::default();
        let mut filter = ContinuationFilter::new(checkpoint, opts);

        // The resumed stream regenerates "world" then continues with "!".
        let mut emitted = String::new();
        if let Some(text) = filter.push("world!") {
            emitted.push_str(&text);
        }
        if let Some(text) = filter.finish() {
            emitted.push_str(&text);
        }

        assert_eq!(format!("{}{}", checkpoint, emitted), "Hello world!");
        assert_eq!(filter.dropped_chars(), 5);
        assert!(filter.applied());
    }

    #[test]
    fn test_no_overlap_passes_through() {
        let mut filter = ContinuationFilter::new("Hello", DedupOptions::default());
        let mut emitted = String::new();
        for part in [" and", " goodbye"] {
            if let Some(text) = filter.push(part) {
                emitted.push_str(&text);
            }
        }
        if let Some(text) = filter.finish() {
            emitted.push_str(&text);
        }
        assert_eq!(emitted, " and goodbye");
        assert!(!filter.applied());
    }

    #[test]
    fn test_buffers_until_decidable() {
        // Checkpoint shorter than max_overlap: decision point is its length.
        let mut filter = ContinuationFilter::new("Hi", DedupOptions::default());
        assert_eq!(filter.push("H"), None);
        // Second char reaches the decision point; "Hi" overlaps fully.
        assert_eq!(filter.push("i there"), Some(" there".to_string()));
        assert_eq!(filter.dropped_chars(), 2);
        // Subsequent deltas pass straight through.
        assert_eq!(filter.push("!"), Some("!".to_string()));
    }

    #[test]
    fn test_min_overlap_respected() {
        let opts = DedupOptions {
            min_overlap: 6,
            ..Default::default()
        };
        // Overlap of 5 is below the minimum, so nothing is stripped.
        assert_eq!(longest_overlap("Hello world", "world again", &opts), 0);
    }

    #[test]
    fn test_max_overlap_bounds_search() {
        let opts = DedupOptions {
            max_overlap: 4,
            ..Default::default()
        };
        // True overlap is 5 chars but the search is capped at 4, and the
        // 4-char prefix of incoming does not match the 4-char suffix.
        assert_eq!(longest_overlap("Hello world", "world!", &opts), 0);
        // An overlap within the bound is still found.
        assert_eq!(longest_overlap("Hello world", "orld!", &opts), 4);
    }

    #[test]
    fn test_inverted_bounds_disable_dedup() {
        let opts = DedupOptions {
            min_overlap: 10,
            max_overlap: 4,
            ..Default::default()
        };
        assert!(!opts.enabled());
        let mut filter = ContinuationFilter::new("Hello world", opts);
        assert_eq!(filter.push("world!"), Some("world!".to_string()));
        assert!(!filter.applied());
    }

    #[test]
    fn test_case_insensitive_comparison() {
        let opts = DedupOptions {
            case_sensitive: false,
            ..Default::default()
        };
        assert_eq!(longest_overlap("Hello World", "WORLD again", &opts), 5);
        let strict = DedupOptions::default();
        assert_eq!(longest_overlap("Hello World", "WORLD again", &strict), 0);
    }

    #[test]
    fn test_whitespace_normalization() {
        let opts = DedupOptions {
            normalize_whitespace: true,
            ..Default::default()
        };
        // Tab vs space mismatch is tolerated when normalizing.
        assert_eq!(longest_overlap("one two", "two\tmore", &opts), 3);
    }

    #[test]
    fn test_longest_overlap_prefers_longest() {
        // Both "d" and "world" qualify; the longest wins.
        assert_eq!(
            longest_overlap("Hello world", "world", &DedupOptions::default()),
            5
        );
    }

    #[test]
    fn test_finish_resolves_short_streams() {
        // Incoming never reaches the decision point; finish decides.
        let mut filter = ContinuationFilter::new(
            "a much longer checkpoint than the incoming text",
            DedupOptions::default(),
        );
        assert_eq!(filter.push("text"), None);
        assert_eq!(filter.finish(), None); // "text" is entirely regenerated
        assert_eq!(filter.dropped_chars(), 4);
    }

    #[test]
    fn test_empty_checkpoint_passes_through() {
        let mut filter = ContinuationFilter::new("", DedupOptions::default());
        assert_eq!(filter.push("fresh"), Some("fresh".to_string()));
        assert!(!filter.applied());
    }

    #[test]
    fn test_default_prompt_embeds_checkpoint() {
        let prompt = default_continuation_prompt("partial output");
        assert!(prompt.contains("partial output"));
        assert!(prompt.to_lowercase().contains("continue"));
    }

    #[test]
    fn test_multibyte_overlap() {
        let opts = DedupOptions::default();
        assert_eq!(longest_overlap("héllo wörld", "wörld…", &opts), 5);
    }
}
