//! Near-match resolution over normalized ingredient keys.
//!
//! Pure functions over `(query, candidates, cutoff)` so the matching
//! algorithm can be tuned without touching catalog storage or the
//! aggregation code that calls it.

/// Strict cutoff: only substitutions at least this similar are accepted.
pub const DEFAULT_SIMILARITY_CUTOFF: f32 = 0.85;

/// Returns the single best candidate with similarity >= `cutoff`, if any.
pub fn closest_match<'a, I>(query: &str, candidates: I, cutoff: f32) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let query: Vec<char> = query.chars().collect();
    let mut best: Option<(&'a str, f32)> = None;
    for candidate in candidates {
        let chars: Vec<char> = candidate.chars().collect();
        let score = ratio(&query, &chars);
        if score >= cutoff && best.map_or(true, |(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Gestalt (Ratcliff/Obershelp) similarity in [0, 1]: twice the number of
/// matching characters over the combined length.
pub fn similarity(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio(&a, &b)
}

fn ratio(a: &[char], b: &[char]) -> f32 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(a, b) as f32 / total as f32
}

/// Longest common run, then recurse on both remainders.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (start_a, start_b, len) = longest_common_run(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

fn longest_common_run(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        let mut current = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                let run = prev[j] + 1;
                current[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        prev = current;
    }
    best
}
