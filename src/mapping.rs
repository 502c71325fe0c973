use std::borrow::Cow;
use std::collections::BTreeMap;

/// Case-variant replacement map.
///
/// Holds the lowercase base string plus a map from exact casing variants to
/// their replacements. Matching is ASCII-case-insensitive; replacement is
/// strictly literal: a matched occurrence whose exact casing is not a map key
/// survives byte-for-byte. The map is injected rather than global so tests can
/// substitute alternate mappings.
#[derive(Debug, Clone)]
pub struct ReplacementMap {
    base: Vec<u8>,
    variants: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl ReplacementMap {
    /// Build a map from a lowercase base string and exact-casing pairs.
    pub fn new<S: AsRef<str>>(base: &str, pairs: &[(S, S)]) -> Self {
        let variants = pairs
            .iter()
            .map(|(k, v)| (k.as_ref().as_bytes().to_vec(), v.as_ref().as_bytes().to_vec()))
            .collect();
        Self {
            base: base.to_ascii_lowercase().into_bytes(),
            variants,
        }
    }

    /// The standard five-entry rebranding map.
    pub fn standard() -> Self {
        Self::new(
            "flojoy",
            &[
                ("flojoy", "atlasvibe"),
                ("Flojoy", "Atlasvibe"),
                ("floJoy", "atlasVibe"),
                ("FloJoy", "AtlasVibe"),
                ("FLOJOY", "ATLASVIBE"),
            ],
        )
    }

    /// Lowercase base string being searched for.
    pub fn base(&self) -> &str {
        // Constructed from a &str; always valid UTF-8.
        std::str::from_utf8(&self.base).unwrap_or_default()
    }

    /// True if `haystack` contains the base string, ignoring ASCII case.
    pub fn matches(&self, haystack: &[u8]) -> bool {
        !self.find_occurrences(haystack).is_empty()
    }

    /// Byte offsets of every ASCII-case-insensitive occurrence of the base.
    fn find_occurrences(&self, haystack: &[u8]) -> Vec<usize> {
        let n = self.base.len();
        if n == 0 || haystack.len() < n {
            return Vec::new();
        }
        let mut hits = Vec::new();
        let mut i = 0;
        while i + n <= haystack.len() {
            if haystack[i..i + n].eq_ignore_ascii_case(&self.base) {
                hits.push(i);
                i += n;
            } else {
                i += 1;
            }
        }
        hits
    }

    /// Replace every mapped occurrence in a raw byte line.
    ///
    /// Occurrences whose exact casing is not a map key are left untouched.
    /// Bytes outside matched spans are copied verbatim, so undecodable
    /// sequences and adjacent combining marks survive exactly.
    pub fn apply_bytes<'a>(&self, input: &'a [u8]) -> Cow<'a, [u8]> {
        let hits = self.find_occurrences(input);
        if hits.is_empty() {
            return Cow::Borrowed(input);
        }
        let n = self.base.len();
        let mut out = Vec::with_capacity(input.len());
        let mut last = 0;
        let mut changed = false;
        for start in hits {
            let matched = &input[start..start + n];
            if let Some(replacement) = self.variants.get(matched) {
                out.extend_from_slice(&input[last..start]);
                out.extend_from_slice(replacement);
                last = start + n;
                changed = true;
            }
        }
        if !changed {
            return Cow::Borrowed(input);
        }
        out.extend_from_slice(&input[last..]);
        Cow::Owned(out)
    }

    /// Replace every mapped occurrence in a string.
    ///
    /// Match windows are pure ASCII (the base is ASCII and multi-byte UTF-8
    /// never collides with ASCII letters), so splicing map values into a valid
    /// UTF-8 input always yields valid UTF-8.
    pub fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        match self.apply_bytes(input.as_bytes()) {
            Cow::Borrowed(_) => Cow::Borrowed(input),
            Cow::Owned(bytes) => {
                Cow::Owned(String::from_utf8(bytes).unwrap_or_else(|e| {
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }))
            }
        }
    }
}
