//! Text canonicalization for artist/title comparison.
//!
//! Artist names are transliterated to a Latin approximation before cleanup so
//! "אייל גולן" and "Eyal Golan" produce comparable tokens. Song titles are
//! cleaned but kept in their original script, since the displayed title stays
//! in-language and a consonantal transliteration would only destroy signal.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use unicode_normalization::UnicodeNormalization;

/// Everything that is not a Unicode letter, digit, or whitespace.
static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s]").unwrap());

/// Collapse whitespace runs into a single space.
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ============================================================================
// ARTIST TRANSLITERATIONS
// ============================================================================

/// Curated Hebrew/Cyrillic artist spellings for cross-script matching.
/// Automatic transliteration of Hebrew drops vowels ("אייל" folds to "yyl"),
/// so the well-known names on the sheets get explicit Latin forms. Keys are
/// already cleaned (lowercase, no punctuation).
static ARTIST_TRANSLITERATIONS: Lazy<FxHashMap<&str, &str>> = Lazy::new(|| {
    let mut m = FxHashMap::default();

    // Israeli artists
    m.insert("אייל גולן", "eyal golan");
    m.insert("עומר אדם", "omer adam");
    m.insert("נועה קירל", "noa kirel");
    m.insert("שלמה ארצי", "shlomo artzi");
    m.insert("אריק איינשטיין", "arik einstein");
    m.insert("שלום חנוך", "shalom hanoch");
    m.insert("עידן רייכל", "idan raichel");
    m.insert("יהודה פוליקר", "yehuda poliker");
    m.insert("אביב גפן", "aviv geffen");
    m.insert("עברי לידר", "ivri lider");
    m.insert("שרית חדד", "sarit hadad");
    m.insert("עפרה חזה", "ofra haza");
    m.insert("ריטה", "rita");
    m.insert("משה פרץ", "moshe peretz");
    m.insert("שלומי שבת", "shlomi shabat");
    m.insert("סטטיק ובן אל תבורי", "static and ben el");
    m.insert("סטטיק ובן אל", "static and ben el");
    m.insert("הדג נחש", "hadag nahash");
    m.insert("משינה", "mashina");
    m.insert("כוורת", "kaveret");
    m.insert("טיפקס", "tipex");
    m.insert("עדן חסון", "eden hason");
    m.insert("נטע ברזילי", "netta barzilai");
    m.insert("עדן בן זקן", "eden ben zaken");
    m.insert("אושר כהן", "osher cohen");
    m.insert("ישי ריבו", "ishay ribo");
    m.insert("חיים משה", "haim moshe");
    m.insert("זוהר ארגוב", "zohar argov");

    // Russian artists common on mixed sheets
    m.insert("кино", "kino");
    m.insert("ддт", "ddt");
    m.insert("земфира", "zemfira");
    m.insert("ленинград", "leningrad");
    m.insert("аквариум", "aquarium");

    m
});

// ============================================================================
// HELPERS
// ============================================================================

/// Unicode combining mark (diacritic) ranges, filtered out during folding.
fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold text to lowercase ASCII: NFKD-decompose and drop combining marks,
/// then transliterate whatever non-ASCII remains (Hebrew, Cyrillic, CJK).
/// e.g., "Beyoncé" → "beyonce", "Björk" → "bjork".
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// Lowercase, strip everything but letters/digits/whitespace, collapse
/// whitespace, trim. Unicode-aware: non-Latin letters survive untouched.
fn clean(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = NON_ALNUM.replace_all(&lower, "");
    MULTI_SPACE.replace_all(&stripped, " ").trim().to_string()
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Normalize a song title for matching. Never transliterates: the title is
/// compared in its original script.
pub fn normalize_title(text: &str) -> String {
    clean(text)
}

/// Normalize an artist name for matching: clean, then map known
/// Hebrew/Cyrillic spellings, then fold the rest to ASCII.
pub fn normalize_artist(text: &str) -> String {
    let key = clean(text);
    if let Some(&latin) = ARTIST_TRANSLITERATIONS.get(key.as_str()) {
        return latin.to_string();
    }
    clean(&fold_to_ascii(&key))
}
