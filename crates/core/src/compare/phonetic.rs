//! Phonetic encodings: Soundex and Metaphone.
//!
//! Both operate on ASCII letters only; anything else is stripped before
//! encoding. The comparators built on top score 1 iff the encodings match.

// ---------------------------------------------------------------------------
// Soundex
// ---------------------------------------------------------------------------

/// Classic four-character Soundex code.
///
/// First letter kept verbatim; the rest map to digit classes
/// (bfpv→1, cgjkqsxz→2, dt→3, l→4, mn→5, r→6). Vowels and h/w/y are
/// dropped; adjacent identical codes collapse, with a vowel in between
/// resetting the adjacency. Padded/truncated to exactly four characters.
pub fn soundex_encode(input: &str) -> String {
    let letters: Vec<char> = input
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let Some(&first) = letters.first() else {
        return "0000".into();
    };

    let mut out = String::new();
    out.push(first);
    let mut last_code = soundex_digit(first);

    for &c in &letters[1..] {
        if out.len() == 4 {
            break;
        }
        match c {
            'A' | 'E' | 'I' | 'O' | 'U' => last_code = None,
            'H' | 'W' | 'Y' => {}
            _ => {
                let code = soundex_digit(c);
                if code != last_code {
                    if let Some(d) = code {
                        out.push(d);
                    }
                }
                last_code = code;
            }
        }
    }

    while out.len() < 4 {
        out.push('0');
    }
    out
}

fn soundex_digit(c: char) -> Option<char> {
    match c {
        'B' | 'F' | 'P' | 'V' => Some('1'),
        'C' | 'G' | 'J' | 'K' | 'Q' | 'S' | 'X' | 'Z' => Some('2'),
        'D' | 'T' => Some('3'),
        'L' => Some('4'),
        'M' | 'N' => Some('5'),
        'R' => Some('6'),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Metaphone
// ---------------------------------------------------------------------------

/// Metaphone encoding, truncated to `max_length` characters.
///
/// Digraphs CH→X, PH→F, TH→0, SH→X; initial KN/GN/PN/WR drop the leading
/// consonant; vowels are kept only at word start. GH is silent at word end
/// after a vowel and codes as X before a consonant.
pub fn metaphone_encode(input: &str, max_length: usize) -> String {
    let raw: Vec<char> = input
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    // Collapse adjacent duplicate letters, except C (as in CC → KS paths).
    let mut w: Vec<char> = Vec::with_capacity(raw.len());
    for &c in &raw {
        if w.last() == Some(&c) && c != 'C' {
            continue;
        }
        w.push(c);
    }

    if w.is_empty() {
        return String::new();
    }

    // Initial silent-consonant pairs.
    let start = match (w.first(), w.get(1)) {
        (Some('K' | 'G' | 'P'), Some('N')) => 1,
        (Some('W'), Some('R')) => 1,
        _ => 0,
    };

    let mut out = String::new();
    let mut i = start;

    while i < w.len() && out.len() < max_length {
        let c = w[i];
        let prev = if i > 0 { Some(w[i - 1]) } else { None };
        let next = w.get(i + 1).copied();
        let next2 = w.get(i + 2).copied();

        match c {
            'A' | 'E' | 'I' | 'O' | 'U' => {
                if i == start {
                    out.push(c);
                }
                i += 1;
            }
            'B' => {
                // Silent after M at word end.
                if !(prev == Some('M') && i + 1 == w.len()) {
                    out.push('B');
                }
                i += 1;
            }
            'C' => {
                if next == Some('H') {
                    out.push('X');
                    i += 2;
                } else if matches!(next, Some('I' | 'E' | 'Y')) {
                    out.push('S');
                    i += 1;
                } else {
                    out.push('K');
                    i += 1;
                }
            }
            'D' => {
                if next == Some('G') && matches!(next2, Some('E' | 'Y' | 'I')) {
                    out.push('J');
                    i += 2; // the G is consumed, the vowel is handled next
                } else {
                    out.push('T');
                    i += 1;
                }
            }
            'G' => {
                if next == Some('H') {
                    let after = w.get(i + 2).copied();
                    match after {
                        None => {
                            // At word end: silent after a vowel, else K.
                            if !prev.map(is_vowel).unwrap_or(false) {
                                out.push('K');
                            }
                            i += 2;
                        }
                        Some(a) if !is_vowel(a) => {
                            out.push('X');
                            i += 2;
                        }
                        Some(_) => {
                            out.push('K');
                            i += 2;
                        }
                    }
                } else if matches!(next, Some('I' | 'E' | 'Y')) {
                    out.push('J');
                    i += 1;
                } else {
                    out.push('K');
                    i += 1;
                }
            }
            'H' => {
                // Silent after a vowel when not before one.
                let after_vowel = prev.map(is_vowel).unwrap_or(false);
                let before_vowel = next.map(is_vowel).unwrap_or(false);
                if !(after_vowel && !before_vowel) {
                    out.push('H');
                }
                i += 1;
            }
            'K' => {
                if prev != Some('C') {
                    out.push('K');
                }
                i += 1;
            }
            'P' => {
                if next == Some('H') {
                    out.push('F');
                    i += 2;
                } else {
                    out.push('P');
                    i += 1;
                }
            }
            'Q' => {
                out.push('K');
                i += 1;
            }
            'S' => {
                if next == Some('H') {
                    out.push('X');
                    i += 2;
                } else if next == Some('I') && matches!(next2, Some('O' | 'A')) {
                    out.push('X');
                    i += 1;
                } else {
                    out.push('S');
                    i += 1;
                }
            }
            'T' => {
                if next == Some('C') && next2 == Some('H') {
                    // TCH collapses to the CH rule.
                    i += 1;
                } else if next == Some('H') {
                    out.push('0');
                    i += 2;
                } else if next == Some('I') && matches!(next2, Some('O' | 'A')) {
                    out.push('X');
                    i += 1;
                } else {
                    out.push('T');
                    i += 1;
                }
            }
            'V' => {
                out.push('F');
                i += 1;
            }
            'W' | 'Y' => {
                // Silent when not followed by a vowel.
                if next.map(is_vowel).unwrap_or(false) {
                    out.push(c);
                }
                i += 1;
            }
            'X' => {
                out.push('K');
                if out.len() < max_length {
                    out.push('S');
                }
                i += 1;
            }
            'Z' => {
                out.push('S');
                i += 1;
            }
            _ => {
                // F, J, L, M, N, R pass through.
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'A' | 'E' | 'I' | 'O' | 'U')
}
