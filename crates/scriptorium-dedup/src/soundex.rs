//! American Soundex, used as the blocking key of the fuzzy layer.

use crate::normalize::{is_stopword, tokens};

fn digit(c: char) -> Option<char> {
    match c {
        'b' | 'f' | 'p' | 'v' => Some('1'),
        'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
        'd' | 't' => Some('3'),
        'l' => Some('4'),
        'm' | 'n' => Some('5'),
        'r' => Some('6'),
        _ => None,
    }
}

/// Four-character Soundex code of `word`, or `None` when it has no ASCII letters.
///
/// Adjacent letters with the same digit collapse, as do same-digit letters
/// separated only by `h` or `w`; a vowel between them keeps both.
pub fn soundex(word: &str) -> Option<String> {
    let letters: Vec<char> = word
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let (&first, rest) = letters.split_first()?;

    let mut code = String::with_capacity(4);
    code.push(first.to_ascii_uppercase());
    let mut last = digit(first);

    for &c in rest {
        if code.len() == 4 {
            break;
        }
        match digit(c) {
            Some(d) if Some(d) != last => {
                code.push(d);
                last = Some(d);
            }
            Some(_) => {}
            None if c == 'h' || c == 'w' => {}
            None => last = None,
        }
    }

    while code.len() < 4 {
        code.push('0');
    }
    Some(code)
}

/// Sorted, deduplicated codes of the title's non-stopword tokens, space-joined.
pub fn title_key(title: &str) -> String {
    let mut codes: Vec<String> = tokens(title)
        .iter()
        .filter(|t| !is_stopword(t))
        .filter_map(|t| soundex(t))
        .collect();
    codes.sort();
    codes.dedup();
    codes.join(" ")
}

/// One code per author token, sorted and deduplicated.
pub fn author_codes(author: &str) -> Vec<String> {
    let mut codes: Vec<String> = tokens(author).iter().filter_map(|t| soundex(t)).collect();
    codes.sort();
    codes.dedup();
    codes
}
