//! Locating `${...}` spans inside template text.

/// Byte ranges `(start, end)` of each `${...}` span, `end` exclusive.
///
/// Braces inside single-, double- or backtick-quoted strings do not count
/// toward the nesting depth. An unterminated span ends the scan.
pub fn find_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] != b'$' || bytes[i + 1] != b'{' {
            i += 1;
            continue;
        }
        match span_end(bytes, i + 2) {
            Some(end) => {
                spans.push((i, end));
                i = end;
            }
            None => break,
        }
    }
    spans
}

/// Scan from just inside an opening `${`; returns the index after its `}`.
fn span_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut depth = 1;
    let mut quote: Option<u8> = None;
    let mut i = from;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner(text: &str) -> Vec<&str> {
        find_spans(text)
            .into_iter()
            .map(|(s, e)| &text[s + 2..e - 1])
            .collect()
    }

    #[test]
    fn test_finds_multiple_spans() {
        assert_eq!(inner("a ${x} b ${y.z}"), vec!["x", "y.z"]);
    }

    #[test]
    fn test_skips_braces_in_quotes() {
        assert_eq!(inner("${concat('}', \"{\", `}`)}!"), vec!["concat('}', \"{\", `}`)"]);
    }

    #[test]
    fn test_nested_braces_balance() {
        assert_eq!(inner("${ {a} }"), vec![" {a} "]);
    }

    #[test]
    fn test_unterminated_span_is_ignored() {
        assert!(find_spans("value ${oops").is_empty());
        assert!(find_spans("no templates $ here {}").is_empty());
    }
}
