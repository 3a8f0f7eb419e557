//! Price text normalization

/// Parse a displayed price into a number.
///
/// Takes the first run of digits and separators in `text`, decides which of
/// `.` and `,` is the decimal separator, and strips the other as grouping:
/// - both present: the one appearing last is the decimal separator
/// - only commas: decimal when there is exactly one with at most two digits after it
/// - only dots: grouping when there are several, or one followed by exactly three digits
///
/// Returns `None` when the text holds no digits or the result is not a finite number.
pub fn parse_price(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(rest.len());
    let token = rest[..end].trim_end_matches(['.', ',']);

    let normalized = match (token.rfind('.'), token.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => token.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => token.replace(',', ""),
        (None, Some(comma)) => {
            let decimals = token.len() - comma - 1;
            if token.matches(',').count() == 1 && decimals <= 2 {
                token.replace(',', ".")
            } else {
                token.replace(',', "")
            }
        }
        (Some(dot), None) => {
            let decimals = token.len() - dot - 1;
            if token.matches('.').count() > 1 || decimals == 3 {
                token.replace('.', "")
            } else {
                token.to_string()
            }
        }
        (None, None) => token.to_string(),
    };

    normalized.parse::<f64>().ok().filter(|price| price.is_finite())
}
