/// Strip everything but digits and decimal points from a formatted amount, keeping a leading
/// minus sign. `"¥1,234"` becomes `"1234"` and `"-12,000.5"` becomes `"-12000.5"`.
///
/// A string that is only a minus sign yields an empty string.
pub fn clean_number(value: &str) -> String {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let cleaned: String = digits
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if negative && !cleaned.is_empty() {
        format!("-{cleaned}")
    } else {
        cleaned
    }
}
