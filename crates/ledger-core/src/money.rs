//! Integer-cents money helpers. All monetary arithmetic in the workspace is
//! exact `i64` minor units; floats never touch money.

/// Format cents as a plain dollar string, e.g. -12345 -> "-123.45".
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parse a dollar string ("123.45", "-0.50", "$1,234", "42") into cents.
pub fn parse_cents(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let s = s.strip_prefix('$').unwrap_or(s);
    let cleaned: String = s.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }

    let (whole, frac) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole_cents = if whole.is_empty() {
        0
    } else {
        whole.parse::<i64>().ok()?.checked_mul(100)?
    };
    let frac_cents = if frac.is_empty() {
        0
    } else {
        // "5" means 50 cents, "05" means 5
        let padded = format!("{:0<2}", frac);
        padded.parse::<i64>().ok()?
    };

    let cents = whole_cents.checked_add(frac_cents)?;
    Some(if negative { -cents } else { cents })
}

/// Proportional share of `total` for `part` out of `whole`, truncated toward
/// zero. Widens through i128 so large basis values cannot overflow.
pub fn prorate(total: i64, part: i64, whole: i64) -> i64 {
    if whole == 0 {
        return 0;
    }
    ((total as i128 * part as i128) / whole as i128) as i64
}
