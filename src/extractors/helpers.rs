//! Parsing helpers shared by every extractor.
//!
//! These never fail: unparseable input yields `None`.

use serde_json::Value;

/// Parse a recipe duration into whole minutes.
///
/// Accepts `PT[n]H[n]M[n]S` (optionally prefixed with a `P[n]D` day part) and
/// bare numeric strings, which are taken as minutes. Hours and minutes are
/// summed; any nonzero seconds component adds exactly one minute.
pub fn parse_duration(input: &str) -> Option<u32> {
    let text = input.trim();
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().ok();
    }

    let upper = text.to_ascii_uppercase();
    let rest = upper.strip_prefix('P')?;
    let (days, time) = match rest.split_once('T') {
        Some((days, time)) => (days, time),
        None => return None,
    };

    let mut minutes: u32 = 0;
    if !days.is_empty() {
        let days: u32 = days.strip_suffix('D')?.parse().ok()?;
        minutes = minutes.checked_add(days.checked_mul(24 * 60)?)?;
    }

    let mut seen_any = false;
    let mut last_rank = 0;
    let mut number = String::new();
    for c in time.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let rank = match c {
            'H' => 1,
            'M' => 2,
            'S' => 3,
            _ => return None,
        };
        // components must appear once each, in H, M, S order
        if rank <= last_rank || number.is_empty() {
            return None;
        }
        last_rank = rank;
        seen_any = true;

        match c {
            'H' => {
                let hours: u32 = number.parse().ok()?;
                minutes = minutes.checked_add(hours.checked_mul(60)?)?;
            }
            'M' => {
                let mins: u32 = number.parse().ok()?;
                minutes = minutes.checked_add(mins)?;
            }
            _ => {
                let seconds: f64 = number.parse().ok()?;
                if seconds > 0.0 {
                    minutes = minutes.checked_add(1)?;
                }
            }
        }
        number.clear();
    }

    if !seen_any || !number.is_empty() {
        return None;
    }
    Some(minutes)
}

/// Extract the first run of digits anywhere in the input.
pub fn parse_servings(input: &str) -> Option<u32> {
    let digits: String = input
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Servings from a JSON value (number, string or list of either)
pub fn parse_servings_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => parse_servings(s),
        Value::Array(items) => items.iter().find_map(parse_servings_value),
        _ => None,
    }
}

/// Trim text; empty results become `None`, never an empty string.
pub fn clean_text(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Join list parts with single spaces, then clean.
pub fn clean_text_list<S: AsRef<str>>(parts: &[S]) -> Option<String> {
    let joined = parts
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    clean_text(&joined)
}

/// Clean a loosely typed JSON value: strings are trimmed, lists joined.
pub fn clean_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => clean_text(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(clean_value).collect();
            clean_text_list(&parts)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration_iso() {
        assert_eq!(parse_duration("PT1H30M"), Some(90));
        assert_eq!(parse_duration("PT45S"), Some(1));
        assert_eq!(parse_duration("PT1M30S"), Some(2));
        assert_eq!(parse_duration("PT2H"), Some(120));
        assert_eq!(parse_duration("PT0M"), Some(0));
        assert_eq!(parse_duration("PT0S"), Some(0));
        assert_eq!(parse_duration("pt15m"), Some(15));
        assert_eq!(parse_duration("P0DT0H20M"), Some(20));
        assert_eq!(parse_duration("P1DT1H"), Some(1500));
    }

    #[test]
    fn test_parse_duration_bare_minutes() {
        assert_eq!(parse_duration("25"), Some(25));
        assert_eq!(parse_duration(" 40 "), Some(40));
    }

    #[test]
    fn test_parse_duration_garbage() {
        assert_eq!(parse_duration("garbage"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("PT"), None);
        assert_eq!(parse_duration("PT30M1H"), None);
        assert_eq!(parse_duration("PT15-20M"), None);
        assert_eq!(parse_duration("PTH"), None);
        assert_eq!(parse_duration("30 minutes"), None);
        assert_eq!(parse_duration("PT30"), None);
    }

    #[test]
    fn test_parse_servings() {
        assert_eq!(parse_servings("Serves 4-6"), Some(4));
        assert_eq!(parse_servings("12 cookies"), Some(12));
        assert_eq!(parse_servings("makes about 24"), Some(24));
        assert_eq!(parse_servings("a few"), None);
        assert_eq!(parse_servings(""), None);
    }

    #[test]
    fn test_parse_servings_value() {
        assert_eq!(parse_servings_value(&json!(4)), Some(4));
        assert_eq!(parse_servings_value(&json!("8 slices")), Some(8));
        assert_eq!(parse_servings_value(&json!(["6", "6 servings"])), Some(6));
        assert_eq!(parse_servings_value(&json!(null)), None);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  hello  "), Some("hello".to_string()));
        assert_eq!(clean_text("   "), None);
        assert_eq!(
            clean_text_list(&["  Mix ", "", "bake  "]),
            Some("Mix bake".to_string())
        );
        assert_eq!(clean_text_list::<&str>(&[]), None);
        assert_eq!(
            clean_value(&json!(["a", " b "])),
            Some("a b".to_string())
        );
        assert_eq!(clean_value(&json!("")), None);
    }
}
