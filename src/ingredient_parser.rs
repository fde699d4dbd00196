//! Ingredient line parsing.
//!
//! Splits raw ingredient strings (e.g., "1 1/2 cups flour, sifted") into
//! quantity, unit and name. Best effort: nothing here fails.

use crate::model::ExtractedIngredient;

/// Unit spellings mapped to their canonical short form.
/// Multi-word spellings come first so they win over their prefixes.
const UNITS: &[(&str, &str)] = &[
    ("fluid ounces", "fl oz"),
    ("fluid ounce", "fl oz"),
    ("fl oz", "fl oz"),
    ("tablespoons", "tbsp"),
    ("tablespoon", "tbsp"),
    ("tbsp", "tbsp"),
    ("tbs", "tbsp"),
    ("teaspoons", "tsp"),
    ("teaspoon", "tsp"),
    ("tsp", "tsp"),
    ("cups", "cup"),
    ("cup", "cup"),
    ("pints", "pint"),
    ("pint", "pint"),
    ("quarts", "quart"),
    ("quart", "quart"),
    ("gallons", "gallon"),
    ("gallon", "gallon"),
    ("milliliters", "ml"),
    ("milliliter", "ml"),
    ("millilitres", "ml"),
    ("millilitre", "ml"),
    ("ml", "ml"),
    ("liters", "l"),
    ("liter", "l"),
    ("litres", "l"),
    ("litre", "l"),
    ("ounces", "oz"),
    ("ounce", "oz"),
    ("oz", "oz"),
    ("pounds", "lb"),
    ("pound", "lb"),
    ("lbs", "lb"),
    ("lb", "lb"),
    ("kilograms", "kg"),
    ("kilogram", "kg"),
    ("kg", "kg"),
    ("grams", "g"),
    ("gram", "g"),
    ("g", "g"),
    ("milligrams", "mg"),
    ("milligram", "mg"),
    ("mg", "mg"),
    ("cloves", "clove"),
    ("clove", "clove"),
    ("pinches", "pinch"),
    ("pinch", "pinch"),
    ("dashes", "dash"),
    ("dash", "dash"),
    ("slices", "slice"),
    ("slice", "slice"),
    ("cans", "can"),
    ("can", "can"),
    ("sticks", "stick"),
    ("stick", "stick"),
    ("bunches", "bunch"),
    ("bunch", "bunch"),
    ("sprigs", "sprig"),
    ("sprig", "sprig"),
    ("handfuls", "handful"),
    ("handful", "handful"),
    ("packages", "package"),
    ("package", "package"),
    ("pieces", "piece"),
    ("piece", "piece"),
];

const OPTIONAL_MARKERS: &[&str] = &["optional", "to taste", "for garnish", "as needed"];

/// Parse one ingredient line.
pub fn parse_ingredient_line(line: &str) -> ExtractedIngredient {
    let original = line.trim().to_string();
    let lower = original.to_lowercase();
    let optional = OPTIONAL_MARKERS.iter().any(|m| lower.contains(m));

    let (quantity, rest) = extract_quantity(&original);
    let (unit, rest) = extract_unit(&rest);

    let mut name = strip_parenthetical(&rest);
    // Drop trailing preparation notes ("flour, sifted")
    if let Some(idx) = name.find(',') {
        name.truncate(idx);
    }
    let name = name
        .trim()
        .trim_start_matches("of ")
        .trim()
        .to_string();

    ExtractedIngredient {
        original_text: original.clone(),
        quantity,
        unit,
        name: if name.is_empty() { original } else { name },
        optional,
        ..Default::default()
    }
}

/// Parse a leading quantity: integers, decimals, fractions, mixed numbers,
/// unicode fractions and ranges (lower bound).
fn extract_quantity(s: &str) -> (Option<f64>, String) {
    let s = s.trim();
    let mut words: Vec<&str> = s.split_whitespace().collect();
    if words.is_empty() {
        return (None, String::new());
    }

    let Some(mut total) = parse_number(words[0]) else {
        // "200g butter" carries its unit glued to the number
        return match split_glued(words[0]) {
            Some((n, unit)) => {
                let mut rest = vec![unit];
                rest.extend_from_slice(&words[1..]);
                (Some(n), rest.join(" "))
            }
            None => (None, s.to_string()),
        };
    };
    let mut consumed = 1;

    // Mixed number: "1 1/2" or "1 ½"
    if let Some(second) = words.get(1) {
        if is_fraction(second) {
            if let Some(frac) = parse_number(second) {
                total += frac;
                consumed = 2;
            }
        }
    }

    // Range: "2 - 3 cups" or "2 to 3 cups"
    if let (Some(sep), Some(next)) = (words.get(consumed), words.get(consumed + 1)) {
        if (*sep == "-" || *sep == "to" || *sep == "–") && parse_number(next).is_some() {
            consumed += 2;
        }
    }

    let rest = words.split_off(consumed).join(" ");
    (Some(total), rest)
}

fn split_glued(word: &str) -> Option<(f64, &str)> {
    let split = word.find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '/'))?;
    let (number, unit) = word.split_at(split);
    if number.is_empty() || !unit.starts_with(|c: char| c.is_alphabetic()) {
        return None;
    }
    parse_number(number).map(|n| (n, unit))
}

fn is_fraction(word: &str) -> bool {
    word.contains('/') || word.chars().any(|c| unicode_fraction(c).is_some())
}

fn unicode_fraction(c: char) -> Option<f64> {
    match c {
        '½' => Some(0.5),
        '⅓' => Some(1.0 / 3.0),
        '⅔' => Some(2.0 / 3.0),
        '¼' => Some(0.25),
        '¾' => Some(0.75),
        '⅕' => Some(0.2),
        '⅛' => Some(0.125),
        '⅜' => Some(0.375),
        '⅝' => Some(0.625),
        '⅞' => Some(0.875),
        _ => None,
    }
}

fn parse_number(word: &str) -> Option<f64> {
    if !word.starts_with(|c: char| c.is_ascii_digit() || c == '.' || unicode_fraction(c).is_some())
    {
        return None;
    }
    // Ranges written without spaces take the lower bound: "2-3"
    let word = word
        .split(['-', '–'])
        .next()
        .filter(|w| !w.is_empty())?;

    if let Ok(n) = word.replace(',', ".").parse::<f64>() {
        return Some(n);
    }
    if let Some((num, den)) = word.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den);
    }

    // "1½" or "½"
    let mut chars = word.chars();
    let last = chars.next_back()?;
    let frac = unicode_fraction(last)?;
    let whole = chars.as_str();
    if whole.is_empty() {
        Some(frac)
    } else {
        whole.parse::<f64>().ok().map(|w| w + frac)
    }
}

fn extract_unit(s: &str) -> (Option<String>, String) {
    let lower = s.to_lowercase();
    for (spelling, canonical) in UNITS {
        if let Some(rest) = lower.strip_prefix(spelling) {
            // Unit must end at a word boundary ("g" must not eat "garlic")
            let boundary = rest
                .chars()
                .next()
                .map_or(true, |c| c.is_whitespace() || c == '.' || c == ',' || c == ')');
            if let (true, Some(rest)) = (boundary, s.get(spelling.len()..)) {
                let rest = rest.trim_start_matches('.').trim().to_string();
                return (Some(canonical.to_string()), rest);
            }
        }
    }
    (None, s.to_string())
}

fn strip_parenthetical(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    for c in s.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
