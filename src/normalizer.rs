//! Ingredient name canonicalization.
//!
//! `normalize` turns a free-text ingredient mention into the lookup key used by
//! the matcher and the ingredient-match cache. It is pure, total and idempotent.

/// Words that describe state or preparation rather than the ingredient itself
const QUALIFIERS: &[&str] = &[
    "raw", "cooked", "uncooked", "fresh", "freshly", "organic", "frozen", "chopped", "diced",
    "minced", "sliced", "finely", "roughly", "large", "medium", "small",
];

/// Spelling variants keyed by singular token sequence
const VARIANTS: &[(&[&str], &str)] = &[
    (&["spring", "onion"], "scallion"),
    (&["green", "onion"], "scallion"),
    (&["garbanzo", "bean"], "chickpea"),
    (&["icing", "sugar"], "powdered sugar"),
    (&["yoghurt"], "yogurt"),
    (&["yogourt"], "yogurt"),
    (&["aubergine"], "eggplant"),
    (&["courgette"], "zucchini"),
    (&["coriander"], "cilantro"),
    (&["rocket"], "arugula"),
    (&["capsicum"], "bell pepper"),
    (&["mangetout"], "snow pea"),
    (&["beetroot"], "beet"),
    (&["chilli"], "chili"),
    (&["chilly"], "chili"),
    (&["chile"], "chili"),
    (&["caster"], "superfine"),
];

/// Nouns that look plural but must never be singularized
const MASS_NOUNS: &[&str] = &[
    "hummus", "couscous", "asparagus", "quinoa", "molasses", "citrus", "hibiscus", "octopus",
    "grits", "swiss", "series", "species", "brussels", "lemongrass", "watercress", "cress",
    "bass", "anise", "tahini", "schnapps",
];

const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("leaves", "leaf"),
    ("halves", "half"),
    ("loaves", "loaf"),
    ("knives", "knife"),
    ("teeth", "tooth"),
];

/// Canonicalize an ingredient name into a lookup key.
///
/// Rules, in order: strip parenthetical/bracketed content, lowercase, collapse
/// whitespace, drop standalone qualifier words, rewrite spelling variants,
/// singularize the trailing token. Inputs shorter than 2 characters pass
/// through unchanged.
pub fn normalize(name: &str) -> String {
    if name.chars().count() < 2 {
        return name.to_string();
    }

    let stripped = strip_bracketed(name).to_lowercase().replace([',', ';'], " ");
    let tokens: Vec<&str> = stripped.split_whitespace().collect();
    if tokens.is_empty() {
        return String::new();
    }

    let kept: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| !QUALIFIERS.contains(&singularize(t).as_str()))
        .collect();
    // A name made only of qualifiers keeps its words
    let tokens = if kept.is_empty() { tokens } else { kept };

    let mut tokens = apply_variants(&tokens);
    if let Some(last) = tokens.pop() {
        tokens.push(singularize(&last));
    }

    tokens.join(" ")
}

fn strip_bracketed(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                out.push(' ');
            }
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn apply_variants(tokens: &[&str]) -> Vec<String> {
    let singular: Vec<String> = tokens.iter().map(|t| singularize(t)).collect();
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;

    'outer: while i < tokens.len() {
        for (pattern, replacement) in VARIANTS {
            let end = i + pattern.len();
            if end <= tokens.len() && singular[i..end].iter().zip(pattern.iter()).all(|(a, b)| a == b)
            {
                out.extend(replacement.split(' ').map(str::to_string));
                i = end;
                continue 'outer;
            }
        }
        out.push(tokens[i].to_string());
        i += 1;
    }

    out
}

/// Nouns whose singular ends in "ie", not "y"
const IE_NOUNS: &[&str] = &[
    "cookie", "brownie", "pie", "smoothie", "calorie", "veggie", "hoagie", "goodie", "pastie",
    "sweetie", "beanie",
];

/// Singularize one token with simple suffix rules, applied until the token
/// stops changing so that a singular is never singularized again.
pub fn singularize(word: &str) -> String {
    let mut current = word.to_string();
    loop {
        let next = singularize_once(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn singularize_once(word: &str) -> String {
    if MASS_NOUNS.contains(&word) {
        return word.to_string();
    }
    if let Some((_, singular)) = IRREGULAR_PLURALS.iter().find(|(plural, _)| *plural == word) {
        return singular.to_string();
    }
    if word.len() <= 3 || word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }

    if let Some(stem) = word.strip_suffix('s').filter(|stem| IE_NOUNS.contains(stem)) {
        return stem.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if stem.len() >= 2 {
            return format!("{}y", stem);
        }
    }
    if let Some(stem) = word.strip_suffix("oes") {
        return format!("{}o", stem);
    }
    for suffix in ["ches", "shes", "sses", "xes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    match word.strip_suffix('s') {
        Some(stem) => stem.to_string(),
        None => word.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(normalize("hummus"), "hummus");
        assert_eq!(normalize("tomatoes"), "tomato");
        assert_eq!(normalize("chicken (raw)"), "chicken");
        assert_eq!(normalize("Fresh Organic Basil Leaves"), "basil leaf");
        assert_eq!(normalize("Greek Yoghurt"), "greek yogurt");
        assert_eq!(normalize("aubergines"), "eggplant");
        assert_eq!(normalize("courgette [small]"), "zucchini");
        assert_eq!(normalize("Spring Onions"), "scallion");
        assert_eq!(normalize("  cherry   tomatoes "), "cherry tomato");
        assert_eq!(normalize("raspberries"), "raspberry");
        assert_eq!(normalize("peaches"), "peach");
        assert_eq!(normalize("couscous"), "couscous");
        assert_eq!(normalize("asparagus"), "asparagus");
        assert_eq!(normalize("quinoa"), "quinoa");
    }

    #[test]
    fn test_short_and_empty_pass_through() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("A"), "A");
        assert_eq!(normalize("(optional)"), "");
    }

    #[test]
    fn test_only_qualifiers_are_kept() {
        assert_eq!(normalize("Fresh"), "fresh");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "hummus",
            "Tomatoes",
            "chicken (raw)",
            "Fresh Coriander",
            "aubergines",
            "rocket leaves",
            "Spring Onions, chopped",
            "icing sugar",
            "glasses",
            "boxes",
            "A",
            "",
            "  ",
            "(x)",
            "raw",
            "cooked chickpeas (drained)",
            "chillies",
            "mangoes",
            "brussels sprouts",
            "lemongrass",
            "anchovies",
            "frozen peas [thawed]",
            "Z)",
            "((nested) brackets) oats",
            "Beetroots",
            "caster sugar",
            "chicken raws",
            "sugar teeths",
            "bay leavess",
            "cookies",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_idempotent_over_generated_names() {
        let prefixes = ["", "fresh ", "spring ", "icing ", "sugar ", "(diced) "];
        let stems = [
            "teeth", "tooth", "leaves", "leaf", "cookie", "calorie", "berry", "tomato", "box",
            "glass", "hummus", "onion", "chili", "peach", "knive", "half", "pie", "bean",
        ];
        let suffixes = ["", "s", "es", "ies", "ss", "ses"];
        for prefix in prefixes {
            for stem in stems {
                for suffix in suffixes {
                    let name = format!("{}{}{}", prefix, stem, suffix);
                    let once = normalize(&name);
                    assert_eq!(normalize(&once), once, "not idempotent for {:?}", name);
                }
            }
        }
    }

    #[test]
    fn test_ie_nouns_keep_their_ending() {
        assert_eq!(normalize("cookies"), "cookie");
        assert_eq!(normalize("Chocolate Brownies"), "chocolate brownie");
        assert_eq!(normalize("calories"), "calorie");
        assert_eq!(normalize("smoothies"), "smoothie");
        assert_eq!(normalize("pies"), "pie");
        assert_eq!(normalize("cherries"), "cherry");
    }

    #[test]
    fn test_singularize_rules() {
        assert_eq!(singularize("berries"), "berry");
        assert_eq!(singularize("potatoes"), "potato");
        assert_eq!(singularize("radishes"), "radish");
        assert_eq!(singularize("olives"), "olive");
        assert_eq!(singularize("halves"), "half");
        assert_eq!(singularize("peas"), "pea");
        assert_eq!(singularize("gas"), "gas");
        assert_eq!(singularize("molasses"), "molasses");
        assert_eq!(singularize("teeths"), "tooth");
        assert_eq!(singularize(&singularize("teeths")), "tooth");
    }
}
