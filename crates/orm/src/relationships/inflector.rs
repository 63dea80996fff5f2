//! Naming conventions used to derive association defaults
//!
//! Only the handful of English rules needed for model, table and key names.

const UNCOUNTABLE: &[&str] = &["equipment", "information", "rice", "money", "species", "series", "fish", "sheep", "news"];

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("child", "children"),
    ("mouse", "mice"),
];

/// `company` -> `companies`, `client` -> `clients`
pub fn pluralize(word: &str) -> String {
    if word.is_empty() || UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }
    if let Some((singular, plural)) = IRREGULAR.iter().find(|(singular, _)| word.ends_with(singular)) {
        return format!("{}{}", &word[..word.len() - singular.len()], plural);
    }
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(&['a', 'e', 'i', 'o', 'u'][..]) {
            return format!("{}ies", stem);
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| word.ends_with(suffix)) {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

/// `companies` -> `company`, `addresses` -> `address`
pub fn singularize(word: &str) -> String {
    if word.is_empty() || UNCOUNTABLE.contains(&word) {
        return word.to_string();
    }
    if let Some((singular, plural)) = IRREGULAR.iter().find(|(_, plural)| word.ends_with(plural)) {
        return format!("{}{}", &word[..word.len() - plural.len()], singular);
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{}y", stem);
        }
    }
    for suffix in ["sses", "xes", "zes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") || word.ends_with("us") {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) => stem.to_string(),
        None => word.to_string(),
    }
}

/// `special_project` -> `SpecialProject`
pub fn camelize(word: &str) -> String {
    word.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// `SpecialProject` -> `special_project`
pub fn underscore(word: &str) -> String {
    let mut out = String::with_capacity(word.len() + 4);
    let mut previous_lower = false;
    for ch in word.chars() {
        if ch.is_uppercase() {
            if previous_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            previous_lower = false;
        } else {
            out.push(ch);
            previous_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Table name for a model: `SpecialProject` -> `special_projects`
pub fn tableize(model: &str) -> String {
    pluralize(&underscore(model))
}

/// Model name for an association or table name: `clients` -> `Client`
pub fn classify(name: &str) -> String {
    camelize(&singularize(name))
}

/// Foreign key referencing a model: `Firm` -> `firm_id`
pub fn foreign_key(model: &str) -> String {
    format!("{}_id", underscore(model))
}
