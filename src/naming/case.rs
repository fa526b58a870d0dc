//! Case conversion helpers shared by topic and queue naming.

/// Convert `PascalCase`/`camelCase` text to `snake_case`.
///
/// An underscore is inserted before an uppercase character that is neither the
/// first nor the last character and does not follow another uppercase
/// character, then everything is lowercased. Acronyms therefore stay together:
/// `HTTPRequest` becomes `httprequest`, `OrderCreated` becomes `order_created`.
pub fn to_snake_case(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 4);

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i + 1 < chars.len() && c.is_uppercase() && !chars[i - 1].is_uppercase() {
            out.push('_');
        }
        out.extend(c.to_lowercase());
    }

    out
}

/// Convert `snake_case` text to `PascalCase`
pub fn to_pascal_case(text: &str) -> String {
    text.to_lowercase()
        .split('_')
        .map(title_case)
        .collect::<Vec<_>>()
        .concat()
}

/// Strip leading and trailing underscores
pub fn trim_underscores(text: &str) -> &str {
    text.trim_matches('_')
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
