//! Identifier transformations for muppet names.
//!
//! Muppet names are kebab-case (`billing-svc`); generated code needs the
//! same name as a snake_case module, a PascalCase type and a flat package
//! segment.

/// Converts a string to snake_case.
///
/// Handles camelCase, PascalCase, kebab-case and space separated input.
///
/// # Examples
/// ```
/// use muppets::core::utils::to_snake_case;
///
/// assert_eq!(to_snake_case("billing-svc"), "billing_svc");
/// assert_eq!(to_snake_case("BillingSvc"), "billing_svc");
/// assert_eq!(to_snake_case("billing svc v2"), "billing_svc_v2");
/// ```
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    let mut prev_is_lowercase = false;

    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 && prev_is_lowercase {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
            prev_is_lowercase = false;
        } else if ch.is_alphanumeric() {
            result.push(ch);
            prev_is_lowercase = ch.is_lowercase() || ch.is_ascii_digit();
        } else if ch == '-' || ch == '_' || ch == ' ' {
            if !result.is_empty() && !result.ends_with('_') {
                result.push('_');
            }
            prev_is_lowercase = false;
        }
    }

    result.trim_matches('_').to_string()
}

/// Converts a string to PascalCase, normalizing through snake_case first.
///
/// # Examples
/// ```
/// use muppets::core::utils::to_pascal_case;
///
/// assert_eq!(to_pascal_case("billing-svc"), "BillingSvc");
/// assert_eq!(to_pascal_case("order_history"), "OrderHistory");
/// ```
pub fn to_pascal_case(s: &str) -> String {
    to_snake_case(s)
        .split('_')
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect()
}

/// Collapses a name into a single lowercase alphanumeric segment, suitable
/// for a Java package component (`billing-svc` -> `billingsvc`).
pub fn to_package_segment(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
