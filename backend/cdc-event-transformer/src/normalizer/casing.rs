//! Casing conversion for entity-type path segments

use serde::Deserialize;

/// Convention used when an entity type token becomes a source path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathCasing {
    /// `OrderLine` -> `order-line`
    #[default]
    Kebab,
    /// `OrderLine` -> `order_line`
    Snake,
    /// Token used unchanged
    Verbatim,
}

impl PathCasing {
    pub fn apply(&self, token: &str) -> String {
        match self {
            PathCasing::Kebab => split_words(token).join("-"),
            PathCasing::Snake => split_words(token).join("_"),
            PathCasing::Verbatim => token.to_string(),
        }
    }
}

/// Split a PascalCase/camelCase/delimited token into lowercase words.
///
/// A word boundary sits before an uppercase letter that follows a lowercase letter,
/// before the last capital of an acronym that starts a new word
/// (`HTTPRequest` -> `http`, `request`), between letters and digits
/// (`Invoice2Payment` -> `invoice`, `2`, `payment`), and at `_`, `-` or whitespace.
fn split_words(token: &str) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let case_boundary = c.is_uppercase()
                && (prev.is_lowercase() || (prev.is_uppercase() && next_is_lower));
            let digit_boundary = c.is_ascii_digit() != prev.is_ascii_digit();
            if case_boundary || digit_boundary {
                words.push(std::mem::take(&mut current));
            }
        }

        current.extend(c.to_lowercase());
    }

    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kebab_case() {
        let casing = PathCasing::Kebab;
        assert_eq!(casing.apply("Order"), "order");
        assert_eq!(casing.apply("OrderLine"), "order-line");
        assert_eq!(casing.apply("orderLine"), "order-line");
        assert_eq!(casing.apply("HTTPRequest"), "http-request");
        assert_eq!(casing.apply("UserID"), "user-id");
        assert_eq!(casing.apply("order_line"), "order-line");
        assert_eq!(casing.apply("Order Line"), "order-line");
        assert_eq!(casing.apply("order-line"), "order-line");
    }

    #[test]
    fn test_digit_runs_are_separate_words() {
        let casing = PathCasing::Kebab;
        assert_eq!(casing.apply("Invoice2Payment"), "invoice-2-payment");
        assert_eq!(casing.apply("A1B"), "a-1-b");
        assert_eq!(casing.apply("Order42"), "order-42");
        assert_eq!(casing.apply("V10Report"), "v-10-report");
        assert_eq!(PathCasing::Snake.apply("Invoice2Payment"), "invoice_2_payment");
    }

    #[test]
    fn test_snake_and_verbatim() {
        assert_eq!(PathCasing::Snake.apply("OrderLine"), "order_line");
        assert_eq!(PathCasing::Verbatim.apply("OrderLine"), "OrderLine");
    }

    #[test]
    fn test_empty_token() {
        assert_eq!(PathCasing::Kebab.apply(""), "");
        assert_eq!(PathCasing::Kebab.apply("__"), "");
    }
}
