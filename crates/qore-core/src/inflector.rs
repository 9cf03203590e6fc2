// SPDX-License-Identifier: Apache-2.0

//! Name-defaulting helpers used when a schema doesn't override `tableName`
//! or a field's `columnName`.
//!
//! Deliberately naive — this is not a full English inflector. It implements
//! exactly the rule the schema language promises: append `s`, `y -> ies`,
//! and `s/x/z/ch/sh -> es`.

/// `Model` -> `models` (naive pluralization).
pub fn pluralize_snake(model_name: &str) -> String {
    let snake = to_snake_case(model_name);
    pluralize(&snake)
}

pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return word.to_string();
    }
    if word.ends_with('y') {
        let stem = &word[..word.len() - 1];
        if let Some(c) = stem.chars().last() {
            if !is_vowel(c) {
                return format!("{stem}ies");
            }
        }
        return format!("{word}s");
    }
    for suffix in ["s", "x", "z", "ch", "sh"] {
        if word.ends_with(suffix) {
            return format!("{word}es");
        }
    }
    format!("{word}s")
}

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

/// `camelCase` / `PascalCase` -> `snake_case`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_is_lower_or_digit = false;
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 && prev_is_lower_or_digit {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_is_lower_or_digit = false;
        } else {
            out.push(ch);
            prev_is_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralizes_plain_nouns() {
        assert_eq!(pluralize("user"), "users");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("key"), "keys"); // vowel before y -> just append s
        assert_eq!(pluralize("bus"), "buses");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("buzz"), "buzzes");
        assert_eq!(pluralize("batch"), "batches");
        assert_eq!(pluralize("wish"), "wishes");
    }

    #[test]
    fn snake_cases_model_and_field_names() {
        assert_eq!(to_snake_case("User"), "user");
        assert_eq!(to_snake_case("postTag"), "post_tag");
        assert_eq!(to_snake_case("createdAt"), "created_at");
        assert_eq!(to_snake_case("orderItemId"), "order_item_id");
    }

    #[test]
    fn pluralize_snake_composes_both_rules() {
        assert_eq!(pluralize_snake("User"), "users");
        assert_eq!(pluralize_snake("PostTag"), "post_tags");
        assert_eq!(pluralize_snake("Category"), "categories");
    }
}
