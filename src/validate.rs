//! User input validation for the chat surface.

use serde::{Deserialize, Serialize};

/// Longest accepted question, in characters after trimming.
pub const MAX_INPUT_CHARS: usize = 1000;

/// Validation verdict with the trimmed input and any guidance for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputValidation {
    pub is_valid: bool,
    pub sanitized_input: String,
    pub suggestions: Vec<String>,
}

/// Validate a chat question: non-empty and at most [`MAX_INPUT_CHARS`]
/// characters after trimming.
pub fn validate_input(input: &str) -> InputValidation {
    let sanitized = input.trim().to_string();
    let length = sanitized.chars().count();
    let is_valid = length > 0 && length <= MAX_INPUT_CHARS;

    let suggestions = if is_valid {
        Vec::new()
    } else {
        vec![format!(
            "Please enter a question between 1 and {} characters",
            MAX_INPUT_CHARS
        )]
    };

    InputValidation {
        is_valid,
        sanitized_input: sanitized,
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_invalid() {
        let v = validate_input("");
        assert!(!v.is_valid);
        assert!(!v.suggestions.is_empty());

        let v = validate_input("   \n\t  ");
        assert!(!v.is_valid);
    }

    #[test]
    fn oversized_input_is_invalid() {
        let v = validate_input(&"a".repeat(1001));
        assert!(!v.is_valid);
    }

    #[test]
    fn boundary_length_is_valid() {
        let v = validate_input(&"a".repeat(1000));
        assert!(v.is_valid);
    }

    #[test]
    fn normal_question_is_valid_and_trimmed() {
        let v = validate_input("  What is your Java experience?  ");
        assert!(v.is_valid);
        assert_eq!(v.sanitized_input, "What is your Java experience?");
        assert!(v.suggestions.is_empty());
    }
}
