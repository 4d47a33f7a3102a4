use std::collections::HashMap;

use super::EngineError;

/// Allow-list gate for item attribute updates. Every key of `changes` must
/// be a member of the item type's `allowed_keys`; each offending key is
/// reported, sorted so the message list is deterministic.
pub(crate) fn validate_keys(
    allowed_keys: &[String],
    changes: &HashMap<String, String>,
) -> Result<(), EngineError> {
    let mut offending: Vec<&str> = changes
        .keys()
        .filter(|key| !allowed_keys.iter().any(|a| a == *key))
        .map(String::as_str)
        .collect();

    if offending.is_empty() {
        return Ok(());
    }
    offending.sort_unstable();
    Err(EngineError::Validation(
        offending
            .into_iter()
            .map(|key| format!("Disallowed key: {key}"))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn allowed_keys_pass() {
        let allowed = vec!["mileage".to_string(), "color".to_string()];
        assert!(validate_keys(&allowed, &changes(&[("mileage", "9000")])).is_ok());
        assert!(validate_keys(&allowed, &changes(&[])).is_ok());
    }

    #[test]
    fn disallowed_key_names_the_key() {
        let allowed = vec!["mileage".to_string()];
        let result = validate_keys(&allowed, &changes(&[("color", "orange")]));
        match result {
            Err(EngineError::Validation(messages)) => {
                assert_eq!(messages, vec!["Disallowed key: color".to_string()]);
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn all_violations_reported_sorted() {
        let allowed = vec!["mileage".to_string()];
        let result = validate_keys(
            &allowed,
            &changes(&[("color", "orange"), ("vin", "123"), ("mileage", "1")]),
        );
        match result {
            Err(EngineError::Validation(messages)) => {
                assert_eq!(
                    messages,
                    vec![
                        "Disallowed key: color".to_string(),
                        "Disallowed key: vin".to_string(),
                    ]
                );
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn empty_allow_list_rejects_everything() {
        let result = validate_keys(&[], &changes(&[("anything", "x")]));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }
}
