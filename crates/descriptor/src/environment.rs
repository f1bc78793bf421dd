//! Flattening of container environments into process environments.

use std::collections::BTreeMap;

/// A flat key-value environment.
pub type Environment = BTreeMap<String, String>;

/// Normalizes a key: upper-cased, with `-` and `.` turned into `_`.
#[must_use]
pub fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// The prefix applied to the keys of dependency `name`.
#[must_use]
pub fn dependency_prefix(name: &str) -> String {
    format!("{}_", env_key(name))
}

/// Merges a container's own environment with its dependencies'.
///
/// Own keys are normalized and kept unprefixed. Each dependency's keys are
/// normalized and prefixed with the dependency name. Dependencies are applied
/// in name order; a later write wins.
#[must_use]
pub fn compose(own: &Environment, dependencies: &BTreeMap<String, Environment>) -> Environment {
    let mut composed: Environment = own
        .iter()
        .map(|(key, value)| (env_key(key), value.clone()))
        .collect();

    for (name, environment) in dependencies {
        let prefix = dependency_prefix(name);
        for (key, value) in environment {
            composed.insert(format!("{prefix}{}", env_key(key)), value.clone());
        }
    }

    composed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn test_compose_prefixes_dependencies() {
        let own = env(&[("port", "8080")]);
        let dependencies =
            BTreeMap::from([("db".to_string(), env(&[("host", "h"), ("port", "5432")]))]);

        assert_eq!(
            compose(&own, &dependencies),
            env(&[("PORT", "8080"), ("DB_HOST", "h"), ("DB_PORT", "5432")])
        );
    }

    #[test]
    fn test_compose_normalizes_names() {
        let dependencies = BTreeMap::from([(
            "order-service.v2".to_string(),
            env(&[("base-url", "http://x")]),
        )]);

        assert_eq!(
            compose(&Environment::new(), &dependencies),
            env(&[("ORDER_SERVICE_V2_BASE_URL", "http://x")])
        );
    }

    #[test]
    fn test_dependency_values_override_colliding_own_keys() {
        let own = env(&[("db_host", "local"), ("Mode", "dev")]);
        let dependencies = BTreeMap::from([("db".to_string(), env(&[("host", "remote")]))]);

        assert_eq!(
            compose(&own, &dependencies),
            env(&[("DB_HOST", "remote"), ("MODE", "dev")])
        );
    }
}
