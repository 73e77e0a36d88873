use super::ConfigError;

/// Treats unset and blank variables the same way.
pub(super) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Loads and parses a variable. Keeps the default when it is unset or blank.
pub(super) fn load_env_var<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = non_empty(lookup(name)) {
        *target = value
            .parse()
            .map_err(|e| ConfigError::EnvError(format!("Invalid {name}: {e}")))?;
    }
    Ok(())
}

/// Loads a string variable over a default.
pub(super) fn load_env_string<F>(lookup: &F, name: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = non_empty(lookup(name)) {
        *target = value;
    }
}

/// Loads an optional string variable.
pub(super) fn load_env_string_opt<F>(lookup: &F, name: &str, target: &mut Option<String>)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = non_empty(lookup(name)) {
        *target = Some(value);
    }
}
