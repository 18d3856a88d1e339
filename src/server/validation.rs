use crate::server::response::ApiError;

const MAX_NAME_LEN: usize = 128;

fn validate_name(name: &str, entity: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request(format!(
            "{entity} name cannot be empty"
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "{entity} name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ApiError::bad_request(format!(
            "{entity} name cannot contain control characters"
        )));
    }
    Ok(())
}

pub fn validate_app_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "App")
}

pub fn validate_deployment_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Deployment")
}

pub fn validate_friendly_name(name: &str) -> Result<(), ApiError> {
    validate_name(name, "Access key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_oversized() {
        assert!(validate_app_name("").is_err());
        assert!(validate_app_name("   ").is_err());
        assert!(validate_app_name(&"x".repeat(200)).is_err());
        assert!(validate_app_name("My App 2").is_ok());
    }

    #[test]
    fn test_rejects_control_characters() {
        assert!(validate_deployment_name("Prod\nuction").is_err());
        assert!(validate_deployment_name("Production").is_ok());
    }
}
