//! Container run configuration and input validation.

use super::error::{ContainerError, ContainerResult};

/// Configuration for running a new session container.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container name.
    pub name: Option<String>,
    /// OCI image to run.
    pub image: String,
    /// Named volume mounts (volume name -> container path).
    pub volumes: Vec<(String, String)>,
}

impl ContainerConfig {
    /// Create a new container config with the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Validate all fields before they are handed to the runtime binary.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_image_name(&self.image)?;

        if let Some(ref name) = self.name {
            validate_resource_name(name)?;
        }

        for (volume, container_path) in &self.volumes {
            validate_resource_name(volume)?;
            validate_container_path(container_path)?;
        }

        Ok(())
    }

    /// Set the container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mount a named volume.
    pub fn volume(mut self, volume: impl Into<String>, container_path: impl Into<String>) -> Self {
        self.volumes.push((volume.into(), container_path.into()));
        self
    }
}

/// Validate an image reference.
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };

    if !image.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{}' contains invalid characters",
            image
        )));
    }

    if image.contains("..") {
        return Err(ContainerError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate a container or volume name.
///
/// Names reach the runtime as bare arguments, so only alphanumerics, `-` and
/// `_` are accepted and the first character may not be `-`.
pub fn validate_resource_name(name: &str) -> ContainerResult<()> {
    let Some(first_char) = name.chars().next() else {
        return Err(ContainerError::InvalidInput(
            "container or volume name cannot be empty".to_string(),
        ));
    };

    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container or volume name exceeds maximum length of 128 characters".to_string(),
        ));
    }

    if !first_char.is_ascii_alphanumeric() && first_char != '_' {
        return Err(ContainerError::InvalidInput(
            "container or volume name must start with an alphanumeric character or underscore"
                .to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !name.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "name '{}' contains invalid characters; only alphanumeric, '-', '_' are allowed",
            name
        )));
    }

    Ok(())
}

fn validate_container_path(path: &str) -> ContainerResult<()> {
    if !path.starts_with('/') {
        return Err(ContainerError::InvalidInput(
            "container path must be absolute (start with '/')".to_string(),
        ));
    }

    if path.contains('\0') || path.contains(':') {
        return Err(ContainerError::InvalidInput(
            "container path cannot contain null bytes or ':'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_image_name_valid() {
        assert!(validate_image_name("ubuntu").is_ok());
        assert!(validate_image_name("ubuntu:24.04").is_ok());
        assert!(validate_image_name("myregistry.io/sandbox:v1.0").is_ok());
        assert!(validate_image_name("gcr.io/project/image@sha256:abc123").is_ok());
    }

    #[test]
    fn test_validate_image_name_invalid() {
        assert!(validate_image_name("").is_err());
        assert!(validate_image_name("image with spaces").is_err());
        assert!(validate_image_name("image;rm -rf /").is_err());
        assert!(validate_image_name("image$(whoami)").is_err());
        assert!(validate_image_name("../../../etc/passwd").is_err());
    }

    #[test]
    fn test_validate_resource_name() {
        assert!(validate_resource_name("container-6a03da55-2757-4d71-b421-af929bc4aef5").is_ok());
        assert!(validate_resource_name("6a03da55-2757-4d71-b421-af929bc4aef5-vol").is_ok());
        assert!(validate_resource_name("_private").is_ok());

        assert!(validate_resource_name("").is_err());
        assert!(validate_resource_name("-rm").is_err());
        assert!(validate_resource_name("has;semicolon").is_err());
        assert!(validate_resource_name("$(whoami)").is_err());
        assert!(validate_resource_name(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_config_validate() {
        let config = ContainerConfig::new("sandbox:latest")
            .name("container-abc")
            .volume("abc-vol", "/workspace");
        assert!(config.validate().is_ok());

        let relative = ContainerConfig::new("sandbox:latest").volume("abc-vol", "workspace");
        assert!(relative.validate().is_err());

        let bind_escape = ContainerConfig::new("sandbox:latest").volume("/etc", "/host");
        assert!(bind_escape.validate().is_err());
    }
}
