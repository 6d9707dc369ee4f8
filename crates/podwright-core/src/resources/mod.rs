pub mod quantities;

pub use quantities::{Quantity, QuantityFormat};

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    // Must contain only lowercase alphanumeric, '-', or '.'
    // Must start and end with alphanumeric
    let chars: Vec<char> = name.chars().collect();

    if !chars[0].is_ascii_lowercase() && !chars[0].is_ascii_digit() {
        return false;
    }

    if !chars[chars.len() - 1].is_ascii_lowercase() && !chars[chars.len() - 1].is_ascii_digit() {
        return false;
    }

    chars
        .iter()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.')
}

/// Validate a DNS-1123 label, the form container, port and volume names take
pub fn is_valid_label_name(name: &str) -> bool {
    name.len() <= 63 && !name.contains('.') && is_valid_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("nginx"));
        assert!(is_valid_name("my-app"));
        assert!(is_valid_name("my-app-123"));
        assert!(is_valid_name("my.app"));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name("MyApp")); // uppercase
        assert!(!is_valid_name("-myapp")); // starts with dash
        assert!(!is_valid_name("myapp-")); // ends with dash
        assert!(!is_valid_name("my_app")); // underscore
    }

    #[test]
    fn test_is_valid_label_name() {
        assert!(is_valid_label_name("containername"));
        assert!(is_valid_label_name("cache-volume"));
        assert!(!is_valid_label_name("my.container"));
        assert!(!is_valid_label_name(&"a".repeat(64)));
    }
}
