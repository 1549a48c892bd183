//! Collision-free names for containers and generated directories.

/// Creates a unique name that includes the hint when one is given.
///
/// Produces `<hint>-<uuid>` or a bare UUID for an empty hint. The result is a
/// valid container name as long as the hint is.
#[must_use]
pub fn unique_name(hint: &str) -> String {
    let id = uuid::Uuid::new_v4();
    if hint.is_empty() {
        id.to_string()
    } else {
        format!("{hint}-{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_hint() {
        let name = unique_name("irods");
        assert!(name.starts_with("irods-"));
        assert_eq!(name.len(), "irods-".len() + 36);
    }

    #[test]
    fn bare_uuid_without_hint() {
        let name = unique_name("");
        assert!(uuid::Uuid::parse_str(&name).is_ok());
    }

    #[test]
    fn names_do_not_collide() {
        let names: std::collections::HashSet<_> = (0..100).map(|_| unique_name("x")).collect();
        assert_eq!(names.len(), 100);
    }
}
