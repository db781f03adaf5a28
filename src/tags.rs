//! Hub tag expressions for targeted template sends.

use uuid::Uuid;

use crate::models::{ClientType, PushTarget};

/// Keeps only `[A-Za-z0-9-_:]`.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
        .collect()
}

pub fn build_tag(
    target: PushTarget,
    target_id: Uuid,
    excluded_identifier: Option<&str>,
    client_type: Option<ClientType>,
) -> String {
    let id = sanitize(&target_id.to_string());
    let mut tag = match target {
        PushTarget::User => format!("template:payload_userId:{id}"),
        PushTarget::Organization => format!("template:payload && organizationId:{id}"),
        PushTarget::Installation => format!("template:payload && installationId:{id}"),
    };

    if let Some(identifier) = excluded_identifier.filter(|id| !id.trim().is_empty()) {
        tag.push_str(&format!(" && !deviceIdentifier:{}", sanitize(identifier)));
    }

    if let Some(client_type) = client_type.filter(|ct| *ct != ClientType::All) {
        tag.push_str(&format!(" && clientType:{client_type}"));
    }

    format!("({tag})")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "6c3fd1e6-0a3b-4a5e-8b59-2f3c1a0d9e10";

    fn id() -> Uuid {
        ID.parse().unwrap()
    }

    #[test]
    fn user_tag() {
        assert_eq!(
            build_tag(PushTarget::User, id(), None, None),
            format!("(template:payload_userId:{ID})")
        );
    }

    #[test]
    fn organization_tag_excludes_device_and_filters_client() {
        assert_eq!(
            build_tag(PushTarget::Organization, id(), Some("device-1"), Some(ClientType::Mobile)),
            format!("(template:payload && organizationId:{ID} && !deviceIdentifier:device-1 && clientType:Mobile)")
        );
    }

    #[test]
    fn installation_tag_ignores_all_client_type_and_blank_identifier() {
        assert_eq!(
            build_tag(PushTarget::Installation, id(), Some("  "), Some(ClientType::All)),
            format!("(template:payload && installationId:{ID})")
        );
    }

    #[test]
    fn identifier_is_sanitized() {
        let tag = build_tag(PushTarget::User, id(), Some("dev ice)||x&&y"), None);
        assert!(tag.ends_with(" && !deviceIdentifier:devicexy)"));
        assert_eq!(sanitize("a-b_c:d e!"), "a-b_c:de");
    }
}
