//! Mapping request hosts to tenant subdomains.

/// Extract the tenant label from a `Host` header value.
///
/// `acme.example.com:8443` with root `example.com` gives `acme`. The bare
/// root, `www` and multi-label prefixes yield `None`. With a root of
/// `localhost`, `acme.localhost:3000` works the same way for local testing.
pub fn subdomain_from_host(host: &str, root_domain: &str) -> Option<String> {
    let host = strip_port(host.trim()).trim_end_matches('.').to_ascii_lowercase();
    let root = root_domain.trim().trim_matches('.').to_ascii_lowercase();
    if root.is_empty() {
        return None;
    }

    let label = host.strip_suffix(&format!(".{}", root))?;
    if label.is_empty() || label == "www" || label.contains('.') {
        return None;
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return None;
    }
    Some(label.to_string())
}

fn strip_port(host: &str) -> &str {
    // bracketed IPv6 literals never carry a tenant
    if host.starts_with('[') {
        return "";
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
